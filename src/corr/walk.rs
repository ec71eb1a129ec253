//! Recursive triangle traversal over cell triples.
//!
//! The walk enumerates triangle ensembles from (up to) three cells at a time.
//! A triple is first sorted so that d1 >= d2 >= d3; sorting permutes which
//! accumulator receives the contribution, expressed as a re-indexing of a
//! six-entry slot route into the worker's accumulator slice. A sorted triple
//! is then either pruned (no contained triangle can reach any bin), split
//! (some cell is too coarse for the requested tolerances), or committed.
//!
//! The pruning predicates are sufficient-not-necessary: being conservative
//! here costs time, never correctness.

use super::{BinData, BinParams, Zeta};
use crate::field::{Cell, Coord};
use crate::geometry::metric::MetricHelper;
use crate::geometry::project::project_triple;

/// Slot routes into the worker accumulator slice, in permutation order
/// 123, 132, 213, 231, 312, 321 of which field's point lands in which
/// sorted-side position.
pub(crate) const ROUTE_SELF: [usize; 6] = [0, 0, 0, 0, 0, 0];
pub(crate) const ROUTE_CROSS12: [usize; 6] = [0, 0, 1, 2, 1, 2];
pub(crate) const ROUTE_CROSS111: [usize; 6] = [0, 1, 2, 3, 4, 5];

/// Empirical companion-split factor: when c3 splits, c1 or c2 splits too if
/// its size-scale product exceeds this fraction of c3's.
const SPLIT_FACTOR: f64 = 0.7;

#[inline]
fn sq(x: f64) -> f64 {
    x * x
}

/// Traversal state for one worker: binning parameters, the bound metric, and
/// the worker-local accumulator slots.
pub(crate) struct Walker<'a> {
    p: &'a BinParams,
    metric: MetricHelper,
    coord: Coord,
    out: &'a mut [BinData],
}

impl<'a> Walker<'a> {
    pub fn new(
        p: &'a BinParams,
        metric: MetricHelper,
        coord: Coord,
        out: &'a mut [BinData],
    ) -> Self {
        Walker {
            p,
            metric,
            coord,
            out,
        }
    }

    /// All triangles with three vertices inside `c1`.
    pub fn process_within(&mut self, c1: &Cell) {
        if c1.weight() == 0.0 {
            return;
        }
        // Even the farthest internal pair cannot stretch to minsep.
        if c1.size() < self.p.halfminsep {
            return;
        }

        let (l, r) = c1.children().expect("cell with extent must be internal");
        self.process_within(l);
        self.process_within(r);
        self.process_pair(l, r, ROUTE_SELF);
        self.process_pair(r, l, ROUTE_SELF);
    }

    /// All triangles with one vertex in `c1` and two in `c2`.
    pub fn process_pair(&mut self, c1: &Cell, c2: &Cell, route: [usize; 6]) {
        if c1.weight() == 0.0 || c2.weight() == 0.0 {
            return;
        }
        let s2 = c2.size();
        // Two coincident points cannot form a pair with nonzero d3.
        if s2 == 0.0 {
            return;
        }
        // The in-c2 side can never reach the smallest binnable d3.
        if s2 < self.p.halfmind3 {
            return;
        }

        let s1 = c1.size();
        let dsq = self.metric.dist_sq(c1.pos(), c2.pos(), s1, s2);
        let s1ps2 = s1 + s2;

        // Every contained triangle would have d2 below minsep.
        if dsq < self.p.minsepsq && s1ps2 < self.p.minsep && dsq < sq(self.p.minsep - s1ps2) {
            return;
        }
        // Every contained triangle would have d2 at or above maxsep.
        if dsq >= self.p.maxsepsq && dsq >= sq(self.p.maxsep + s1ps2) {
            return;
        }
        // The largest reachable u = d3/d2 is 2 s2 / (d - s1 - s2); stop if
        // even that falls short of minu.
        if dsq > sq(s1ps2) && self.p.minusq * dsq > sq(2.0 * s2 + self.p.minu * s1ps2) {
            return;
        }

        let (l, r) = c2.children().expect("paired cell with extent must be internal");
        self.process_pair(c1, l, route);
        self.process_pair(c1, r, route);
        self.process_triple(route, c1, l, r, None, None, None);
    }

    /// All triangles with one vertex in each cell. Callers pass any side
    /// squares they already know; the rest are computed here.
    #[allow(clippy::too_many_arguments)]
    pub fn process_triple(
        &mut self,
        route: [usize; 6],
        c1: &Cell,
        c2: &Cell,
        c3: &Cell,
        d1sq: Option<f64>,
        d2sq: Option<f64>,
        d3sq: Option<f64>,
    ) {
        if c1.weight() == 0.0 || c2.weight() == 0.0 || c3.weight() == 0.0 {
            return;
        }

        let d1sq = d1sq.unwrap_or_else(|| self.metric.dist_sq(c2.pos(), c3.pos(), 0.0, 0.0));
        let d2sq = d2sq.unwrap_or_else(|| self.metric.dist_sq(c1.pos(), c3.pos(), 0.0, 0.0));
        let d3sq = d3sq.unwrap_or_else(|| self.metric.dist_sq(c1.pos(), c2.pos(), 0.0, 0.0));

        // Sort the sides so d1 >= d2 >= d3, permuting the cells and the slot
        // route in lockstep so the contribution lands in the accumulator for
        // the unsorted vertex assignment.
        let r = route;
        if d1sq > d2sq {
            if d2sq > d3sq {
                self.process_triple_sorted(r, c1, c2, c3, d1sq, d2sq, d3sq);
            } else if d1sq > d3sq {
                // 132
                self.process_triple_sorted(
                    [r[1], r[0], r[4], r[5], r[2], r[3]],
                    c1,
                    c3,
                    c2,
                    d1sq,
                    d3sq,
                    d2sq,
                );
            } else {
                // 312
                self.process_triple_sorted(
                    [r[4], r[5], r[1], r[0], r[3], r[2]],
                    c3,
                    c1,
                    c2,
                    d3sq,
                    d1sq,
                    d2sq,
                );
            }
        } else if d1sq > d3sq {
            // 213
            self.process_triple_sorted(
                [r[2], r[3], r[0], r[1], r[5], r[4]],
                c2,
                c1,
                c3,
                d2sq,
                d1sq,
                d3sq,
            );
        } else if d2sq > d3sq {
            // 231
            self.process_triple_sorted(
                [r[3], r[2], r[5], r[4], r[0], r[1]],
                c2,
                c3,
                c1,
                d2sq,
                d3sq,
                d1sq,
            );
        } else {
            // 321
            self.process_triple_sorted(
                [r[5], r[4], r[3], r[2], r[1], r[0]],
                c3,
                c2,
                c1,
                d3sq,
                d2sq,
                d1sq,
            );
        }
    }

    /// The split-or-commit decision for a sorted triple (d1 >= d2 >= d3).
    #[allow(clippy::too_many_arguments)]
    fn process_triple_sorted(
        &mut self,
        route: [usize; 6],
        c1: &Cell,
        c2: &Cell,
        c3: &Cell,
        d1sq: f64,
        d2sq: f64,
        d3sq: f64,
    ) {
        debug_assert!(d1sq >= d2sq && d2sq >= d3sq);
        let s1 = c1.size();
        let s2 = c2.size();
        let s3 = c3.size();
        let p = self.p;

        let d2 = match admissible(d1sq, d2sq, d3sq, s1, s2, s3, p) {
            Some(d2) => d2,
            None => return,
        };

        // Quantities filled in along the way; if no split triggers, all of
        // them end up set.
        let mut d1 = -1.0;
        let mut d3 = -1.0;
        let mut u = -1.0;
        let mut v = -1.0;

        let mut s1ps2 = 0.0;
        let mut s1ps3 = 0.0;
        let mut d2split = false;

        // Split c3 if it is too coarse for the d2 resolution, the u
        // resolution (u moves by ~ d3 s3 / d2^2), or the v resolution (worst
        // near-equilateral change is ~ s3 / d2).
        let split3 = s3 > 0.0
            && (s3 > d2 * p.b
                || {
                    s1ps3 = s1 + s3;
                    s1ps3 > 0.0
                        && s1ps3 > d2 * p.b
                        && {
                            d2split = true;
                            s3 >= s1
                        }
                }
                || (p.bu < p.b && s3 * s3 * d3sq > sq(p.bu * d2sq))
                || (p.bv < p.b && s3 > d2 * p.bv));

        let mut split1;
        let mut split2;
        let split;

        if split3 {
            split = true;
            // Unless much smaller than c3, take c1 and c2 along.
            let threshold = SPLIT_FACTOR * s3 * s3 * d3sq;
            split1 = s1 * s1 * d2sq > threshold;
            split2 = s2 * s2 * d2sq > threshold;
        } else if s1 > 0.0 || s2 > 0.0 {
            split1 = s1 > 0.0 && (d2split || s1 * s1 > d3sq);

            split2 = s2 > 0.0
                && (s2 * s2 > d3sq
                    // d3 could grow past the largest possible d2, or d1 could
                    // shrink below the smallest possible d2.
                    || (s2 > s3 && d3sq > sq(d2 - s2 + s3))
                    || (s2 > s1 && d1sq < sq(d2 + s2 - s1)));

            split = split1
                || split2
                // u = d3/d2 moves by ~ (s1+s2 + u(s1+s3)) / d2.
                || {
                    d3 = d3sq.sqrt();
                    u = d3 / d2;
                    s1ps2 = s1 + s2;
                    sq(s1ps2 + s1ps3 * u) > d2sq * p.busq
                }
                // v = (d1-d2)/d3 moves by ~ (s1+s2)(1+v) / d3.
                || {
                    d1 = d1sq.sqrt();
                    v = (d1 - d2) / d3;
                    sq(s1ps2 * (1.0 + v)) > d3sq * p.bvsq
                };

            if split {
                // If one of c1, c2 splits, take the other along when it is
                // at least as large.
                split1 = split1 || s1 >= s2;
                split2 = split2 || s2 >= s1;
            }
        } else {
            // c1 and c2 are points and c3 needs no split; finish the shape
            // quantities for the commit below.
            split1 = false;
            split2 = false;
            split = false;
            d1 = d1sq.sqrt();
            d3 = d3sq.sqrt();
            u = d3 / d2;
            v = (d1 - d2) / d3;
        }

        if split {
            debug_assert!(!split1 || s1 > 0.0);
            debug_assert!(!split2 || s2 > 0.0);
            debug_assert!(!split3 || s3 > 0.0);

            // A side square stays valid only if neither of its endpoints'
            // cells is being replaced by a child.
            let keep_d1 = (!split2 && !split3).then_some(d1sq);
            let keep_d2 = (!split1 && !split3).then_some(d2sq);
            let keep_d3 = (!split1 && !split2).then_some(d3sq);

            let (c1v, n1) = parts(c1, split1);
            let (c2v, n2) = parts(c2, split2);
            let (c3v, n3) = parts(c3, split3);
            for &a in &c1v[..n1] {
                for &b in &c2v[..n2] {
                    for &c in &c3v[..n3] {
                        self.process_triple(route, a, b, c, keep_d1, keep_d2, keep_d3);
                    }
                }
            }
        } else {
            debug_assert!(d1 > 0.0 && d3 > 0.0 && u >= 0.0 && v >= 0.0);

            // The committed triangle itself must land inside the ranges.
            if d2 < p.minsep || d2 >= p.maxsep {
                return;
            }
            if u < p.minu || u >= p.maxu {
                return;
            }
            if v < p.minv || v >= p.maxv {
                return;
            }

            let logd2 = d2.ln();
            let mut kr = ((logd2 - p.logminsep) / p.binsize).floor() as isize;
            // Rounding can push a value on the very top edge over; pull it
            // back into the last bin.
            if kr >= p.nbins as isize {
                kr = p.nbins as isize - 1;
            }
            let mut ku = ((u - p.minu) / p.ubinsize).floor() as isize;
            if ku >= p.nubins as isize {
                ku = p.nubins as isize - 1;
            }
            let mut kv = ((v - p.minv) / p.vbinsize).floor() as isize;
            if kv >= p.nvbins as isize {
                kv = p.nvbins as isize - 1;
            }

            // Orientation signs v: counter-clockwise triangles fill the upper
            // half of the v axis, the rest mirror into the lower half.
            let mut v = v;
            if !self.metric.ccw(c1.pos(), c2.pos(), c3.pos()) {
                v = -v;
                kv = p.nvbins as isize - kv - 1;
            } else {
                kv += p.nvbins as isize;
            }

            let index = kr * p.nuv as isize + ku * p.nvbins2 as isize + kv;
            if index < 0 || index >= p.ntot as isize {
                // Extreme rounding despite the guards: drop the contribution
                // rather than corrupt a neighboring bin.
                log::debug!("bin index {} outside 0..{}; dropping triangle", index, p.ntot);
                return;
            }
            self.commit(route[0], c1, c2, c3, d1, d2, d3, logd2, u, v, index as usize);
        }
    }

    /// Update every per-bin sum at `index` for one committed triangle
    /// ensemble.
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &mut self,
        slot: usize,
        c1: &Cell,
        c2: &Cell,
        c3: &Cell,
        d1: f64,
        d2: f64,
        d3: f64,
        logd2: f64,
        u: f64,
        v: f64,
        index: usize,
    ) {
        let metric = self.metric;
        let coord = self.coord;
        let bin = &mut self.out[slot];

        bin.ntri[index] += (c1.count() * c2.count() * c3.count()) as f64;

        let www = c1.weight() * c2.weight() * c3.weight();
        bin.meand1[index] += www * d1;
        bin.meanlogd1[index] += www * d1.ln();
        bin.meand2[index] += www * d2;
        bin.meanlogd2[index] += www * logd2;
        bin.meand3[index] += www * d3;
        bin.meanlogd3[index] += www * d3.ln();
        bin.meanu[index] += www * u;
        bin.meanv[index] += www * v;
        bin.weight[index] += www;

        match &mut bin.zeta {
            Zeta::Count => {}
            Zeta::Scalar { zeta } => {
                zeta[index] += c1.wk() * c2.wk() * c3.wk();
            }
            Zeta::Spin2 {
                gam0r,
                gam0i,
                gam1r,
                gam1i,
                gam2r,
                gam2i,
                gam3r,
                gam3i,
            } => {
                let (g1, g2, g3) = project_triple(
                    &metric,
                    coord,
                    c1.pos(),
                    c2.pos(),
                    c3.pos(),
                    c1.wg(),
                    c2.wg(),
                    c3.wg(),
                );
                // g1*g2 and conj(g1)*g2 share their sub-products; all four
                // gammas come from those two and g3.
                let g1g2 = g1 * g2;
                let g1cg2 = g1.conj() * g2;
                let gam0 = g1g2 * g3;
                let gam1 = g1cg2 * g3;
                let gam2 = g1cg2.conj() * g3;
                let gam3 = g1g2 * g3.conj();
                gam0r[index] += gam0.re;
                gam0i[index] += gam0.im;
                gam1r[index] += gam1.re;
                gam1i[index] += gam1.im;
                gam2r[index] += gam2.re;
                gam2i[index] += gam2.im;
                gam3r[index] += gam3.re;
                gam3i[index] += gam3.im;
            }
        }
    }
}

/// A cell either stands alone or contributes both children.
#[inline]
fn parts(c: &Cell, split: bool) -> ([&Cell; 2], usize) {
    if split {
        let (l, r) = c.children().expect("split cell must be internal");
        ([l, r], 2)
    } else {
        ([c, c], 1)
    }
}

/// Whether any triangle contained in the three (sorted) cells could land in
/// the binned region once sizes are inflated. Returns the precomputed
/// d2 = sqrt(d2sq) when the triple survives, `None` when it provably cannot
/// contribute.
fn admissible(
    d1sq: f64,
    d2sq: f64,
    d3sq: f64,
    s1: f64,
    s2: f64,
    s3: f64,
    p: &BinParams,
) -> Option<f64> {
    // d2 cannot grow to minsep: two sides must fail even when stretched by
    // their endpoint sizes (checking d2 and d3; if those pass, d1 will not
    // be the blocker).
    if d2sq < p.minsepsq
        && s1 + s3 < p.minsep
        && s1 + s2 < p.minsep
        && (s1 + s3 == 0.0 || d2sq < sq(p.minsep - s1 - s3))
        && (s1 + s2 == 0.0 || d3sq < sq(p.minsep - s1 - s2))
    {
        return None;
    }

    // d2 cannot shrink to maxsep: check d2 and d1, shrunk by their endpoint
    // sizes.
    if d2sq >= p.maxsepsq
        && (s1 + s3 == 0.0 || d2sq >= sq(p.maxsep + s1 + s3))
        && (s2 + s3 == 0.0 || d1sq >= sq(p.maxsep + s2 + s3))
    {
        return None;
    }

    let d2 = d2sq.sqrt();

    // u cannot reach minu: the largest possible u is
    // (d3 + s1 + s2) / (d2 - s1 - s3).
    if p.minu > 0.0 && d3sq < p.minusq * d2sq && d2 > s1 + s3 {
        let reach = p.minu * (d2 - s1 - s3);
        if reach > s1 + s2 && d3sq < sq(reach - s1 - s2) {
            // d2 might not stay the middle side after sub-splits; require
            // the same failure against d1 before giving up.
            let minusq_d1sq = p.minusq * d1sq;
            if d3sq < minusq_d1sq
                && d1sq > 2.0 * sq(s2 + s3)
                && minusq_d1sq > 2.0 * d3sq + 2.0 * sq(s1 + s2 + p.minu * (s2 + s3))
            {
                return None;
            }
        }
    }

    // u cannot drop below maxu: the smallest possible u is
    // (d3 - s1 - s2) / (d2 + s1 + s3).
    if p.maxu < 1.0 && d3sq >= p.maxusq * d2sq && d3sq >= sq(p.maxu * (d2 + s1 + s3) + s1 + s2) {
        // Guard against another side becoming the smallest.
        if d2sq > sq(s1 + s3)
            && d1sq > sq(s2 + s3)
            && (s2 > s3 || d3sq <= sq(d2 - s3 + s2))
            && (s1 > s3 || d1sq >= 2.0 * d3sq + 2.0 * sq(s3 - s1))
        {
            return None;
        }
    }

    let sums = s1 + s2 + s3;

    // |v| cannot drop below maxv: d1 stays too large relative to d2 however
    // the points move inside their cells.
    if p.maxv < 1.0 && d1sq > sq((1.0 + p.maxv) * d2 + sums + p.maxv * (s1 + s2)) {
        return None;
    }

    // |v| cannot reach minv: d1 - d2 stays too small even fully stretched.
    // Tightest when d1 ~ d2, so bound (d1^2 - d2^2) / (2 d2) from above.
    if p.minv > 0.0
        && d3sq > sq(s1 + s2)
        && p.minvsq * d3sq > sq((d1sq - d2sq) / (2.0 * d2) + sums + p.minv * (s1 + s2))
    {
        return None;
    }

    // A side that is exactly zero between two leaves can never separate.
    if s2 == 0.0 && s3 == 0.0 && d1sq == 0.0 {
        return None;
    }
    if s1 == 0.0 && s3 == 0.0 && d2sq == 0.0 {
        return None;
    }
    if s1 == 0.0 && s2 == 0.0 && d3sq == 0.0 {
        return None;
    }

    Some(d2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corr::{BinConfig, BinParams};

    fn params(cfg: &BinConfig) -> BinParams {
        BinParams::new(cfg).unwrap()
    }

    #[test]
    fn admissible_accepts_in_range_points() {
        let p = params(&BinConfig {
            minsep: 0.5,
            maxsep: 2.0,
            nbins: 3,
            ..BinConfig::default()
        });
        // Sorted sides of a generic in-range triangle, all cells leaves.
        let d2 = admissible(1.0, 0.98, 0.58, 0.0, 0.0, 0.0, &p);
        assert!(d2.is_some());
        assert!((d2.unwrap() - 0.98f64.sqrt()).abs() < 1e-15);
    }

    #[test]
    fn admissible_prunes_far_triples() {
        let p = params(&BinConfig {
            minsep: 0.01,
            maxsep: 10.0,
            nbins: 5,
            ..BinConfig::default()
        });
        // All sides ~100: d2 can never shrink to maxsep.
        assert!(admissible(10_100.0, 10_000.0, 9_900.0, 1.0, 1.0, 1.0, &p).is_none());
    }

    #[test]
    fn admissible_prunes_tiny_triples() {
        let p = params(&BinConfig {
            minsep: 0.5,
            maxsep: 2.0,
            nbins: 3,
            ..BinConfig::default()
        });
        // All sides far below minsep with point cells.
        assert!(admissible(0.01, 0.009, 0.008, 0.0, 0.0, 0.0, &p).is_none());
    }

    #[test]
    fn admissible_prunes_degenerate_leaf_sides() {
        let p = params(&BinConfig::default());
        // c1 == c2 exactly, both leaves: d3 = 0 can never separate.
        assert!(admissible(0.25, 0.25, 0.0, 0.0, 0.0, 0.1, &p).is_none());
    }

    #[test]
    fn admissible_keeps_borderline_triples_with_size() {
        let p = params(&BinConfig {
            minsep: 0.5,
            maxsep: 2.0,
            nbins: 3,
            ..BinConfig::default()
        });
        // d2 slightly below minsep but the cells are large enough to reach it.
        assert!(admissible(0.26, 0.2, 0.1, 0.2, 0.2, 0.2, &p).is_some());
    }
}

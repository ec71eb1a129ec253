//! Three-point correlation accumulators and their drivers.
//!
//! A [`Corr3`] owns a flat grid of bins over (d2, u, v) triangle shape space
//! plus the per-bin running sums (weight, triangle count, mean side lengths,
//! mean shape, and the kernel-specific zeta payload). The `process_*` drivers
//! walk one, two, or three fields and accumulate every triangle ensemble the
//! binning can see, parallelized over the first field's top-level cells with
//! one zeroed duplicate per worker and a single reduction at the end.

mod walk;

use glam::DVec3;
use rayon::prelude::*;

use crate::field::{Coord, Field};
use crate::geometry::metric::{MetricHelper, MetricKind};
use crate::util::Timed;
use walk::{Walker, ROUTE_CROSS12, ROUTE_CROSS111, ROUTE_SELF};

/// Which triangle-value kernel an accumulator computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    /// Pure counts (NNN): weight and ntri carry all the information.
    Count,
    /// Scalar field (KKK): zeta accumulates (w k)1 (w k)2 (w k)3.
    Scalar,
    /// Spin-2 shear field (GGG): four complex gamma products.
    Spin2,
}

/// How separations are binned. Only logarithmic binning is supported; the
/// selector exists so the boundary contract is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinType {
    #[default]
    Log,
}

/// User-facing binning configuration.
///
/// Radial bins are log-spaced over `[minsep, maxsep)`. The shape axes are
/// linear: u = d3/d2 over `[minu, maxu)` and |v| = (d1-d2)/d3 over
/// `[minv, maxv)`, with the v axis doubled to carry orientation sign.
/// `b`, `bu`, `bv` are the cell-splitting tolerances for the three axes;
/// zero means exact (descend to single points).
#[derive(Debug, Clone, Copy)]
pub struct BinConfig {
    pub bin_type: BinType,
    pub minsep: f64,
    pub maxsep: f64,
    pub nbins: usize,
    pub minu: f64,
    pub maxu: f64,
    pub nubins: usize,
    pub minv: f64,
    pub maxv: f64,
    pub nvbins: usize,
    pub b: f64,
    pub bu: f64,
    pub bv: f64,
    pub metric: MetricKind,
    /// Box period for the periodic metric.
    pub period: Option<DVec3>,
}

impl Default for BinConfig {
    fn default() -> Self {
        Self {
            bin_type: BinType::Log,
            minsep: 0.01,
            maxsep: 1.0,
            nbins: 10,
            minu: 0.0,
            maxu: 1.0,
            nubins: 10,
            minv: 0.0,
            maxv: 1.0,
            nvbins: 10,
            b: 0.0,
            bu: 0.0,
            bv: 0.0,
            metric: MetricKind::Euclidean,
            period: None,
        }
    }
}

/// Validated binning parameters with every derived constant precomputed.
/// Immutable for the accumulator's lifetime.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BinParams {
    pub minsep: f64,
    pub maxsep: f64,
    pub nbins: usize,
    pub binsize: f64,
    pub b: f64,
    pub minu: f64,
    pub maxu: f64,
    pub nubins: usize,
    pub ubinsize: f64,
    pub bu: f64,
    pub minv: f64,
    pub maxv: f64,
    pub nvbins: usize,
    pub vbinsize: f64,
    pub bv: f64,
    pub metric: MetricKind,
    pub period: DVec3,

    pub logminsep: f64,
    pub halfminsep: f64,
    pub halfmind3: f64,
    pub minsepsq: f64,
    pub maxsepsq: f64,
    pub minusq: f64,
    pub maxusq: f64,
    pub minvsq: f64,
    #[allow(dead_code)]
    pub maxvsq: f64,
    #[allow(dead_code)]
    pub bsq: f64,
    pub busq: f64,
    pub bvsq: f64,
    #[allow(dead_code)]
    pub sqrttwobv: f64,
    pub nvbins2: usize,
    pub nuv: usize,
    pub ntot: usize,
}

impl BinParams {
    fn new(cfg: &BinConfig) -> Result<Self, CorrError> {
        let BinType::Log = cfg.bin_type;

        if !(cfg.minsep > 0.0 && cfg.maxsep > cfg.minsep) {
            return Err(CorrError::Config(format!(
                "need 0 < minsep < maxsep, got {} .. {}",
                cfg.minsep, cfg.maxsep
            )));
        }
        if cfg.nbins == 0 || cfg.nubins == 0 || cfg.nvbins == 0 {
            return Err(CorrError::Config("bin counts must be positive".into()));
        }
        if !(0.0 <= cfg.minu && cfg.minu < cfg.maxu && cfg.maxu <= 1.0) {
            return Err(CorrError::Config(format!(
                "need 0 <= minu < maxu <= 1, got {} .. {}",
                cfg.minu, cfg.maxu
            )));
        }
        if !(0.0 <= cfg.minv && cfg.minv < cfg.maxv && cfg.maxv <= 1.0) {
            return Err(CorrError::Config(format!(
                "need 0 <= minv < maxv <= 1, got {} .. {}",
                cfg.minv, cfg.maxv
            )));
        }
        if cfg.b < 0.0 || cfg.bu < 0.0 || cfg.bv < 0.0 {
            return Err(CorrError::Config("tolerances must be non-negative".into()));
        }
        let period = match (cfg.metric, cfg.period) {
            (MetricKind::Periodic, Some(p)) if p.min_element() > 0.0 => p,
            (MetricKind::Periodic, _) => {
                return Err(CorrError::Config(
                    "periodic metric requires a positive box period".into(),
                ));
            }
            (_, _) => DVec3::ZERO,
        };

        let binsize = (cfg.maxsep / cfg.minsep).ln() / cfg.nbins as f64;
        let ubinsize = (cfg.maxu - cfg.minu) / cfg.nubins as f64;
        let vbinsize = (cfg.maxv - cfg.minv) / cfg.nvbins as f64;
        let nvbins2 = cfg.nvbins * 2;
        let nuv = cfg.nubins * nvbins2;

        Ok(BinParams {
            minsep: cfg.minsep,
            maxsep: cfg.maxsep,
            nbins: cfg.nbins,
            binsize,
            b: cfg.b,
            minu: cfg.minu,
            maxu: cfg.maxu,
            nubins: cfg.nubins,
            ubinsize,
            bu: cfg.bu,
            minv: cfg.minv,
            maxv: cfg.maxv,
            nvbins: cfg.nvbins,
            vbinsize,
            bv: cfg.bv,
            metric: cfg.metric,
            period,

            logminsep: cfg.minsep.ln(),
            halfminsep: 0.5 * cfg.minsep,
            halfmind3: 0.5 * cfg.minsep * cfg.minu,
            minsepsq: cfg.minsep * cfg.minsep,
            maxsepsq: cfg.maxsep * cfg.maxsep,
            minusq: cfg.minu * cfg.minu,
            maxusq: cfg.maxu * cfg.maxu,
            minvsq: cfg.minv * cfg.minv,
            maxvsq: cfg.maxv * cfg.maxv,
            bsq: cfg.b * cfg.b,
            busq: cfg.bu * cfg.bu,
            bvsq: cfg.bv * cfg.bv,
            sqrttwobv: (2.0 * cfg.bv).sqrt(),
            nvbins2,
            nuv,
            ntot: cfg.nbins * nuv,
        })
    }
}

/// Kernel-specific per-bin output.
#[derive(Debug, Clone, PartialEq)]
pub enum Zeta {
    /// Count kernel: no payload.
    Count,
    /// Scalar kernel: one real array.
    Scalar { zeta: Vec<f64> },
    /// Spin-2 kernel: four complex gamma products as real/imag pairs.
    Spin2 {
        gam0r: Vec<f64>,
        gam0i: Vec<f64>,
        gam1r: Vec<f64>,
        gam1i: Vec<f64>,
        gam2r: Vec<f64>,
        gam2i: Vec<f64>,
        gam3r: Vec<f64>,
        gam3i: Vec<f64>,
    },
}

impl Zeta {
    fn new(kind: KernelKind, ntot: usize) -> Zeta {
        match kind {
            KernelKind::Count => Zeta::Count,
            KernelKind::Scalar => Zeta::Scalar {
                zeta: vec![0.0; ntot],
            },
            KernelKind::Spin2 => Zeta::Spin2 {
                gam0r: vec![0.0; ntot],
                gam0i: vec![0.0; ntot],
                gam1r: vec![0.0; ntot],
                gam1i: vec![0.0; ntot],
                gam2r: vec![0.0; ntot],
                gam2i: vec![0.0; ntot],
                gam3r: vec![0.0; ntot],
                gam3i: vec![0.0; ntot],
            },
        }
    }

    fn arrays(&self) -> Vec<&Vec<f64>> {
        match self {
            Zeta::Count => vec![],
            Zeta::Scalar { zeta } => vec![zeta],
            Zeta::Spin2 {
                gam0r,
                gam0i,
                gam1r,
                gam1i,
                gam2r,
                gam2i,
                gam3r,
                gam3i,
            } => vec![gam0r, gam0i, gam1r, gam1i, gam2r, gam2i, gam3r, gam3i],
        }
    }

    fn arrays_mut(&mut self) -> Vec<&mut Vec<f64>> {
        match self {
            Zeta::Count => vec![],
            Zeta::Scalar { zeta } => vec![zeta],
            Zeta::Spin2 {
                gam0r,
                gam0i,
                gam1r,
                gam1i,
                gam2r,
                gam2i,
                gam3r,
                gam3i,
            } => vec![gam0r, gam0i, gam1r, gam1i, gam2r, gam2i, gam3r, gam3i],
        }
    }
}

/// Per-bin running sums. Pure storage; all the arrays share one length.
#[derive(Debug, Clone)]
pub(crate) struct BinData {
    pub zeta: Zeta,
    pub meand1: Vec<f64>,
    pub meanlogd1: Vec<f64>,
    pub meand2: Vec<f64>,
    pub meanlogd2: Vec<f64>,
    pub meand3: Vec<f64>,
    pub meanlogd3: Vec<f64>,
    pub meanu: Vec<f64>,
    pub meanv: Vec<f64>,
    pub weight: Vec<f64>,
    pub ntri: Vec<f64>,
}

impl BinData {
    fn new(kind: KernelKind, ntot: usize) -> BinData {
        BinData {
            zeta: Zeta::new(kind, ntot),
            meand1: vec![0.0; ntot],
            meanlogd1: vec![0.0; ntot],
            meand2: vec![0.0; ntot],
            meanlogd2: vec![0.0; ntot],
            meand3: vec![0.0; ntot],
            meanlogd3: vec![0.0; ntot],
            meanu: vec![0.0; ntot],
            meanv: vec![0.0; ntot],
            weight: vec![0.0; ntot],
            ntri: vec![0.0; ntot],
        }
    }

    fn clear(&mut self) {
        for a in self.zeta.arrays_mut() {
            a.fill(0.0);
        }
        for a in self.sums_mut() {
            a.fill(0.0);
        }
    }

    /// Fresh zeroed storage with the same shape.
    fn duplicate(&self) -> BinData {
        let mut dup = self.clone();
        dup.clear();
        dup
    }

    fn add(&mut self, other: &BinData) {
        assert_eq!(
            self.weight.len(),
            other.weight.len(),
            "bin grids disagree in size"
        );
        for (a, b) in self.zeta.arrays_mut().into_iter().zip(other.zeta.arrays()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += *y;
            }
        }
        for (a, b) in self.sums_mut().into_iter().zip(other.sums()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += *y;
            }
        }
    }

    fn sums(&self) -> [&Vec<f64>; 10] {
        [
            &self.meand1,
            &self.meanlogd1,
            &self.meand2,
            &self.meanlogd2,
            &self.meand3,
            &self.meanlogd3,
            &self.meanu,
            &self.meanv,
            &self.weight,
            &self.ntri,
        ]
    }

    fn sums_mut(&mut self) -> [&mut Vec<f64>; 10] {
        [
            &mut self.meand1,
            &mut self.meanlogd1,
            &mut self.meand2,
            &mut self.meanlogd2,
            &mut self.meand3,
            &mut self.meanlogd3,
            &mut self.meanu,
            &mut self.meanv,
            &mut self.weight,
            &mut self.ntri,
        ]
    }
}

/// Errors reported at the driver boundary. Everything here is a programmer
/// contract violation; nothing is recoverable mid-accumulation.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrError {
    /// Invalid binning configuration.
    Config(String),
    /// A field's coordinate kind conflicts with what this accumulator has
    /// already processed.
    CoordMismatch(Coord, Coord),
    /// A field's kernel payload does not match the accumulator's kernel.
    KernelMismatch(KernelKind, KernelKind),
    /// Sibling accumulators disagree in bin-grid size or kernel.
    ShapeMismatch(usize, usize),
    /// The metric cannot measure this coordinate kind (e.g. Arc on flat data).
    MetricCoord(MetricKind, Coord),
    /// A field with no top-level cells.
    EmptyField,
}

impl std::fmt::Display for CorrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrError::Config(msg) => write!(f, "invalid binning config: {}", msg),
            CorrError::CoordMismatch(a, b) => {
                write!(f, "coordinate kind conflict: accumulator has {:?}, field is {:?}", a, b)
            }
            CorrError::KernelMismatch(a, b) => {
                write!(f, "kernel mismatch: accumulator is {:?}, field is {:?}", a, b)
            }
            CorrError::ShapeMismatch(a, b) => {
                write!(f, "accumulators disagree in bin count: {} vs {}", a, b)
            }
            CorrError::MetricCoord(m, c) => {
                write!(f, "metric {:?} cannot measure {:?} coordinates", m, c)
            }
            CorrError::EmptyField => write!(f, "field has no top-level cells"),
        }
    }
}

impl std::error::Error for CorrError {}

/// A three-point correlation accumulator.
#[derive(Debug, Clone)]
pub struct Corr3 {
    params: BinParams,
    kind: KernelKind,
    coord: Option<Coord>,
    data: BinData,
}

impl Corr3 {
    /// Create a zeroed accumulator for the given kernel and binning.
    pub fn new(kind: KernelKind, config: &BinConfig) -> Result<Corr3, CorrError> {
        let params = BinParams::new(config)?;
        let data = BinData::new(kind, params.ntot);
        Ok(Corr3 {
            params,
            kind,
            coord: None,
            data,
        })
    }

    /// Zero every bin and forget the coordinate tag.
    pub fn clear(&mut self) {
        self.data.clear();
        self.coord = None;
    }

    /// A new accumulator with identical parameters and zeroed bins.
    pub fn duplicate(&self) -> Corr3 {
        Corr3 {
            params: self.params,
            kind: self.kind,
            coord: None,
            data: self.data.duplicate(),
        }
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    /// Coordinate kind this accumulator is bound to, once it has processed
    /// a field.
    pub fn coord(&self) -> Option<Coord> {
        self.coord
    }

    /// Total number of bins: nbins * nubins * 2 * nvbins.
    pub fn ntot(&self) -> usize {
        self.params.ntot
    }

    /// Flat bin index for (kr, ku, kv); kv already includes the sign half.
    pub fn bin_index(&self, kr: usize, ku: usize, kv: usize) -> usize {
        kr * self.params.nuv + ku * self.params.nvbins2 + kv
    }

    pub fn weight(&self) -> &[f64] {
        &self.data.weight
    }

    pub fn ntri(&self) -> &[f64] {
        &self.data.ntri
    }

    pub fn meand1(&self) -> &[f64] {
        &self.data.meand1
    }

    pub fn meanlogd1(&self) -> &[f64] {
        &self.data.meanlogd1
    }

    pub fn meand2(&self) -> &[f64] {
        &self.data.meand2
    }

    pub fn meanlogd2(&self) -> &[f64] {
        &self.data.meanlogd2
    }

    pub fn meand3(&self) -> &[f64] {
        &self.data.meand3
    }

    pub fn meanlogd3(&self) -> &[f64] {
        &self.data.meanlogd3
    }

    pub fn meanu(&self) -> &[f64] {
        &self.data.meanu
    }

    pub fn meanv(&self) -> &[f64] {
        &self.data.meanv
    }

    pub fn zeta(&self) -> &Zeta {
        &self.data.zeta
    }

    /// Accumulate triangles with all three vertices drawn from one field.
    pub fn process_auto(&mut self, field: &Field, dots: bool) -> Result<(), CorrError> {
        self.bind_field(field)?;
        let _t = Timed::debug("process_auto");

        let params = self.params;
        let coord = field.coord();
        let metric = MetricHelper::new(params.metric, params.period);
        let tops = field.top_cells();
        let n1 = tops.len();
        log::debug!("auto: {} top-level cells", n1);

        let template = self.data.duplicate();
        let reduced = (0..n1)
            .into_par_iter()
            .fold(
                || template.duplicate(),
                |mut acc, i| {
                    if dots {
                        progress_dot();
                    }
                    {
                        let mut walker =
                            Walker::new(&params, metric, coord, std::slice::from_mut(&mut acc));
                        let c1 = &tops[i];
                        walker.process_within(c1);
                        for j in (i + 1)..n1 {
                            let c2 = &tops[j];
                            walker.process_pair(c1, c2, ROUTE_SELF);
                            walker.process_pair(c2, c1, ROUTE_SELF);
                            for c3 in &tops[(j + 1)..] {
                                walker.process_triple(ROUTE_SELF, c1, c2, c3, None, None, None);
                            }
                        }
                    }
                    acc
                },
            )
            .reduce(
                || template.duplicate(),
                |mut a, b| {
                    a.add(&b);
                    a
                },
            );
        self.data.add(&reduced);

        if dots {
            finish_dots();
        }
        Ok(())
    }

    /// Accumulate triangles with one vertex in `field1` and two in `field2`.
    ///
    /// `self` receives the 1-2-2 slot; `corr212` and `corr221` receive the
    /// permutations where the `field1` point lands in the middle or last
    /// sorted-side position.
    pub fn process_cross12(
        &mut self,
        corr212: &mut Corr3,
        corr221: &mut Corr3,
        field1: &Field,
        field2: &Field,
        dots: bool,
    ) -> Result<(), CorrError> {
        self.bind_field(field1)?;
        self.check_second_field(field1, field2)?;
        self.check_sibling(corr212)?;
        self.check_sibling(corr221)?;
        let _t = Timed::debug("process_cross12");

        let params = self.params;
        let coord = field1.coord();
        let metric = MetricHelper::new(params.metric, params.period);
        let t1 = field1.top_cells();
        let t2 = field2.top_cells();
        log::debug!("cross12: {} x {} top-level cells", t1.len(), t2.len());

        let template = self.data.duplicate();
        let reduced = (0..t1.len())
            .into_par_iter()
            .fold(
                || duplicate_set(&template, 3),
                |mut accs, i| {
                    if dots {
                        progress_dot();
                    }
                    {
                        let mut walker = Walker::new(&params, metric, coord, &mut accs);
                        let c1 = &t1[i];
                        for j in 0..t2.len() {
                            let c2 = &t2[j];
                            walker.process_pair(c1, c2, ROUTE_CROSS12);
                            for c3 in &t2[(j + 1)..] {
                                walker.process_triple(ROUTE_CROSS12, c1, c2, c3, None, None, None);
                            }
                        }
                    }
                    accs
                },
            )
            .reduce(|| duplicate_set(&template, 3), merge_sets);

        self.data.add(&reduced[0]);
        corr212.data.add(&reduced[1]);
        corr221.data.add(&reduced[2]);

        if dots {
            finish_dots();
        }
        Ok(())
    }

    /// Accumulate triangles with one vertex in each of three fields.
    ///
    /// `self` receives the 1-2-3 slot; the five siblings receive the other
    /// permutations of which field's point fills each sorted-side position.
    #[allow(clippy::too_many_arguments)]
    pub fn process_cross(
        &mut self,
        corr132: &mut Corr3,
        corr213: &mut Corr3,
        corr231: &mut Corr3,
        corr312: &mut Corr3,
        corr321: &mut Corr3,
        field1: &Field,
        field2: &Field,
        field3: &Field,
        dots: bool,
    ) -> Result<(), CorrError> {
        self.bind_field(field1)?;
        self.check_second_field(field1, field2)?;
        self.check_second_field(field1, field3)?;
        for sibling in [&*corr132, &*corr213, &*corr231, &*corr312, &*corr321] {
            self.check_sibling(sibling)?;
        }
        let _t = Timed::debug("process_cross");

        let params = self.params;
        let coord = field1.coord();
        let metric = MetricHelper::new(params.metric, params.period);
        let t1 = field1.top_cells();
        let t2 = field2.top_cells();
        let t3 = field3.top_cells();
        log::debug!(
            "cross: {} x {} x {} top-level cells",
            t1.len(),
            t2.len(),
            t3.len()
        );

        let template = self.data.duplicate();
        let reduced = (0..t1.len())
            .into_par_iter()
            .fold(
                || duplicate_set(&template, 6),
                |mut accs, i| {
                    if dots {
                        progress_dot();
                    }
                    {
                        let mut walker = Walker::new(&params, metric, coord, &mut accs);
                        let c1 = &t1[i];
                        for c2 in t2 {
                            for c3 in t3 {
                                walker.process_triple(ROUTE_CROSS111, c1, c2, c3, None, None, None);
                            }
                        }
                    }
                    accs
                },
            )
            .reduce(|| duplicate_set(&template, 6), merge_sets);

        self.data.add(&reduced[0]);
        corr132.data.add(&reduced[1]);
        corr213.data.add(&reduced[2]);
        corr231.data.add(&reduced[3]);
        corr312.data.add(&reduced[4]);
        corr321.data.add(&reduced[5]);

        if dots {
            finish_dots();
        }
        Ok(())
    }

    /// Stamp the coordinate tag and validate the field against this
    /// accumulator's kernel and metric.
    fn bind_field(&mut self, field: &Field) -> Result<(), CorrError> {
        if field.top_cells().is_empty() {
            return Err(CorrError::EmptyField);
        }
        if field.kind() != self.kind {
            return Err(CorrError::KernelMismatch(self.kind, field.kind()));
        }
        let coord = field.coord();
        let metric_ok = match self.params.metric {
            MetricKind::Euclidean => true,
            MetricKind::Arc => coord == Coord::Sphere,
            MetricKind::Periodic => coord != Coord::Sphere,
        };
        if !metric_ok {
            return Err(CorrError::MetricCoord(self.params.metric, coord));
        }
        match self.coord {
            Some(tag) if tag != coord => Err(CorrError::CoordMismatch(tag, coord)),
            _ => {
                self.coord = Some(coord);
                Ok(())
            }
        }
    }

    fn check_second_field(&self, first: &Field, other: &Field) -> Result<(), CorrError> {
        if other.top_cells().is_empty() {
            return Err(CorrError::EmptyField);
        }
        if other.kind() != self.kind {
            return Err(CorrError::KernelMismatch(self.kind, other.kind()));
        }
        if other.coord() != first.coord() {
            return Err(CorrError::CoordMismatch(first.coord(), other.coord()));
        }
        Ok(())
    }

    fn check_sibling(&self, other: &Corr3) -> Result<(), CorrError> {
        if other.params.ntot != self.params.ntot {
            return Err(CorrError::ShapeMismatch(self.params.ntot, other.params.ntot));
        }
        if other.kind != self.kind {
            return Err(CorrError::KernelMismatch(self.kind, other.kind));
        }
        Ok(())
    }
}

impl std::ops::AddAssign<&Corr3> for Corr3 {
    /// Element-wise accumulation. Panics if the bin grids disagree.
    fn add_assign(&mut self, other: &Corr3) {
        assert_eq!(
            self.params.ntot, other.params.ntot,
            "bin grids disagree in size"
        );
        assert_eq!(self.kind, other.kind, "kernels disagree");
        self.data.add(&other.data);
    }
}

fn duplicate_set(template: &BinData, n: usize) -> Vec<BinData> {
    (0..n).map(|_| template.duplicate()).collect()
}

fn merge_sets(mut a: Vec<BinData>, b: Vec<BinData>) -> Vec<BinData> {
    for (x, y) in a.iter_mut().zip(b.iter()) {
        x.add(y);
    }
    a
}

/// One character per outer-loop iteration, serialized by the stdout lock so
/// worker output never interleaves mid-byte.
fn progress_dot() {
    use std::io::Write;
    let mut out = std::io::stdout().lock();
    let _ = write!(out, ".");
    let _ = out.flush();
}

fn finish_dots() {
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_constants() {
        let cfg = BinConfig {
            minsep: 1.0,
            maxsep: std::f64::consts::E,
            nbins: 1,
            nubins: 5,
            nvbins: 4,
            ..BinConfig::default()
        };
        let p = BinParams::new(&cfg).unwrap();
        assert!((p.binsize - 1.0).abs() < 1e-15);
        assert_eq!(p.logminsep, 0.0);
        assert_eq!(p.halfminsep, 0.5);
        assert_eq!(p.nvbins2, 8);
        assert_eq!(p.nuv, 40);
        assert_eq!(p.ntot, 40);
        assert!((p.ubinsize - 0.2).abs() < 1e-15);
        assert!((p.vbinsize - 0.25).abs() < 1e-15);
    }

    #[test]
    fn config_validation() {
        let bad_sep = BinConfig {
            minsep: 2.0,
            maxsep: 1.0,
            ..BinConfig::default()
        };
        assert!(matches!(
            Corr3::new(KernelKind::Count, &bad_sep),
            Err(CorrError::Config(_))
        ));

        let bad_u = BinConfig {
            minu: 0.5,
            maxu: 0.5,
            ..BinConfig::default()
        };
        assert!(Corr3::new(KernelKind::Count, &bad_u).is_err());

        let no_box = BinConfig {
            metric: MetricKind::Periodic,
            period: None,
            ..BinConfig::default()
        };
        assert!(Corr3::new(KernelKind::Count, &no_box).is_err());
    }

    #[test]
    fn duplicate_is_zeroed_and_untagged() {
        let corr = Corr3::new(KernelKind::Scalar, &BinConfig::default()).unwrap();
        let dup = corr.duplicate();
        assert_eq!(dup.ntot(), corr.ntot());
        assert_eq!(dup.coord(), None);
        assert!(dup.weight().iter().all(|&w| w == 0.0));
        match dup.zeta() {
            Zeta::Scalar { zeta } => assert!(zeta.iter().all(|&z| z == 0.0)),
            _ => panic!("wrong zeta payload"),
        }
    }

    #[test]
    #[should_panic(expected = "bin grids disagree")]
    fn merge_rejects_shape_mismatch() {
        let mut a = Corr3::new(KernelKind::Count, &BinConfig::default()).unwrap();
        let b = Corr3::new(
            KernelKind::Count,
            &BinConfig {
                nbins: 3,
                ..BinConfig::default()
            },
        )
        .unwrap();
        a += &b;
    }
}

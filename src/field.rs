//! Weighted point fields arranged as balanced ball trees.
//!
//! A `Field` owns a forest of `Cell` trees built by recursive median splits
//! along the coordinate of largest spread. Every cell stores its weighted
//! centroid, a bounding size (the maximum metric distance from the centroid
//! to any member point), the total weight and point count, and the summed
//! kernel payload of its members. The correlation traversal only ever reads
//! cells; it never mutates a field.

use glam::DVec3;
use num_complex::Complex64;

use crate::corr::KernelKind;

/// The coordinate system a field's positions live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coord {
    /// Planar data in the xy plane (z = 0).
    Flat,
    /// Unit vectors on the sphere; sizes and Arc distances are angles.
    Sphere,
    /// Unconstrained 3-D positions.
    ThreeD,
}

/// Kernel payload carried by a cell: nothing, a summed w*k, or a summed w*g.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    Count,
    Scalar(f64),
    Spin2(Complex64),
}

impl CellValue {
    fn add(self, other: CellValue) -> CellValue {
        match (self, other) {
            (CellValue::Count, CellValue::Count) => CellValue::Count,
            (CellValue::Scalar(a), CellValue::Scalar(b)) => CellValue::Scalar(a + b),
            (CellValue::Spin2(a), CellValue::Spin2(b)) => CellValue::Spin2(a + b),
            _ => unreachable!("mixed kernel payloads in one field"),
        }
    }

    fn kind(&self) -> KernelKind {
        match self {
            CellValue::Count => KernelKind::Count,
            CellValue::Scalar(_) => KernelKind::Scalar,
            CellValue::Spin2(_) => KernelKind::Spin2,
        }
    }
}

/// A node of the ball tree. Leaves hold a single point, or several points at
/// exactly the same position (size 0).
#[derive(Debug, Clone)]
pub struct Cell {
    pos: DVec3,
    size: f64,
    weight: f64,
    count: u64,
    value: CellValue,
    children: Option<Box<(Cell, Cell)>>,
}

impl Cell {
    #[inline]
    pub fn pos(&self) -> DVec3 {
        self.pos
    }

    #[inline]
    pub fn size(&self) -> f64 {
        self.size
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn value(&self) -> CellValue {
        self.value
    }

    #[inline]
    pub fn children(&self) -> Option<(&Cell, &Cell)> {
        self.children.as_deref().map(|c| (&c.0, &c.1))
    }

    /// Summed w*k payload. Panics if this is not a scalar-kernel cell.
    #[inline]
    pub fn wk(&self) -> f64 {
        match self.value {
            CellValue::Scalar(wk) => wk,
            _ => panic!("cell carries no scalar payload"),
        }
    }

    /// Summed w*g payload. Panics if this is not a spin-2-kernel cell.
    #[inline]
    pub fn wg(&self) -> Complex64 {
        match self.value {
            CellValue::Spin2(wg) => wg,
            _ => panic!("cell carries no spin-2 payload"),
        }
    }
}

/// Errors from field construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Points, weights, and values arrays disagree in length.
    LengthMismatch(usize, usize),
    /// A weight was negative.
    NegativeWeight(usize),
    /// A spherical position had zero length and cannot be normalized.
    BadPosition(usize),
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldError::LengthMismatch(a, b) => {
                write!(f, "input arrays disagree in length: {} vs {}", a, b)
            }
            FieldError::NegativeWeight(i) => write!(f, "negative weight at index {}", i),
            FieldError::BadPosition(i) => {
                write!(f, "zero-length spherical position at index {}", i)
            }
        }
    }
}

impl std::error::Error for FieldError {}

/// Construction knobs for a field.
#[derive(Debug, Clone, Copy)]
pub struct FieldConfig {
    /// The forest is split to this depth before tree construction, yielding
    /// up to 2^top_depth top-level cells for the parallel driver.
    pub top_depth: usize,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self { top_depth: 4 }
    }
}

/// A forest of cell trees over one input catalog.
#[derive(Debug)]
pub struct Field {
    coord: Coord,
    kind: KernelKind,
    top: Vec<Cell>,
    num_points: usize,
}

struct BuildPoint {
    pos: DVec3,
    w: f64,
    value: CellValue,
}

impl Field {
    /// Build a count-kernel field. `weights` defaults to all ones.
    pub fn counts(
        points: &[DVec3],
        weights: Option<&[f64]>,
        coord: Coord,
    ) -> Result<Field, FieldError> {
        Self::counts_with(points, weights, coord, FieldConfig::default())
    }

    /// Build a count-kernel field with explicit construction knobs.
    pub fn counts_with(
        points: &[DVec3],
        weights: Option<&[f64]>,
        coord: Coord,
        config: FieldConfig,
    ) -> Result<Field, FieldError> {
        Self::build(points, weights, |_| CellValue::Count, coord, config)
    }

    /// Build a scalar-kernel field; each point carries w*k.
    pub fn scalars(
        points: &[DVec3],
        weights: Option<&[f64]>,
        values: &[f64],
        coord: Coord,
    ) -> Result<Field, FieldError> {
        if values.len() != points.len() {
            return Err(FieldError::LengthMismatch(points.len(), values.len()));
        }
        Self::build(
            points,
            weights,
            |i| CellValue::Scalar(values[i]),
            coord,
            FieldConfig::default(),
        )
    }

    /// Build a spin-2-kernel field; each point carries w*g.
    pub fn shears(
        points: &[DVec3],
        weights: Option<&[f64]>,
        values: &[Complex64],
        coord: Coord,
    ) -> Result<Field, FieldError> {
        if values.len() != points.len() {
            return Err(FieldError::LengthMismatch(points.len(), values.len()));
        }
        Self::build(
            points,
            weights,
            |i| CellValue::Spin2(values[i]),
            coord,
            FieldConfig::default(),
        )
    }

    fn build(
        points: &[DVec3],
        weights: Option<&[f64]>,
        value_of: impl Fn(usize) -> CellValue,
        coord: Coord,
        config: FieldConfig,
    ) -> Result<Field, FieldError> {
        if let Some(w) = weights {
            if w.len() != points.len() {
                return Err(FieldError::LengthMismatch(points.len(), w.len()));
            }
            if let Some(i) = w.iter().position(|&wi| wi < 0.0) {
                return Err(FieldError::NegativeWeight(i));
            }
        }

        let mut items: Vec<BuildPoint> = Vec::with_capacity(points.len());
        for (i, &p) in points.iter().enumerate() {
            let pos = if coord == Coord::Sphere {
                let len = p.length();
                if len == 0.0 {
                    return Err(FieldError::BadPosition(i));
                }
                p / len
            } else {
                p
            };
            let w = weights.map_or(1.0, |w| w[i]);
            // Payload entries scale with the point weight.
            let value = match value_of(i) {
                CellValue::Count => CellValue::Count,
                CellValue::Scalar(k) => CellValue::Scalar(w * k),
                CellValue::Spin2(g) => CellValue::Spin2(w * g),
            };
            items.push(BuildPoint { pos, w, value });
        }

        let kind = items
            .first()
            .map_or(KernelKind::Count, |it| it.value.kind());

        let mut top = Vec::new();
        build_forest(&mut items, coord, config.top_depth, &mut top);

        Ok(Field {
            coord,
            kind,
            top,
            num_points: points.len(),
        })
    }

    #[inline]
    pub fn coord(&self) -> Coord {
        self.coord
    }

    #[inline]
    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    /// The top-level cells the drivers iterate over.
    #[inline]
    pub fn top_cells(&self) -> &[Cell] {
        &self.top
    }

    #[inline]
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn total_weight(&self) -> f64 {
        self.top.iter().map(|c| c.weight).sum()
    }
}

/// Partition the catalog `depth` more times, then build a tree per slice.
fn build_forest(items: &mut [BuildPoint], coord: Coord, depth: usize, out: &mut Vec<Cell>) {
    if items.is_empty() {
        return;
    }
    if depth == 0 || items.len() == 1 || widest_axis(items).1 == 0.0 {
        out.push(build_cell(items, coord));
        return;
    }
    let mid = split_at_median(items);
    let (left, right) = items.split_at_mut(mid);
    build_forest(left, coord, depth - 1, out);
    build_forest(right, coord, depth - 1, out);
}

fn build_cell(items: &mut [BuildPoint], coord: Coord) -> Cell {
    debug_assert!(!items.is_empty());

    let count = items.len() as u64;
    let weight: f64 = items.iter().map(|it| it.w).sum();
    let value = items
        .iter()
        .map(|it| it.value)
        .reduce(CellValue::add)
        .unwrap();

    // Weighted centroid; fall back to the plain mean if every weight is
    // zero. A single point is its own center, exactly.
    let pos = if items.len() == 1 {
        items[0].pos
    } else {
        let mut pos = if weight > 0.0 {
            items.iter().map(|it| it.w * it.pos).sum::<DVec3>() / weight
        } else {
            items.iter().map(|it| it.pos).sum::<DVec3>() / count as f64
        };
        if coord == Coord::Sphere {
            // Keep spherical centers on the sphere; coincident antipodes
            // could cancel exactly, in which case any member position serves.
            let len = pos.length();
            pos = if len > 0.0 { pos / len } else { items[0].pos };
        }
        pos
    };

    let size = items
        .iter()
        .map(|it| point_dist(coord, pos, it.pos))
        .fold(0.0, f64::max);

    let children = if items.len() > 1 && size > 0.0 {
        let mid = split_at_median(items);
        let (left, right) = items.split_at_mut(mid);
        Some(Box::new((build_cell(left, coord), build_cell(right, coord))))
    } else {
        None
    };

    Cell {
        pos,
        size,
        weight,
        count,
        value,
        children,
    }
}

/// Distance from a cell center to a member point, in the same space the
/// metric will measure cell separations in.
#[inline]
fn point_dist(coord: Coord, center: DVec3, p: DVec3) -> f64 {
    match coord {
        Coord::Sphere => center.dot(p).clamp(-1.0, 1.0).acos(),
        Coord::Flat | Coord::ThreeD => center.distance(p),
    }
}

/// Reorder `items` so the lower half along the widest axis comes first;
/// returns the split index (always in 1..len).
fn split_at_median(items: &mut [BuildPoint]) -> usize {
    let (axis, _) = widest_axis(items);
    let mid = items.len() / 2;
    items.select_nth_unstable_by(mid, |a, b| {
        axis_value(a.pos, axis)
            .partial_cmp(&axis_value(b.pos, axis))
            .unwrap()
    });
    mid
}

#[inline]
fn axis_value(p: DVec3, axis: usize) -> f64 {
    match axis {
        0 => p.x,
        1 => p.y,
        _ => p.z,
    }
}

fn widest_axis(items: &[BuildPoint]) -> (usize, f64) {
    let mut lo = DVec3::splat(f64::INFINITY);
    let mut hi = DVec3::splat(f64::NEG_INFINITY);
    for it in items {
        lo = lo.min(it.pos);
        hi = hi.max(it.pos);
    }
    let spread = hi - lo;
    let mut axis = 0;
    let mut best = spread.x;
    if spread.y > best {
        axis = 1;
        best = spread.y;
    }
    if spread.z > best {
        axis = 2;
        best = spread.z;
    }
    (axis, best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn collect_leaves<'a>(cell: &'a Cell, out: &mut Vec<&'a Cell>) {
        match cell.children() {
            Some((l, r)) => {
                collect_leaves(l, out);
                collect_leaves(r, out);
            }
            None => out.push(cell),
        }
    }

    fn check_cell(cell: &Cell, coord: Coord) {
        // Every member point lies within `size` of the cell center; with the
        // tree split down to singletons the leaves are the points.
        let mut leaves = Vec::new();
        collect_leaves(cell, &mut leaves);
        for leaf in &leaves {
            let d = point_dist(coord, cell.pos(), leaf.pos());
            assert!(d <= cell.size() + 1e-9, "point escapes bounding size");
        }

        if let Some((l, r)) = cell.children() {
            assert!(
                (cell.weight() - l.weight() - r.weight()).abs() < 1e-12,
                "internal weight must equal the sum of its children"
            );
            assert_eq!(cell.count(), l.count() + r.count());
            check_cell(l, coord);
            check_cell(r, coord);
        } else {
            assert!(cell.size() == 0.0 || cell.count() == 1);
        }
    }

    #[test]
    fn flat_tree_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let points = crate::geometry::random_square_points_with_rng(100, &mut rng);
        let field = Field::counts(&points, None, Coord::Flat).unwrap();

        let total: u64 = field.top_cells().iter().map(|c| c.count()).sum();
        assert_eq!(total, 100);
        assert!((field.total_weight() - 100.0).abs() < 1e-12);
        for cell in field.top_cells() {
            check_cell(cell, Coord::Flat);
        }
    }

    #[test]
    fn sphere_tree_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(43);
        let points = crate::geometry::random_sphere_points_with_rng(80, &mut rng);
        let field = Field::counts(&points, None, Coord::Sphere).unwrap();

        for cell in field.top_cells() {
            check_cell(cell, Coord::Sphere);
            assert!((cell.pos().length() - 1.0).abs() < 1e-12);
            assert!(cell.size() <= std::f64::consts::PI);
        }
    }

    #[test]
    fn scalar_payload_sums() {
        let points = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        ];
        let weights = [2.0, 1.0, 1.0];
        let kappa = [0.5, -1.0, 3.0];
        let field = Field::scalars(&points, Some(&weights), &kappa, Coord::Flat).unwrap();

        let total_wk: f64 = field.top_cells().iter().map(|c| c.wk()).sum();
        assert!((total_wk - (2.0 * 0.5 - 1.0 + 3.0)).abs() < 1e-12);
        assert_eq!(field.kind(), KernelKind::Scalar);
    }

    #[test]
    fn coincident_points_form_a_zero_size_leaf() {
        let p = DVec3::new(0.25, 0.75, 0.0);
        let points = vec![p, p, p];
        let field = Field::counts(&points, None, Coord::Flat).unwrap();
        assert_eq!(field.top_cells().len(), 1);
        let cell = &field.top_cells()[0];
        assert_eq!(cell.size(), 0.0);
        assert_eq!(cell.count(), 3);
        assert!(cell.children().is_none());
    }

    #[test]
    fn top_depth_controls_the_forest() {
        let mut rng = ChaCha8Rng::seed_from_u64(44);
        let points = crate::geometry::random_square_points_with_rng(40, &mut rng);

        let single = Field::counts_with(
            &points,
            None,
            Coord::Flat,
            FieldConfig { top_depth: 0 },
        )
        .unwrap();
        assert_eq!(single.top_cells().len(), 1);

        let forest = Field::counts_with(
            &points,
            None,
            Coord::Flat,
            FieldConfig { top_depth: 3 },
        )
        .unwrap();
        assert_eq!(forest.top_cells().len(), 8);
        let total: u64 = forest.top_cells().iter().map(|c| c.count()).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let points = vec![DVec3::ZERO, DVec3::X];
        let err = Field::scalars(&points, None, &[1.0], Coord::Flat).unwrap_err();
        assert_eq!(err, FieldError::LengthMismatch(2, 1));
    }
}

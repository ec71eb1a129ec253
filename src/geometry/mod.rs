//! Geometric primitives: metrics, spin-2 projection, point sampling.

pub mod metric;
pub mod project;

use glam::DVec3;
use rand::Rng;

/// Generate `n` uniformly distributed random points on the unit sphere.
pub fn random_sphere_points_with_rng<R: Rng>(n: usize, rng: &mut R) -> Vec<DVec3> {
    (0..n)
        .map(|_| {
            // Uniform z in [-1, 1] plus uniform azimuth gives uniform area.
            let z: f64 = rng.gen_range(-1.0..1.0);
            let theta: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
            let r = (1.0 - z * z).sqrt();
            DVec3::new(r * theta.cos(), r * theta.sin(), z)
        })
        .collect()
}

/// Generate `n` uniformly distributed random points in the unit square (z = 0).
pub fn random_square_points_with_rng<R: Rng>(n: usize, rng: &mut R) -> Vec<DVec3> {
    (0..n)
        .map(|_| {
            let x: f64 = rng.gen_range(0.0..1.0);
            let y: f64 = rng.gen_range(0.0..1.0);
            DVec3::new(x, y, 0.0)
        })
        .collect()
}

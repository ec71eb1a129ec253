//! Three-point correlation functions over spatial trees.
//!
//! Given one, two, or three fields of weighted points, this crate accumulates
//! statistics over every triangle formed by point triples, binned by triangle
//! scale and shape (d2, u = d3/d2, v = (d1-d2)/d3 with sides sorted so that
//! d1 >= d2 >= d3). Rather than enumerating all O(N^3) triangles it recurses
//! over ball-tree nodes, pruning whole node triples that cannot reach any bin
//! and descending only while node sizes matter at the requested tolerances.
//!
//! # Example
//!
//! ```
//! use tricorr::{BinConfig, Corr3, Field, KernelKind};
//! use glam::DVec3;
//!
//! let points = vec![
//!     DVec3::new(0.0, 0.0, 0.0),
//!     DVec3::new(1.0, 0.0, 0.0),
//!     DVec3::new(0.3, 0.7, 0.0),
//! ];
//! let field = Field::counts(&points, None, tricorr::Coord::Flat).unwrap();
//!
//! let config = BinConfig {
//!     minsep: 0.5,
//!     maxsep: 2.0,
//!     nbins: 3,
//!     ..BinConfig::default()
//! };
//! let mut corr = Corr3::new(KernelKind::Count, &config).unwrap();
//! corr.process_auto(&field, false).unwrap();
//! assert_eq!(corr.ntri().iter().sum::<f64>(), 1.0);
//! ```

pub mod corr;
pub mod field;
pub mod geometry;

mod util;

pub use corr::{BinConfig, BinType, Corr3, CorrError, KernelKind, Zeta};
pub use field::{Cell, CellValue, Coord, Field, FieldError};
pub use geometry::metric::MetricKind;

//! Source geometry handling
//!
//! - `buffer` - Fixed and per-feature buffer distances
//! - `crs` - EPSG helpers and metric CRS resolution
//! - `prepared` - Backend-scoped geometry references
//! - `preparer` - Preparation per provider kind, with embedded SQL fallback
//! - `selection` - In-memory select-by-location

pub mod buffer;
pub mod crs;
pub mod prepared;
pub mod preparer;
pub mod selection;

pub use buffer::{BufferExpr, BufferSpec};
pub use prepared::{GeometryReference, Prepared, PreparedGeometry, ShapeClass};
pub use preparer::{PrepareRequest, SourceSelection, prepare};
pub use selection::select_by_location;

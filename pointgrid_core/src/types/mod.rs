//! Contains types like rectangles, layer bounds, tile extents and columnar point batches.

mod bounds;
pub use bounds::*;

mod extents;
pub use extents::*;

mod geo_rect;
pub use geo_rect::*;

mod grouped;
pub use grouped::*;

mod mbr;
pub use mbr::*;

mod point_batch;
pub use point_batch::*;

//! Placements, SBP descriptors and the slice views they imply.

mod placement;
mod sbp;
mod view;

pub use placement::*;
pub use sbp::*;
pub use view::*;

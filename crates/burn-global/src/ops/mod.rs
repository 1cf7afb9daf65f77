//! Distribution-aware operators.

mod creation;
mod elementwise;

pub use creation::*;
pub use elementwise::*;

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Burn global tensors.
//!
//! A global tensor is a logical tensor spread over the ranks of a
//! [`Placement`](sharding::Placement) following an [`NdSbp`](sharding::NdSbp)
//! descriptor: each grid dimension either splits an axis, broadcasts the whole
//! tensor, or holds partial sums. Each rank only stores its local component.

extern crate alloc;

mod config;
mod context;
mod error;
mod tensor;

pub mod boxing;
pub mod comm;
pub mod data;
pub mod ops;
pub mod random;
pub mod sharding;

pub use boxing::{GlobalTarget, IntoGlobal};
pub use config::*;
pub use context::*;
pub use error::*;
pub use tensor::*;

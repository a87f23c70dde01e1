#![doc = include_str!("../README.md")]

mod coord;
mod error;
mod geometry;
mod invocation;
mod plan;
mod range;

pub use crate::coord::*;
pub use crate::error::*;
pub use crate::geometry::*;
pub use crate::invocation::*;
pub use crate::plan::*;
pub use crate::range::*;

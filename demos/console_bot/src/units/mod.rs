//! Demo units.

pub mod fun;
pub mod utility;

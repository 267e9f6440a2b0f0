//! Units shipped with the framework.

#[cfg(feature = "builtin-manage")]
pub mod manage;

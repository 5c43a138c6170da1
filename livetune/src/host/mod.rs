//! The host half: an advisory mirror of guest state plus the outbound
//! controls a UI drives.

pub mod mirror;
pub mod reconciler;

pub use mirror::*;
pub use reconciler::*;

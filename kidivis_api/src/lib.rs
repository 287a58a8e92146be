//! Shared kidivis data models consumed by the diff core, the renderer crates
//! and the serving layer.

pub mod design;
pub mod diff;
pub mod revision;

pub use design::*;
pub use diff::*;
pub use revision::*;

//! hsrecon Runtime
//!
//! Runs scanners, analysis passes and the correlation lookup for one hidden
//! service or a batch of them.

pub mod correlate;
pub mod engine;

pub use correlate::*;
pub use engine::*;

pub mod viewer;

pub use viewer::{CapabilityGuard, CapabilitySet, ViewerContext};

//! System busy-level estimation for load-adaptive scheduling.

pub mod busy;
pub mod sampler;

pub use busy::{BusyLevelEstimator, DEFAULT_BUSY_LEVEL, DEFAULT_STRENGTH, DelayCurve};
pub use sampler::{FixedSampler, LoadSampler, SysinfoSampler};

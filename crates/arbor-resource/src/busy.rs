use std::sync::Mutex;
use std::time::Duration;

use crate::sampler::{LoadSampler, SysinfoSampler};

/// Busy level reported when no load figure is available at all.
pub const DEFAULT_BUSY_LEVEL: f64 = 0.2;

/// Default exponent strength `k` of the delay curve.
pub const DEFAULT_STRENGTH: f64 = 2.0;

const PROCESS_WEIGHT: f64 = 0.7;
const LOAD_WEIGHT: f64 = 0.3;

/// Produces a normalized busy score in `[0, 1]` from a [`LoadSampler`].
pub struct BusyLevelEstimator {
    sampler: Mutex<Box<dyn LoadSampler>>,
}

impl BusyLevelEstimator {
    pub fn new(sampler: Box<dyn LoadSampler>) -> Self {
        Self {
            sampler: Mutex::new(sampler),
        }
    }

    /// Estimator backed by the OS sampler.
    pub fn system() -> Self {
        Self::new(Box::new(SysinfoSampler::new()))
    }

    /// Sample the platform and combine the figures.
    ///
    /// Never fails: a poisoned sampler lock yields [`DEFAULT_BUSY_LEVEL`].
    pub fn busy_level(&self) -> f64 {
        let mut sampler = match self.sampler.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("busy sampler lock poisoned, using default busy level");
                return DEFAULT_BUSY_LEVEL;
            }
        };
        let process = sampler.process_cpu();
        let load = sampler.load_average();
        let cores = sampler.core_count();
        combine(process, load, cores)
    }
}

impl Default for BusyLevelEstimator {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for BusyLevelEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyLevelEstimator").finish_non_exhaustive()
    }
}

/// Weighted busy score.
///
/// A process CPU figure of zero is treated like a missing one, since the
/// first sample after start-up always reads zero.
pub fn combine(process_cpu: Option<f64>, load_average: Option<f64>, cores: usize) -> f64 {
    let normalized_load =
        load_average.map(|load| (load / cores.max(1) as f64).clamp(0.0, 1.0));
    let process_cpu = process_cpu
        .filter(|cpu| cpu.is_finite() && *cpu > 0.0)
        .map(|cpu| cpu.clamp(0.0, 1.0));

    let busy = match (process_cpu, normalized_load) {
        (Some(cpu), Some(load)) => PROCESS_WEIGHT * cpu + LOAD_WEIGHT * load,
        (Some(cpu), None) => PROCESS_WEIGHT * cpu,
        (None, Some(load)) => load,
        (None, None) => DEFAULT_BUSY_LEVEL,
    };
    busy.clamp(0.0, 1.0)
}

/// Exponential mapping from busy level to a delay inside `[min, max]`.
///
/// `delay = min + (max - min) * (e^(k*busy) - 1) / (e^k - 1)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayCurve {
    strength: f64,
}

impl DelayCurve {
    /// Non-positive or non-finite strengths fall back to [`DEFAULT_STRENGTH`].
    pub fn new(strength: f64) -> Self {
        let strength = if strength.is_finite() && strength > 0.0 {
            strength
        } else {
            DEFAULT_STRENGTH
        };
        Self { strength }
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    /// Fraction of the `[min, max]` span used at `busy`.
    pub fn fraction(&self, busy: f64) -> f64 {
        let busy = if busy.is_nan() { 0.0 } else { busy.clamp(0.0, 1.0) };
        let k = self.strength;
        ((k * busy).exp() - 1.0) / (k.exp() - 1.0)
    }

    pub fn delay(&self, min: Duration, max: Duration, busy: f64) -> Duration {
        if max <= min {
            return min;
        }
        let fraction = self.fraction(busy);
        if fraction <= 0.0 {
            return min;
        }
        if fraction >= 1.0 {
            return max;
        }
        let span = (max - min).as_nanos() as f64;
        let extra = Duration::from_nanos((span * fraction).round() as u64);
        (min + extra).clamp(min, max)
    }
}

impl Default for DelayCurve {
    fn default() -> Self {
        Self::new(DEFAULT_STRENGTH)
    }
}

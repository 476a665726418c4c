use sysinfo::{Pid, ProcessesToUpdate, System};

/// Source of raw load figures.
///
/// Implementations return `None` for anything the platform cannot report;
/// the estimator decides how to fall back.
pub trait LoadSampler: Send {
    /// CPU used by the current process, normalized to `[0, 1]` across all cores.
    fn process_cpu(&mut self) -> Option<f64>;

    /// One-minute OS load average (runnable tasks, not normalized).
    fn load_average(&mut self) -> Option<f64>;

    /// Logical CPU count used to normalize the load average.
    fn core_count(&self) -> usize;
}

/// Samples the current process and the OS through `sysinfo`.
///
/// Process CPU is computed from the delta between two refreshes, so the very
/// first sample reports nothing.
pub struct SysinfoSampler {
    sys: System,
    pid: Option<Pid>,
    cores: usize,
    primed: bool,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::debug!("process CPU sampling unavailable: {e}");
                None
            }
        };
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            sys: System::new(),
            pid,
            cores,
            primed: false,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SysinfoSampler {
    fn process_cpu(&mut self) -> Option<f64> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        let pid = self.pid?;
        self.sys
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let usage = self.sys.process(pid)?.cpu_usage() as f64;
        if !self.primed {
            self.primed = true;
            return None;
        }
        // sysinfo reports percent of a single core
        Some((usage / (100.0 * self.cores as f64)).clamp(0.0, 1.0))
    }

    fn load_average(&mut self) -> Option<f64> {
        if cfg!(windows) {
            return None;
        }
        let one = System::load_average().one;
        if one.is_finite() && one > 0.0 {
            Some(one)
        } else {
            None
        }
    }

    fn core_count(&self) -> usize {
        self.cores
    }
}

/// Sampler returning preset figures. Used for deterministic delays.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSampler {
    pub process_cpu: Option<f64>,
    pub load_average: Option<f64>,
    pub cores: usize,
}

impl FixedSampler {
    pub fn new(process_cpu: Option<f64>, load_average: Option<f64>, cores: usize) -> Self {
        Self {
            process_cpu,
            load_average,
            cores,
        }
    }

    /// A sampler that reports nothing at all.
    pub fn unavailable() -> Self {
        Self::new(None, None, 1)
    }
}

impl LoadSampler for FixedSampler {
    fn process_cpu(&mut self) -> Option<f64> {
        self.process_cpu
    }

    fn load_average(&mut self) -> Option<f64> {
        self.load_average
    }

    fn core_count(&self) -> usize {
        self.cores.max(1)
    }
}

//! System resource monitoring with adaptive worker/batch derivation.
//!
//! A process-wide monitor classifies memory and CPU pressure into four
//! ordered states and gates new work through a time-windowed circuit
//! breaker after an exhaustion event. Probes read `/proc`; on platforms
//! where that fails the monitor runs degraded and always reports healthy.

use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

/// Ordered resource pressure states. `Healthy < Warning < Critical < Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceState {
    Healthy,
    Warning,
    Critical,
    Exhausted,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Thresholds and breaker settings.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Memory usage percentage thresholds
    pub memory_warning_threshold: f64,
    pub memory_critical_threshold: f64,
    pub memory_exhausted_threshold: f64,
    /// CPU usage percentage thresholds (CPU never yields Exhausted)
    pub cpu_warning_threshold: f64,
    pub cpu_critical_threshold: f64,
    /// Absolute floor of free memory in MB
    pub min_free_memory_mb: u64,
    /// Fire the cleanup hook on the healthy→warning edge
    pub auto_gc_on_warning: bool,
    /// How long the breaker refuses new work after exhaustion
    pub circuit_breaker_cooldown: Duration,
    pub circuit_breaker_enabled: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_warning_threshold: 70.0,
            memory_critical_threshold: 85.0,
            memory_exhausted_threshold: 95.0,
            cpu_warning_threshold: 80.0,
            cpu_critical_threshold: 90.0,
            min_free_memory_mb: 100,
            auto_gc_on_warning: true,
            circuit_breaker_cooldown: Duration::from_secs(10),
            circuit_breaker_enabled: true,
        }
    }
}

/// Point-in-time view of resource pressure.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub state: ResourceState,
    pub memory_percent_used: f64,
    pub available_mb: f64,
    pub process_mb: f64,
}

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    busy: u64,
    total: u64,
}

struct MonitorInner {
    breaker_tripped_at: Option<Instant>,
    last_cpu: Option<CpuSample>,
    prev_state: ResourceState,
}

type CleanupHook = Box<dyn Fn() + Send + Sync>;

/// Advisory resource monitor. Never errors; sensor failures downgrade to
/// healthy. One instance per process via [`monitor`].
pub struct ResourceMonitor {
    limits: ResourceLimits,
    degraded: bool,
    cleanup_hook: CleanupHook,
    inner: Mutex<MonitorInner>,
}

impl ResourceMonitor {
    /// Build a monitor with custom limits and an optional cleanup hook fired
    /// on the healthy→warning edge. Rust has no collector to kick, so the
    /// default hook is a no-op; hosts embedding an allocator with purge
    /// support can inject one.
    pub fn with_limits(limits: ResourceLimits, cleanup_hook: Option<CleanupHook>) -> Self {
        let degraded = read_meminfo().is_none();
        if degraded {
            log::warn!("resource probes unavailable, monitor degraded (always healthy)");
        } else if let Some(mem) = read_meminfo() {
            log::info!(
                "resource monitor initialized: {:.2} GB total, {:.2} GB available, {} cpus",
                mem.total_kb as f64 / (1024.0 * 1024.0),
                mem.available_kb as f64 / (1024.0 * 1024.0),
                std::thread::available_parallelism().map_or(1, |n| n.get()),
            );
        }
        Self {
            limits,
            degraded,
            cleanup_hook: cleanup_hook.unwrap_or_else(|| Box::new(|| {})),
            inner: Mutex::new(MonitorInner {
                breaker_tripped_at: None,
                last_cpu: None,
                prev_state: ResourceState::Healthy,
            }),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Probe and classify current memory/CPU pressure.
    pub fn snapshot(&self) -> ResourceSnapshot {
        if self.degraded {
            return ResourceSnapshot {
                state: ResourceState::Healthy,
                memory_percent_used: 0.0,
                available_mb: 0.0,
                process_mb: 0.0,
            };
        }

        let (memory_percent_used, available_mb) = match read_meminfo() {
            Some(mem) if mem.total_kb > 0 => {
                let used = mem.total_kb.saturating_sub(mem.available_kb);
                (
                    used as f64 / mem.total_kb as f64 * 100.0,
                    mem.available_kb as f64 / 1024.0,
                )
            }
            // Transient sensor failure: advisory monitor downgrades to healthy
            _ => {
                return ResourceSnapshot {
                    state: ResourceState::Healthy,
                    memory_percent_used: 0.0,
                    available_mb: 0.0,
                    process_mb: 0.0,
                };
            }
        };
        let process_mb = read_process_rss_kb().map_or(0.0, |kb| kb as f64 / 1024.0);

        // Breaker holds the state at Exhausted until the cooldown elapses.
        if self.circuit_breaker_active() {
            return ResourceSnapshot {
                state: ResourceState::Exhausted,
                memory_percent_used,
                available_mb,
                process_mb,
            };
        }

        let memory_state = classify_memory(memory_percent_used, available_mb, &self.limits);
        let cpu_state = self.sample_cpu_state();
        let state = memory_state.max(cpu_state);

        let mut inner = self.inner.lock().unwrap();
        if state == ResourceState::Exhausted && self.limits.circuit_breaker_enabled {
            if inner.breaker_tripped_at.is_none() {
                log::error!(
                    "resources exhausted ({memory_percent_used:.1}% memory used, \
                     {available_mb:.0} MB available), pausing new work for {:?}",
                    self.limits.circuit_breaker_cooldown
                );
            }
            inner.breaker_tripped_at = Some(Instant::now());
        }
        let fire_hook = self.limits.auto_gc_on_warning
            && inner.prev_state == ResourceState::Healthy
            && state == ResourceState::Warning;
        inner.prev_state = state;
        drop(inner);

        if fire_hook {
            log::debug!("memory warning edge, running cleanup hook");
            (self.cleanup_hook)();
        }

        ResourceSnapshot {
            state,
            memory_percent_used,
            available_mb,
            process_mb,
        }
    }

    /// Current state (shorthand for `snapshot().state`).
    pub fn state(&self) -> ResourceState {
        self.snapshot().state
    }

    /// Worker count that is safe under the current state, in `[1, requested]`.
    pub fn safe_worker_count(&self, requested: usize) -> usize {
        let count = scaled_workers(self.state(), requested);
        if count < requested {
            log::info!("reduced worker count from {requested} to {count} (resource pressure)");
        }
        count
    }

    /// Batch size that is safe under the current state.
    pub fn safe_batch_size(&self, desired: usize) -> usize {
        let size = scaled_batch_size(self.state(), desired);
        if size < desired {
            log::info!("reduced batch size from {desired} to {size} (memory pressure)");
        }
        size
    }

    /// Block until the state is at most `target`, polling once per second.
    /// Returns whether the target was reached before the timeout.
    pub fn wait_for(&self, target: ResourceState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.state();
            if current <= target {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!("gave up waiting for {target} resources after {timeout:?}");
                return false;
            }
            log::debug!("waiting for resources: current {current}, required {target}");
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(Duration::from_secs(1).min(remaining));
        }
    }

    /// True while the post-exhaustion cooldown window is open.
    pub fn circuit_breaker_active(&self) -> bool {
        if !self.limits.circuit_breaker_enabled {
            return false;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.breaker_tripped_at {
            Some(at) if at.elapsed() < self.limits.circuit_breaker_cooldown => true,
            Some(_) => {
                log::info!("circuit breaker reset, resuming");
                inner.breaker_tripped_at = None;
                false
            }
            None => false,
        }
    }

    fn sample_cpu_state(&self) -> ResourceState {
        let Some(sample) = read_cpu_sample() else {
            return ResourceState::Healthy;
        };
        let mut inner = self.inner.lock().unwrap();
        let previous = inner.last_cpu.replace(sample);
        drop(inner);

        let Some(prev) = previous else {
            return ResourceState::Healthy;
        };
        let dt = sample.total.saturating_sub(prev.total);
        if dt == 0 {
            return ResourceState::Healthy;
        }
        let busy = sample.busy.saturating_sub(prev.busy);
        let percent = busy as f64 / dt as f64 * 100.0;
        classify_cpu(percent, &self.limits)
    }

    #[cfg(test)]
    fn force_trip(&self) {
        self.inner.lock().unwrap().breaker_tripped_at = Some(Instant::now());
    }
}

/// Process-wide monitor with default limits, initialized on first use.
pub fn monitor() -> &'static ResourceMonitor {
    static MONITOR: LazyLock<ResourceMonitor> =
        LazyLock::new(|| ResourceMonitor::with_limits(ResourceLimits::default(), None));
    &MONITOR
}

/// Memory classification against the configured thresholds.
fn classify_memory(percent_used: f64, available_mb: f64, limits: &ResourceLimits) -> ResourceState {
    if available_mb < limits.min_free_memory_mb as f64 {
        return ResourceState::Exhausted;
    }
    if percent_used >= limits.memory_exhausted_threshold {
        ResourceState::Exhausted
    } else if percent_used >= limits.memory_critical_threshold {
        ResourceState::Critical
    } else if percent_used >= limits.memory_warning_threshold {
        ResourceState::Warning
    } else {
        ResourceState::Healthy
    }
}

fn classify_cpu(percent: f64, limits: &ResourceLimits) -> ResourceState {
    if percent >= limits.cpu_critical_threshold {
        ResourceState::Critical
    } else if percent >= limits.cpu_warning_threshold {
        ResourceState::Warning
    } else {
        ResourceState::Healthy
    }
}

/// Worker count for a given state: full / half / quarter / one.
fn scaled_workers(state: ResourceState, requested: usize) -> usize {
    let scaled = match state {
        ResourceState::Healthy => requested,
        ResourceState::Warning => requested / 2,
        ResourceState::Critical => requested / 4,
        ResourceState::Exhausted => 1,
    };
    scaled.clamp(1, requested.max(1))
}

/// Batch size for a given state, floored at 1000 rows when exhausted.
fn scaled_batch_size(state: ResourceState, desired: usize) -> usize {
    match state {
        ResourceState::Healthy => desired,
        ResourceState::Warning => (desired / 2).max(1),
        ResourceState::Critical => (desired / 10).max(1),
        ResourceState::Exhausted => (desired / 100).max(1000),
    }
}

struct MemInfo {
    total_kb: u64,
    available_kb: u64,
}

fn read_meminfo() -> Option<MemInfo> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = rest.split_whitespace().next().and_then(|s| s.parse().ok());
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = rest.split_whitespace().next().and_then(|s| s.parse().ok());
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    Some(MemInfo {
        total_kb: total?,
        available_kb: available?,
    })
}

/// Resident set size of this process in kB, from `/proc/self/status` VmRSS.
fn read_process_rss_kb() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/self/status").ok()?;
    content.lines().find_map(|line| {
        line.strip_prefix("VmRSS:")?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    })
}

/// Aggregate CPU counters from the first line of `/proc/stat`.
fn read_cpu_sample() -> Option<CpuSample> {
    let content = std::fs::read_to_string("/proc/stat").ok()?;
    let line = content.lines().next()?;
    let fields: Vec<u64> = line
        .strip_prefix("cpu ")?
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect();
    if fields.len() < 5 {
        return None;
    }
    let total: u64 = fields.iter().sum();
    // idle + iowait are the non-busy columns
    let idle = fields[3] + fields[4];
    Some(CpuSample {
        busy: total.saturating_sub(idle),
        total,
    })
}

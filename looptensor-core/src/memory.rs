//! Process memory probes.

/// Resident set size of the current process, in kilobytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub current_rss_kb: usize,
    /// Peak resident set size since process start.
    pub max_rss_kb: usize,
}

impl MemoryUsage {
    /// Whether the platform reported anything.
    pub fn is_supported(&self) -> bool {
        self.max_rss_kb > 0
    }
}

/// Sample the current process's memory usage.
///
/// Fields are zero on platforms without a probe.
pub fn memory_usage() -> MemoryUsage {
    platform_memory_usage()
}

#[cfg(target_os = "linux")]
fn platform_memory_usage() -> MemoryUsage {
    let Ok(contents) = std::fs::read_to_string("/proc/self/status") else {
        return MemoryUsage::default();
    };
    let field = |name: &str| {
        contents
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<usize>().ok())
            .unwrap_or(0)
    };
    MemoryUsage {
        current_rss_kb: field("VmRSS:"),
        max_rss_kb: field("VmHWM:"),
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn platform_memory_usage() -> MemoryUsage {
    // SAFETY: `getrusage` only writes into the zero-initialised struct we pass.
    let usage = unsafe {
        let mut usage = std::mem::zeroed::<libc::rusage>();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return MemoryUsage::default();
        }
        usage
    };
    // macOS reports bytes, the BSDs kilobytes.
    let max_rss_kb = if cfg!(target_os = "macos") {
        usage.ru_maxrss as usize / 1024
    } else {
        usage.ru_maxrss as usize
    };
    MemoryUsage {
        current_rss_kb: max_rss_kb,
        max_rss_kb,
    }
}

#[cfg(not(unix))]
fn platform_memory_usage() -> MemoryUsage {
    MemoryUsage::default()
}

/// Bound on how much peak memory may grow while handling a tensor of a given size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeakMemoryBudget {
    /// Allowed growth as a multiple of the tensor's byte size.
    pub multiplier: usize,
    /// Fixed allowance on top, in bytes.
    pub margin_bytes: usize,
}

impl Default for PeakMemoryBudget {
    fn default() -> Self {
        Self {
            multiplier: 2,
            margin_bytes: 1024 * 1024,
        }
    }
}

impl PeakMemoryBudget {
    pub fn limit_kb(&self, tensor_bytes: usize) -> usize {
        (tensor_bytes * self.multiplier + self.margin_bytes) / 1024
    }

    /// Whether peak growth between `before` and `after` stays inside the budget.
    pub fn allows(&self, tensor_bytes: usize, before: MemoryUsage, after: MemoryUsage) -> bool {
        after.max_rss_kb.saturating_sub(before.max_rss_kb) <= self.limit_kb(tensor_bytes)
    }
}

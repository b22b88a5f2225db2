//! Resident-memory probe backing per-node memory deltas.

/// Current resident set size in bytes, best effort. Returns 0 where the
/// probe is unsupported.
#[cfg(target_os = "linux")]
pub(crate) fn resident_bytes() -> u64 {
    // /proc/self/statm reports sizes in pages; assume 4 KiB pages.
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|statm| {
            statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
        })
        .map(|pages| pages * 4096)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn resident_bytes() -> u64 {
    0
}

//! Process memory statistics.

/// Peak resident set size of this process in bytes, or 0 when the platform
/// does not report it.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn peak_memory_bytes() -> u64 {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the provided struct
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return 0;
    }
    // SAFETY: zero-initialized and filled in by a successful call
    let usage = unsafe { usage.assume_init() };
    let max_rss = u64::try_from(usage.ru_maxrss).unwrap_or(0);
    // Linux reports KiB, macOS reports bytes
    if cfg!(target_os = "macos") {
        max_rss
    } else {
        max_rss * 1024
    }
}

/// Peak resident set size of this process in bytes, or 0 when the platform
/// does not report it.
#[cfg(not(unix))]
pub fn peak_memory_bytes() -> u64 {
    0
}

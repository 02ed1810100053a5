//! Real-time scheduling and memory locking utilities.
//!
//! Provides platform-specific initialization for deterministic execution:
//! - Memory locking (mlockall) to prevent page faults
//! - Stack pre-faulting to ensure stack pages are resident
//! - Real-time scheduling (SCHED_FIFO/SCHED_RR) for the calling thread
//!
//! The operations sit behind [`RtPlatform`] so the lifecycle can be driven
//! against [`SimulatedPlatform`] in tests, without privileges.

use pm_common::config::{RealtimeConfig, SchedPolicy};
use pm_common::error::{PmError, PmResult};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Process and thread level real-time primitives.
pub trait RtPlatform: Send + Sync {
    /// Lock all current and future pages into RAM.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::MemoryLock`] if the pages cannot be locked.
    fn lock_memory(&self) -> PmResult<()>;

    /// Release the lock taken by [`lock_memory`](Self::lock_memory).
    ///
    /// # Errors
    ///
    /// Returns [`PmError::MemoryLock`] if the call fails.
    fn unlock_memory(&self) -> PmResult<()>;

    /// Apply a real-time policy and priority to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Priority`] if the scheduler rejects the request.
    fn set_thread_priority(&self, policy: SchedPolicy, priority: u8) -> PmResult<()>;

    /// Touch `size` bytes of the calling thread's stack. Returns the bytes
    /// touched.
    fn prefault_stack(&self, size: usize) -> usize {
        prefault_stack(size)
    }
}

/// The host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl RtPlatform for SystemPlatform {
    fn lock_memory(&self) -> PmResult<()> {
        lock_memory()
    }

    fn unlock_memory(&self) -> PmResult<()> {
        unlock_memory()
    }

    fn set_thread_priority(&self, policy: SchedPolicy, priority: u8) -> PmResult<()> {
        set_scheduler(policy, priority)
    }
}

/// Lock all current and future memory pages.
#[cfg(target_os = "linux")]
fn lock_memory() -> PmResult<()> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    debug!("Locking memory pages with mlockall");

    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE).map_err(|e| {
        let hint = if e == nix::errno::Errno::EPERM {
            " (grant CAP_IPC_LOCK or raise RLIMIT_MEMLOCK)"
        } else {
            ""
        };
        PmError::MemoryLock(format!("mlockall failed: {e}{hint}"))
    })?;

    info!("Memory locked successfully");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> PmResult<()> {
    Err(PmError::MemoryLock(
        "mlockall not available on this platform".into(),
    ))
}

#[cfg(target_os = "linux")]
fn unlock_memory() -> PmResult<()> {
    nix::sys::mman::munlockall()
        .map_err(|e| PmError::MemoryLock(format!("munlockall failed: {e}")))?;
    debug!("Memory unlocked");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn unlock_memory() -> PmResult<()> {
    Ok(())
}

/// Pre-fault stack pages to avoid page faults during execution.
///
/// Recurses through fixed-size frames, touching each one, until `size`
/// bytes of the current stack have been written.
pub fn prefault_stack(size: usize) -> usize {
    if size == 0 {
        return 0;
    }

    debug!(size, "Pre-faulting stack pages");
    let total_faulted = prefault_stack_recursive(size, 0);
    debug!(total_faulted, "Stack pre-fault complete");
    total_faulted
}

/// Recursive helper to actually fault stack pages.
#[inline(never)]
#[allow(unsafe_code)]
fn prefault_stack_recursive(remaining: usize, depth: usize) -> usize {
    const FRAME_SIZE: usize = 4096;
    const MAX_DEPTH: usize = 1024;

    if remaining < FRAME_SIZE || depth >= MAX_DEPTH {
        return 0;
    }

    let mut buffer = [0u8; FRAME_SIZE];

    // SAFETY: both offsets are inside our own stack buffer
    unsafe {
        std::ptr::write_volatile(buffer.as_mut_ptr(), 0xBB);
        std::ptr::write_volatile(buffer.as_mut_ptr().add(FRAME_SIZE - 1), 0xCC);
    }
    std::hint::black_box(&buffer);

    FRAME_SIZE + prefault_stack_recursive(remaining - FRAME_SIZE, depth + 1)
}

/// Get system page size.
#[must_use]
#[allow(unsafe_code)]
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size).unwrap_or(4096)
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

/// Set real-time scheduler policy and priority for the calling thread.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn set_scheduler(policy: SchedPolicy, priority: u8) -> PmResult<()> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
    };

    debug!(?policy, priority, "Setting real-time scheduler");

    let param = libc::sched_param {
        sched_priority: i32::from(priority),
    };

    // SAFETY: pid 0 targets the calling thread and param is a valid local
    let result = unsafe { libc::sched_setscheduler(0, linux_policy, &param) };

    if result == -1 {
        let err = std::io::Error::last_os_error();
        let hint = if err.raw_os_error() == Some(libc::EPERM) {
            " (grant CAP_SYS_NICE or raise RLIMIT_RTPRIO)"
        } else {
            ""
        };
        return Err(PmError::Priority(format!(
            "sched_setscheduler({policy:?}, {priority}) failed: {err}{hint}"
        )));
    }

    info!(?policy, priority, "Real-time scheduler configured");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(policy: SchedPolicy, priority: u8) -> PmResult<()> {
    Err(PmError::Priority(format!(
        "real-time scheduling ({policy:?}, {priority}) not available on this platform"
    )))
}

/// Apply the thread half of the real-time setup: priority, then stack
/// prefault. A disabled configuration is a no-op.
///
/// # Errors
///
/// Returns [`PmError::Priority`] if the priority cannot be applied.
pub fn init_thread(platform: &dyn RtPlatform, config: &RealtimeConfig, priority: u8) -> PmResult<()> {
    if !config.enabled {
        return Ok(());
    }
    platform.set_thread_priority(config.policy, priority)?;
    platform.prefault_stack(config.prefault_stack_size);
    Ok(())
}

/// Check if the current process has real-time capabilities.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn check_rt_capabilities() -> RtCapabilities {
    use std::fs;

    // SAFETY: geteuid has no preconditions
    let mut caps = RtCapabilities {
        is_root: unsafe { libc::geteuid() } == 0,
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid out-pointer
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }

    // SAFETY: as above
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps
}

#[cfg(not(target_os = "linux"))]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK value (max lockable memory).
    pub memlock_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// Check if RT scheduling at `priority` is likely to succeed.
    pub fn can_use_rt_scheduling(&self, priority: u8) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l >= u64::from(priority))
    }

    /// Check if memory locking is likely to succeed.
    pub fn can_lock_memory(&self) -> bool {
        if self.is_root {
            return true;
        }

        #[cfg(target_family = "unix")]
        {
            self.memlock_limit.is_some_and(|l| l == libc::RLIM_INFINITY)
        }

        #[cfg(not(target_family = "unix"))]
        {
            false
        }
    }

    /// Problems that would make a run with `config` fail at startup.
    pub fn issues(&self, config: &RealtimeConfig) -> Vec<String> {
        let mut issues = Vec::new();
        if !config.enabled {
            return issues;
        }

        if !self.preempt_rt {
            warn!("PREEMPT_RT kernel not detected. Sampling jitter may be degraded.");
        }

        if !self.can_use_rt_scheduling(config.priority) {
            issues.push(format!(
                "Cannot use RT scheduling ({:?}, priority {}): RLIMIT_RTPRIO={:?}, is_root={}",
                config.policy, config.priority, self.rtprio_limit, self.is_root
            ));
        }

        if config.lock_memory && !self.can_lock_memory() {
            issues.push(format!(
                "Cannot lock memory: RLIMIT_MEMLOCK={:?}, is_root={}",
                self.memlock_limit, self.is_root
            ));
        }

        issues
    }
}

/// A call recorded by [`SimulatedPlatform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCall {
    /// `lock_memory`.
    LockMemory,
    /// `unlock_memory`.
    UnlockMemory,
    /// `set_thread_priority` with the requested priority.
    SetPriority(SchedPolicy, u8),
    /// `prefault_stack` with the requested size.
    PrefaultStack(usize),
}

/// In-memory platform for tests. Records every call and can be told to
/// refuse memory locking or a given priority.
#[derive(Debug, Default)]
pub struct SimulatedPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    refuse_lock: bool,
    refuse_priority: Option<u8>,
}

impl SimulatedPlatform {
    /// Create a platform that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `lock_memory` fail.
    #[must_use]
    pub fn refuse_memory_lock(mut self) -> Self {
        self.refuse_lock = true;
        self
    }

    /// Make `set_thread_priority` fail for `priority`.
    #[must_use]
    pub fn refuse_priority(mut self, priority: u8) -> Self {
        self.refuse_priority = Some(priority);
        self
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: PlatformCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl RtPlatform for SimulatedPlatform {
    fn lock_memory(&self) -> PmResult<()> {
        self.record(PlatformCall::LockMemory);
        if self.refuse_lock {
            return Err(PmError::MemoryLock("simulated mlockall refusal".into()));
        }
        Ok(())
    }

    fn unlock_memory(&self) -> PmResult<()> {
        self.record(PlatformCall::UnlockMemory);
        Ok(())
    }

    fn set_thread_priority(&self, policy: SchedPolicy, priority: u8) -> PmResult<()> {
        self.record(PlatformCall::SetPriority(policy, priority));
        if self.refuse_priority == Some(priority) {
            return Err(PmError::Priority(format!(
                "simulated refusal of priority {priority}"
            )));
        }
        Ok(())
    }

    fn prefault_stack(&self, size: usize) -> usize {
        self.record(PlatformCall::PrefaultStack(size));
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size() {
        let ps = page_size();
        assert!(ps > 0);
        assert!(ps.is_power_of_two());
    }

    #[test]
    fn test_stack_prefault() {
        let faulted = prefault_stack(64 * 1024);
        assert_eq!(faulted, 64 * 1024);
        assert_eq!(prefault_stack(0), 0);
    }

    #[test]
    fn test_largest_valid_prefault_fits_thread_stack() {
        for stack in [256 * 1024, 1024 * 1024] {
            let config = RealtimeConfig {
                thread_stack_size: stack,
                prefault_stack_size: stack / 2,
                ..RealtimeConfig::default()
            };
            assert_eq!(config.max_prefault_stack_size(), config.prefault_stack_size);

            let size = config.prefault_stack_size;
            let faulted = std::thread::Builder::new()
                .name("prefault".into())
                .stack_size(config.thread_stack_size)
                .spawn(move || prefault_stack(size))
                .unwrap()
                .join()
                .unwrap();
            assert_eq!(faulted, size);
        }
    }

    #[test]
    fn test_rt_capabilities() {
        let caps = check_rt_capabilities();
        // Just verify it doesn't panic
        let _ = caps.can_use_rt_scheduling(49);
        let _ = caps.can_lock_memory();
    }

    #[test]
    fn test_capability_issues() {
        let caps = RtCapabilities {
            is_root: false,
            rtprio_limit: Some(10),
            memlock_limit: Some(64 * 1024),
            preempt_rt: true,
        };
        let config = RealtimeConfig::default();
        assert_eq!(caps.issues(&config).len(), 2);

        let disabled = RealtimeConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(caps.issues(&disabled).is_empty());

        let root = RtCapabilities {
            is_root: true,
            ..caps
        };
        assert!(root.issues(&config).is_empty());
    }

    #[test]
    fn test_init_thread_disabled_is_noop() {
        let platform = SimulatedPlatform::new();
        let config = RealtimeConfig {
            enabled: false,
            ..Default::default()
        };
        init_thread(&platform, &config, 49).unwrap();
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_init_thread_applies_priority_then_prefault() {
        let platform = SimulatedPlatform::new();
        let config = RealtimeConfig::default();
        init_thread(&platform, &config, 48).unwrap();
        assert_eq!(
            platform.calls(),
            vec![
                PlatformCall::SetPriority(SchedPolicy::Fifo, 48),
                PlatformCall::PrefaultStack(256 * 1024),
            ]
        );
    }

    #[test]
    fn test_refused_priority_is_an_error() {
        let platform = SimulatedPlatform::new().refuse_priority(49);
        let err = init_thread(&platform, &RealtimeConfig::default(), 49).unwrap_err();
        assert!(matches!(err, PmError::Priority(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_refused_memory_lock() {
        let platform = SimulatedPlatform::new().refuse_memory_lock();
        assert!(matches!(
            platform.lock_memory(),
            Err(PmError::MemoryLock(_))
        ));
    }
}

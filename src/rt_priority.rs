//! Real-time thread scheduling, for a [`crate::backend::Backend`]
//! implementation to call from inside the thread it renders audio on.
//! `spec.md §6` notes the RT thread runs "driven by the backend" at "high
//! priority"; this crate doesn't own that thread, so it can only offer the
//! mechanism, not apply it unasked. Grounded on `realtime_audio.rs`'s
//! `set_realtime_priority`, which does exactly this for the teacher's own
//! `cpal` callback thread.

use crate::error::{EngineError, Result};

/// Requests `SCHED_FIFO` (Linux) or a raised thread priority (macOS) for the
/// calling thread. Best-effort: most environments require elevated
/// privileges or realtime limits to actually grant this, so failure is
/// reported as `Err` rather than panicking, and callers are expected to
/// fall back to normal scheduling rather than treat it as fatal.
pub fn set_realtime_priority() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        let param = libc::sched_param { sched_priority: 80 };
        let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if result == 0 {
            log::info!("render thread set to SCHED_FIFO priority 80");
            Ok(())
        } else {
            let err = std::io::Error::last_os_error();
            log::warn!("failed to set SCHED_FIFO ({err}); running at normal priority");
            Err(EngineError::Backend(format!(
                "sched_setscheduler failed: {err}"
            )))
        }
    }

    #[cfg(target_os = "macos")]
    {
        let result = unsafe {
            let thread = libc::pthread_self();
            let mut policy: i32 = 0;
            let mut param = libc::sched_param { sched_priority: 0 };
            if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
                param.sched_priority = 63;
                libc::pthread_setschedparam(thread, policy, &param)
            } else {
                -1
            }
        };
        if result == 0 {
            log::info!("render thread priority raised to 63");
            Ok(())
        } else {
            log::warn!("failed to raise render thread priority; running at normal priority");
            Err(EngineError::Backend(
                "pthread_setschedparam failed".to_string(),
            ))
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        log::warn!("realtime thread priority is not implemented on this platform");
        Err(EngineError::Backend(
            "realtime priority unsupported on this platform".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_panic_regardless_of_privilege() {
        // Whether this succeeds depends entirely on the test runner's
        // privileges; only that it returns rather than aborting matters.
        let _ = set_realtime_priority();
    }
}

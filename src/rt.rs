//! Real-time scheduling for the playback thread
//!
//! Playback runs on a single thread that wants the highest scheduling
//! class the OS will grant. Missing privileges degrade playback quality
//! but not correctness, so a refusal is logged and ignored.

/// Raise the current thread to the real-time scheduling class.
///
/// On Unix this requests `SCHED_FIFO` at the maximum priority. Without
/// `CAP_SYS_NICE` (or an rtprio limit) the request fails with EPERM;
/// playback then continues under the default scheduler with a warning.
pub fn promote_playback_thread() {
    #[cfg(unix)]
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority < 0 {
            log::warn!("could not query SCHED_FIFO priority range");
            return;
        }
        let param = libc::sched_param {
            sched_priority: max_priority,
        };
        let rc = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if rc == 0 {
            log::debug!("playback thread promoted to SCHED_FIFO priority {max_priority}");
        } else {
            log::warn!(
                "real-time scheduling unavailable (errno {rc}); timing jitter may increase"
            );
        }
    }

    #[cfg(not(unix))]
    {
        log::debug!("no real-time scheduling hook on this platform");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_never_panics_without_privileges() {
        // Test runners are rarely privileged; the call must degrade.
        promote_playback_thread();
    }
}

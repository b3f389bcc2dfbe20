//! CPU affinity pinning for the control thread.
//!
//! The sampling loop shares the machine with the target's worker cores.
//! Pinning the control thread to the configured test core keeps its tick
//! scheduling and counter reads off the cores under measurement.
//!
//! Pinning is best effort: when the kernel refuses, sampling continues
//! unpinned with a logged reason. Builds run with the original mask, so
//! the guard is dropped around the optimization loop's rebuilds.

/// Result of attempting to pin the control thread.
#[derive(Debug)]
pub enum AffinityResult {
    /// Pinned; keep the guard alive for the duration of the run.
    Pinned(AffinityGuard),
    /// Pinning failed, sampling proceeds unpinned.
    NotPinned {
        /// Why pinning was not possible.
        reason: String,
    },
}

/// RAII guard that restores the original affinity mask when dropped.
pub struct AffinityGuard {
    #[cfg(target_os = "linux")]
    original_mask: libc::cpu_set_t,
    #[cfg(target_os = "linux")]
    pinned_cpu: u32,
    #[cfg(not(target_os = "linux"))]
    _private: (),
}

impl AffinityGuard {
    /// Try to pin the current thread to `cpu`.
    pub fn pin_to(cpu: u32) -> AffinityResult {
        #[cfg(target_os = "linux")]
        {
            Self::pin_linux(cpu)
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = cpu;
            AffinityResult::NotPinned {
                reason: "CPU affinity pinning requires Linux".to_string(),
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn pin_linux(cpu: u32) -> AffinityResult {
        use std::mem::MaybeUninit;

        unsafe {
            let mut original_mask = MaybeUninit::<libc::cpu_set_t>::uninit();
            let rc = libc::sched_getaffinity(
                0,
                std::mem::size_of::<libc::cpu_set_t>(),
                original_mask.as_mut_ptr(),
            );
            if rc != 0 {
                return AffinityResult::NotPinned {
                    reason: format!(
                        "sched_getaffinity failed: {}",
                        std::io::Error::last_os_error()
                    ),
                };
            }
            let original_mask = original_mask.assume_init();

            let mut new_mask: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut new_mask);
            libc::CPU_SET(cpu as usize, &mut new_mask);

            let rc = libc::sched_setaffinity(
                0,
                std::mem::size_of::<libc::cpu_set_t>(),
                &new_mask,
            );
            if rc != 0 {
                return AffinityResult::NotPinned {
                    reason: format!(
                        "sched_setaffinity to CPU {} failed: {}",
                        cpu,
                        std::io::Error::last_os_error()
                    ),
                };
            }

            tracing::debug!(cpu, "control thread pinned");
            AffinityResult::Pinned(AffinityGuard {
                original_mask,
                pinned_cpu: cpu,
            })
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for AffinityGuard {
    fn drop(&mut self) {
        unsafe {
            let rc = libc::sched_setaffinity(
                0,
                std::mem::size_of::<libc::cpu_set_t>(),
                &self.original_mask,
            );
            if rc != 0 {
                tracing::warn!(
                    "failed to restore CPU affinity: {}",
                    std::io::Error::last_os_error()
                );
            } else {
                tracing::debug!(cpu = self.pinned_cpu, "original CPU affinity restored");
            }
        }
    }
}

impl std::fmt::Debug for AffinityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[cfg(target_os = "linux")]
        {
            f.debug_struct("AffinityGuard")
                .field("pinned_cpu", &self.pinned_cpu)
                .finish()
        }

        #[cfg(not(target_os = "linux"))]
        {
            f.debug_struct("AffinityGuard").finish()
        }
    }
}

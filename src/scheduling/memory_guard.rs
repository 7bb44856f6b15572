//! Resident-memory ceiling for task generation.

use sysinfo::System;
use tracing::{debug, warn};

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryGuard {
    ceiling_mb: Option<u64>,
}

impl MemoryGuard {
    pub fn new(ceiling_mb: Option<u64>) -> Self {
        Self { ceiling_mb }
    }

    pub fn ceiling_mb(&self) -> Option<u64> {
        self.ceiling_mb
    }

    /// Resident set size of this process in megabytes
    pub fn resident_memory_mb() -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut sys = System::new();
        sys.refresh_process(pid);
        sys.process(pid).map(|process| process.memory() / BYTES_PER_MB)
    }

    /// True when a ceiling is set and the process is above it. Unreadable memory
    /// never trips the guard.
    pub fn is_over_ceiling(&self) -> bool {
        let Some(ceiling) = self.ceiling_mb else {
            return false;
        };
        match Self::resident_memory_mb() {
            Some(resident) if resident > ceiling => {
                warn!(
                    resident_mb = resident,
                    ceiling_mb = ceiling,
                    "Resident memory above scheduling ceiling"
                );
                true
            }
            Some(_) => false,
            None => {
                debug!("Resident memory unavailable, scheduling ceiling not enforced");
                false
            }
        }
    }
}

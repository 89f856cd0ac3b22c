//! Sandbox classification of client processes.
//!
//! A client is confined when its process runs inside a flatpak-managed
//! control group. Detection is consulted only for clients whose pid the
//! host vouched for; everything else is unconfined and falls back to the
//! default policy, which still owner-checks and allow-lists explicitly.

use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// The cgroup controller line inspected for the sandbox token.
const SYSTEMD_CONTROLLER_PREFIX: &str = "1:name=systemd:";
/// Token marking a flatpak-managed cgroup.
const FLATPAK_TOKEN: &str = "flatpak-";

/// Classifies a trusted pid as confined or not.
pub trait SandboxDetector: Send + Sync {
    fn is_confined(&self, pid: u32) -> bool;
}

/// Detector reading `<proc_root>/<pid>/cgroup`.
///
/// The process is confined iff the `1:name=systemd:` controller line names
/// a `flatpak-` scope. An unreadable file classifies as unconfined.
#[derive(Debug, Clone)]
pub struct CgroupDetector {
    proc_root: PathBuf,
}

impl CgroupDetector {
    /// Detector over the real `/proc`.
    #[must_use]
    pub fn new() -> CgroupDetector {
        CgroupDetector { proc_root: PathBuf::from("/proc") }
    }

    /// Detector over an alternate procfs root (tests, containers).
    #[must_use]
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> CgroupDetector {
        CgroupDetector { proc_root: proc_root.into() }
    }
}

impl Default for CgroupDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxDetector for CgroupDetector {
    fn is_confined(&self, pid: u32) -> bool {
        let path = self.proc_root.join(pid.to_string()).join("cgroup");
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) => {
                debug!(pid, path = %path.display(), %err, "cgroup unreadable, assuming not sandboxed");
                return false;
            }
        };

        for line in data.lines() {
            if let Some(scope) = line.strip_prefix(SYSTEMD_CONTROLLER_PREFIX) {
                if scope.contains(FLATPAK_TOKEN) {
                    debug!(pid, "found a flatpak cgroup, assuming sandboxed");
                    return true;
                }
            }
        }
        false
    }
}

/// Detector that never confines. The plain broker flavor and hosts without
/// sandboxing use this.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfined;

impl SandboxDetector for Unconfined {
    fn is_confined(&self, _pid: u32) -> bool {
        false
    }
}

//! Daemon reload notification
//!
//! A running daemon is asked to re-read its configuration by sending
//! `SIGHUP` to the PID recorded in its PID file. Failing to notify never
//! fails a commit; it is reported so the user knows a restart is needed.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ConfiguratorError, Result};

/// Outcome of a reload notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReloadStatus {
    /// The daemon was sent the reload signal
    Signalled { pid: i32 },
    /// No PID file, the daemon is not running under supervision
    NotRunning,
    /// The PID file exists but the daemon could not be signalled
    Failed { reason: String },
}

impl ReloadStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ReloadStatus::Failed { .. })
    }
}

/// Ask the daemon owning `pid_file` to reload, downgrading errors to a
/// warning
pub fn notify(pid_file: &Path) -> ReloadStatus {
    match send_reload(pid_file) {
        Ok(Some(pid)) => {
            info!(pid, "requested configuration reload");
            ReloadStatus::Signalled { pid }
        }
        Ok(None) => {
            debug!(path = %pid_file.display(), "no PID file, nothing to reload");
            ReloadStatus::NotRunning
        }
        Err(e) => {
            warn!(
                error = %e,
                "could not force config reload, changes may not take effect before restart"
            );
            ReloadStatus::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// Signal the process recorded in `pid_file`.
///
/// Returns `Ok(None)` when the PID file does not exist.
pub fn send_reload(pid_file: &Path) -> Result<Option<i32>> {
    let content = match fs::read_to_string(pid_file) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(signal_error(pid_file, e)),
    };

    let pid: i32 = content
        .trim()
        .parse()
        .map_err(|e| signal_error(pid_file, format!("invalid PID '{}': {}", content.trim(), e)))?;
    // 0 and negative values address process groups
    if pid <= 0 {
        return Err(signal_error(pid_file, format!("invalid PID {}", pid)));
    }

    deliver_hangup(pid).map_err(|reason| signal_error(pid_file, reason))?;
    Ok(Some(pid))
}

fn signal_error(path: &Path, reason: impl ToString) -> ConfiguratorError {
    ConfiguratorError::SignalError {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(unix)]
fn deliver_hangup(pid: i32) -> std::result::Result<(), String> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), Signal::SIGHUP).map_err(|e| format!("PID {}: {}", pid, e))
}

#[cfg(not(unix))]
fn deliver_hangup(_pid: i32) -> std::result::Result<(), String> {
    Err("reload signals are not supported on this platform".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_pid_file() {
        let dir = tempdir().unwrap();
        assert_eq!(notify(&dir.path().join("stunnel.pid")), ReloadStatus::NotRunning);
    }

    #[test]
    fn test_unparsable_pid() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("stunnel.pid");
        fs::write(&pid_file, "not-a-pid\n").unwrap();

        assert!(notify(&pid_file).is_failed());
        assert!(matches!(
            send_reload(&pid_file),
            Err(ConfiguratorError::SignalError { .. })
        ));
    }

    #[test]
    fn test_refuses_process_groups() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("stunnel.pid");
        fs::write(&pid_file, "0").unwrap();

        assert!(notify(&pid_file).is_failed());
    }

    #[cfg(unix)]
    #[test]
    fn test_vanished_process() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("stunnel.pid");
        // Above any kernel pid_max
        fs::write(&pid_file, "2147483647\n").unwrap();

        assert!(notify(&pid_file).is_failed());
    }

    #[cfg(unix)]
    #[test]
    fn test_signals_running_process() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::Command;

        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("stunnel.pid");
        fs::write(&pid_file, format!("{}\n", child.id())).unwrap();

        let status = notify(&pid_file);

        assert_eq!(status, ReloadStatus::Signalled { pid: child.id() as i32 });
        assert_eq!(
            child.wait().unwrap().signal(),
            Some(nix::sys::signal::Signal::SIGHUP as i32)
        );
    }
}

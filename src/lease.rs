//! Single-instance lease for the worker manager.
//!
//! The lease is a marker file holding the manager's PID. A marker whose PID
//! is no longer alive is stale and may be reclaimed by the next manager.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{QueueError, Result};

/// Process liveness oracle and terminator.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
    fn terminate(&self, pid: u32) -> std::result::Result<(), Errno>;
}

/// Probes real processes with `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessProbe;

fn to_pid(pid: u32) -> Option<Pid> {
    // 0 and negative values address process groups, never a single process.
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(pid) = to_pid(pid) else {
            return false;
        };
        match kill(pid, None) {
            Ok(()) => true,
            // Exists but belongs to someone else.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn terminate(&self, pid: u32) -> std::result::Result<(), Errno> {
        let pid = to_pid(pid).ok_or(Errno::ESRCH)?;
        kill(pid, Signal::SIGTERM)
    }
}

/// Manager liveness as reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerStatus {
    Running(u32),
    Stopped,
    /// A marker exists but its process is gone (or the marker is unreadable)
    Stale(Option<u32>),
}

impl std::fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerStatus::Running(pid) => write!(f, "Running (PID {pid})"),
            ManagerStatus::Stopped => write!(f, "Stopped"),
            ManagerStatus::Stale(_) => write!(f, "Stopped (stale marker)"),
        }
    }
}

/// Result of `worker stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Signalled(u32),
    NotRunning,
    StaleCleaned(Option<u32>),
}

enum Marker {
    Missing,
    Pid(u32),
    Unreadable,
}

#[derive(Clone)]
pub struct PidLease {
    path: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl std::fmt::Debug for PidLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidLease").field("path", &self.path).finish()
    }
}

impl PidLease {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_probe(path, Arc::new(OsProcessProbe))
    }

    pub fn with_probe(path: impl Into<PathBuf>, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            path: path.into(),
            probe,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn marker(&self) -> Result<Marker> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .trim()
                .parse::<u32>()
                .map(Marker::Pid)
                .unwrap_or(Marker::Unreadable)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Marker::Missing),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_marker(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn status(&self) -> Result<ManagerStatus> {
        Ok(match self.marker()? {
            Marker::Missing => ManagerStatus::Stopped,
            Marker::Pid(pid) if self.probe.is_alive(pid) => ManagerStatus::Running(pid),
            Marker::Pid(pid) => ManagerStatus::Stale(Some(pid)),
            Marker::Unreadable => ManagerStatus::Stale(None),
        })
    }

    /// Take the lease for `pid`, reclaiming a stale marker.
    pub fn acquire(&self, pid: u32) -> Result<LeaseGuard> {
        match self.status()? {
            ManagerStatus::Running(holder) if holder != pid => {
                return Err(QueueError::AlreadyRunning(holder));
            }
            ManagerStatus::Stopped => {}
            stale => {
                tracing::warn!(path = %self.path.display(), status = ?stale, "Reclaiming stale manager marker");
                self.remove_marker()?;
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Another manager won the race between the check and the create.
                return match self.marker()? {
                    Marker::Pid(holder) => Err(QueueError::AlreadyRunning(holder)),
                    _ => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };
        write!(file, "{pid}")?;
        file.sync_all()?;

        tracing::debug!(path = %self.path.display(), pid, "Manager lease acquired");
        Ok(LeaseGuard {
            lease: self.clone(),
            pid,
            released: false,
        })
    }

    /// Ask the running manager to shut down gracefully.
    pub fn stop(&self) -> Result<StopOutcome> {
        match self.status()? {
            ManagerStatus::Stopped => Ok(StopOutcome::NotRunning),
            ManagerStatus::Stale(pid) => {
                self.remove_marker()?;
                Ok(StopOutcome::StaleCleaned(pid))
            }
            ManagerStatus::Running(pid) => match self.probe.terminate(pid) {
                Ok(()) => Ok(StopOutcome::Signalled(pid)),
                Err(Errno::ESRCH) => {
                    self.remove_marker()?;
                    Ok(StopOutcome::StaleCleaned(Some(pid)))
                }
                Err(source) => Err(QueueError::Signal { pid, source }),
            },
        }
    }
}

/// Held by a running manager; removes the marker on release or drop.
#[derive(Debug)]
pub struct LeaseGuard {
    lease: PidLease,
    pid: u32,
    released: bool,
}

impl LeaseGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.remove_if_ours()
    }

    fn remove_if_ours(&self) -> Result<()> {
        match self.lease.marker()? {
            Marker::Pid(pid) if pid == self.pid => self.lease.remove_marker(),
            _ => Ok(()),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.remove_if_ours() {
            tracing::error!(path = %self.lease.path.display(), error = %e, "Failed to remove manager marker");
        }
    }
}

//! Mount namespace switch (§4.3).

use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;

use nix::fcntl::OFlag;
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;

use crate::error::ProvisioningError;

fn open_mnt_ns(pid: i32) -> Result<OwnedFd, ProvisioningError> {
    let path = if pid == 0 {
        PathBuf::from("/proc/self/ns/mnt")
    } else {
        PathBuf::from(format!("/proc/{pid}/ns/mnt"))
    };
    nix::fcntl::open(&path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()).map_err(|errno| {
        ProvisioningError::EnterNamespace {
            pid,
            source: std::io::Error::from_raw_os_error(errno as i32),
        }
    })
}

/// Holds the process's original mount namespace descriptor, switching back
/// to it on drop (§4.3, `leaveNamespace`). Restoration is attempted
/// unconditionally and failures are logged rather than panicking, since a
/// guard destructor cannot propagate a `Result`.
pub struct NamespaceGuard {
    original: Option<OwnedFd>,
    pid: i32,
}

impl NamespaceGuard {
    /// Switches the calling process into `pid`'s mount namespace, returning
    /// a guard that restores the original namespace on drop.
    pub fn enter(pid: i32) -> Result<Self, ProvisioningError> {
        let original = open_mnt_ns(0)?;
        let target = open_mnt_ns(pid)?;

        setns(target.as_fd(), CloneFlags::CLONE_NEWNS).map_err(|errno| {
            ProvisioningError::EnterNamespace {
                pid,
                source: std::io::Error::from_raw_os_error(errno as i32),
            }
        })?;
        tracing::info!(pid, "switched to mount namespace");

        Ok(Self {
            original: Some(original),
            pid,
        })
    }

    /// Explicitly restores the original namespace, surfacing the error
    /// instead of only logging it as the `Drop` path does.
    pub fn leave(mut self) -> Result<(), ProvisioningError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), ProvisioningError> {
        let Some(original) = self.original.take() else {
            return Ok(());
        };
        setns(original.as_fd(), CloneFlags::CLONE_NEWNS).map_err(|errno| {
            ProvisioningError::LeaveNamespace {
                source: std::io::Error::from_raw_os_error(errno as i32),
            }
        })?;
        tracing::info!(pid = self.pid, "switched back to default mount namespace");
        Ok(())
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        if self.original.is_some() {
            if let Err(err) = self.restore() {
                tracing::error!(pid = self.pid, %err, "failed to restore default mount namespace");
            }
        }
    }
}

//! Sysfs text I/O and cgroup remount protocol (§4.2).

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::mount::{mount, MsFlags};

use crate::error::ProvisioningError;

pub fn read_string(path: &Path) -> io::Result<String> {
    let raw = fs::read_to_string(path)?;
    Ok(raw.trim_end_matches('\n').to_string())
}

pub fn write_string(path: &Path, value: &str) -> io::Result<()> {
    fs::write(path, value)
}

pub fn read_u64(path: &Path) -> io::Result<u64> {
    let raw = read_string(path)?;
    raw.trim()
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "not a u64"))
}

pub fn write_u64(path: &Path, value: u64) -> io::Result<()> {
    write_string(path, &value.to_string())
}

const SYSFS_CGROUP_PATH: &str = "/sys/fs/cgroup";

/// Parses `/proc/<pid>/cgroup`, returning the sysfs path of the named
/// controller's hierarchy for that pid.
pub fn find_cgroup_path(pid: i32, controller: &'static str) -> Result<PathBuf, ProvisioningError> {
    let procpath = PathBuf::from(format!("/proc/{pid}/cgroup"));
    let contents =
        fs::read_to_string(&procpath).map_err(|source| ProvisioningError::CgroupLookup {
            pid,
            controller,
            source,
        })?;

    for line in contents.lines() {
        let mut parts = line.splitn(3, ':');
        let _hierarchy_id = parts.next();
        let Some(subsystems) = parts.next() else {
            continue;
        };
        let Some(cgpath) = parts.next() else {
            continue;
        };
        if subsystems.split(',').any(|s| s == controller) {
            return Ok(PathBuf::from(format!(
                "{SYSFS_CGROUP_PATH}/{controller}{cgpath}/"
            )));
        }
    }

    Err(ProvisioningError::CgroupLookup {
        pid,
        controller,
        source: io::Error::new(io::ErrorKind::NotFound, "controller not present"),
    })
}

/// Remounts `path`'s cgroup hierarchy bind+read-write on construction,
/// bind+read-only+nosuid+nodev+noexec unconditionally on drop (§4.2).
pub struct CgroupRemountGuard {
    path: PathBuf,
}

impl CgroupRemountGuard {
    pub fn enter(path: PathBuf) -> Result<Self, ProvisioningError> {
        remount(&path, MsFlags::MS_BIND | MsFlags::MS_REMOUNT).map_err(|source| {
            ProvisioningError::CgroupRemount {
                path: path.clone(),
                source,
            }
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CgroupRemountGuard {
    fn drop(&mut self) {
        let flags = MsFlags::MS_BIND
            | MsFlags::MS_REMOUNT
            | MsFlags::MS_RDONLY
            | MsFlags::MS_NOSUID
            | MsFlags::MS_NODEV
            | MsFlags::MS_NOEXEC;
        if let Err(err) = remount(&self.path, flags) {
            tracing::error!(path = %self.path.display(), %err, "failed to restore cgroup read-only");
        } else {
            tracing::debug!(path = %self.path.display(), "cgroup hierarchy remounted read-only");
        }
    }
}

fn remount(path: &Path, flags: MsFlags) -> io::Result<()> {
    mount::<str, Path, str, str>(None, path, Some("cgroup"), flags, None)
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))
}

/// Sets RLIMIT_MEMLOCK soft=hard on `pid` via `prlimit(2)` (§4.8 step 6).
pub fn rlimit_memlock(pid: i32, bytes: u64) -> Result<(), ProvisioningError> {
    let limit = libc::rlimit {
        rlim_cur: bytes,
        rlim_max: bytes,
    };
    // SAFETY: `&limit` is a valid, fully-initialized `rlimit` for the
    // duration of the call; `new_limit` is not read back.
    let rc = unsafe {
        libc::prlimit(
            pid,
            libc::RLIMIT_MEMLOCK,
            &limit,
            std::ptr::null_mut(),
        )
    };
    if rc < 0 {
        return Err(ProvisioningError::Rlimit {
            pid,
            resource: "RLIMIT_MEMLOCK",
            source: io::Error::last_os_error(),
        });
    }
    tracing::debug!(pid, bytes, "RLIMIT_MEMLOCK set");
    Ok(())
}

/// Configures hugetlb cgroup limits for `pid` (§4.8 step 6, `limitHugetlb`).
pub fn limit_hugetlb(pid: i32, hugepage_2m: u32, hugepage_1g: u32) -> Result<(), ProvisioningError> {
    let cgpath = find_cgroup_path(pid, "hugetlb")?;
    let guard = CgroupRemountGuard::enter(PathBuf::from(format!("{SYSFS_CGROUP_PATH}/hugetlb")))?;

    let limit_2m = cgpath.join("hugetlb.2MB.limit_in_bytes");
    let value_2m = format!("{}M", hugepage_2m as u64 * 2);
    write_string(&limit_2m, &value_2m).map_err(|source| ProvisioningError::CgroupWrite {
        path: limit_2m.clone(),
        source,
    })?;

    let limit_1g = cgpath.join("hugetlb.1GB.limit_in_bytes");
    let value_1g = format!("{hugepage_1g}G");
    write_string(&limit_1g, &value_1g).map_err(|source| ProvisioningError::CgroupWrite {
        path: limit_1g.clone(),
        source,
    })?;

    drop(guard);
    Ok(())
}

/// Sets permissive (0666) permissions on `path` (host-side chmod, §4.8 step 1).
pub fn chmod_world_rw(path: &Path) -> Result<(), ProvisioningError> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).map_err(|source| ProvisioningError::StatDevice {
        path: path.to_path_buf(),
        source,
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o666)).map_err(|source| {
        ProvisioningError::Chmod {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Returns the (major, minor) device numbers of a device node.
pub fn device_major_minor(path: &Path) -> Result<(u64, u64), ProvisioningError> {
    let meta = fs::metadata(path).map_err(|source| ProvisioningError::StatDevice {
        path: path.to_path_buf(),
        source,
    })?;
    let rdev = meta.rdev();
    Ok((nix::sys::stat::major(rdev), nix::sys::stat::minor(rdev)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_string_strips_trailing_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hello").unwrap();
        assert_eq!(read_string(file.path()).unwrap(), "hello");
    }

    #[test]
    fn read_u64_parses_decimal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "42").unwrap();
        assert_eq!(read_u64(file.path()).unwrap(), 42);
    }
}

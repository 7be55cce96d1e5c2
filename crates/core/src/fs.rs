//! Host filesystem primitives: bind mounts, fsuid/fsgid-scoped file
//! creation, linker cache refresh, glob expansion (§4.1).

use std::fs;
use std::io;
use std::os::unix::fs::{symlink, FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::mount::{mount, MsFlags};

use crate::error::ProvisioningError;

/// Switches the process's filesystem uid/gid for the lifetime of the guard,
/// restoring the prior identity on drop (§4.1, `set_fsugid`).
///
/// Required since Linux 4.8: an inode created under a user namespace must
/// be created with a uid/gid already known to the VFS.
struct FsIdGuard {
    prev_uid: libc::uid_t,
    prev_gid: libc::gid_t,
}

impl FsIdGuard {
    /// Sets fsgid then fsuid, verifying each switch took effect via the
    /// `(-1)`-query idiom: `setfsgid`/`setfsuid` never report failure
    /// directly, so the only way to detect a rejected switch (e.g. an
    /// unprivileged caller) is to query the current value back and
    /// compare it against what was requested. A mismatch is fatal.
    fn enter(uid: u32, gid: u32) -> Result<Self, ProvisioningError> {
        // SAFETY: setfsuid/setfsgid take plain integer ids; passing -1
        // queries the current value without changing it.
        let prev_gid = unsafe { libc::setfsgid(gid as libc::gid_t) };
        if unsafe { libc::setfsgid(-1i32 as libc::gid_t) } != gid as libc::gid_t {
            return Err(ProvisioningError::FsIdSwitch { uid, gid });
        }
        let prev_uid = unsafe { libc::setfsuid(uid as libc::uid_t) };
        if unsafe { libc::setfsuid(-1i32 as libc::uid_t) } != uid as libc::uid_t {
            return Err(ProvisioningError::FsIdSwitch { uid, gid });
        }
        Ok(Self { prev_uid, prev_gid })
    }
}

impl Drop for FsIdGuard {
    fn drop(&mut self) {
        unsafe {
            libc::setfsgid(self.prev_gid);
            libc::setfsuid(self.prev_uid);
        }
    }
}

fn umask_mode() -> u32 {
    // SAFETY: umask(2) is always safe to call; we immediately restore it.
    unsafe {
        let mask = libc::umask(0);
        libc::umask(mask);
        mask as u32
    }
}

fn make_ancestors(path: &Path, perm: u32) -> io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => return Err(io::Error::from_raw_os_error(libc::ENOTDIR)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            make_ancestors(parent, perm)?;
        }
    }
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateKind {
    Regular,
    Directory,
    Symlink,
}

/// Creates `path` (file/dir/symlink per `kind`) under the filesystem
/// identity `(uid, gid)`, creating missing ancestor directories first
/// (§4.1, `file_create`).
pub fn file_create(
    path: &Path,
    kind: CreateKind,
    symlink_target: Option<&Path>,
    uid: u32,
    gid: u32,
    mode: u32,
) -> Result<(), ProvisioningError> {
    let _guard = FsIdGuard::enter(uid, gid)?;
    let umask = umask_mode();

    let dir_perm = (0o777 & !umask) | 0o300;
    if let Some(parent) = path.parent() {
        make_ancestors(parent, dir_perm).map_err(|source| ProvisioningError::CreatePath {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let perm = 0o777 & !umask & mode;

    match kind {
        CreateKind::Directory => match fs::create_dir(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(ProvisioningError::CreatePath {
                    path: path.to_path_buf(),
                    source,
                })
            }
        },
        CreateKind::Symlink => {
            let target = symlink_target.ok_or_else(|| ProvisioningError::CreatePath {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "missing symlink target"),
            })?;
            match symlink(target, path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => {
                    return Err(ProvisioningError::CreatePath {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
        CreateKind::Regular => {
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .custom_flags(libc::O_NOFOLLOW)
                .open(path)
                .map_err(|source| ProvisioningError::CreatePath {
                    path: path.to_path_buf(),
                    source,
                })?;
            file.set_permissions(fs::Permissions::from_mode(perm))
                .map_err(|source| ProvisioningError::Chmod {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
    }

    Ok(())
}

fn mount_err(src: &Path, dst: &Path, errno: nix::errno::Errno) -> ProvisioningError {
    ProvisioningError::Mount {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source: io::Error::from_raw_os_error(errno as i32),
    }
}

/// Bind-mounts `src` onto `rootfs/(dst or src)`, creating the destination
/// (inheriting `src`'s file type) and applying the composed remount flag
/// set (§4.1, `mountFile`).
pub fn mount_file(
    rootfs: &Path,
    src: &Path,
    dst: Option<&Path>,
    device: bool,
    rdonly: bool,
    noexec: bool,
) -> Result<(), ProvisioningError> {
    let meta = fs::symlink_metadata(src).map_err(|source| ProvisioningError::StatDevice {
        path: src.to_path_buf(),
        source,
    })?;

    let rel = dst.unwrap_or(src);
    let rel = rel.strip_prefix("/").unwrap_or(rel);
    let dstpath = rootfs.join(rel);

    let kind = if meta.is_dir() {
        CreateKind::Directory
    } else if meta.file_type().is_symlink() {
        CreateKind::Symlink
    } else {
        CreateKind::Regular
    };
    file_create(&dstpath, kind, None, 0, 0, meta.mode())?;

    mount::<Path, Path, str, str>(Some(src), &dstpath, None, MsFlags::MS_BIND, None)
        .map_err(|errno| mount_err(src, &dstpath, errno))?;

    let mut flags = MsFlags::MS_BIND | MsFlags::MS_REMOUNT;
    if !device {
        flags |= MsFlags::MS_NODEV;
    }
    if rdonly {
        flags |= MsFlags::MS_RDONLY;
    }
    if noexec {
        flags |= MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID;
    }
    mount::<str, Path, str, str>(None, &dstpath, None, flags, None)
        .map_err(|errno| mount_err(src, &dstpath, errno))?;

    tracing::debug!(src = %src.display(), dst = %dstpath.display(), ?flags, "bind mount remounted");
    Ok(())
}

/// Refreshes `rootfs`'s dynamic linker cache via `ldconfig -r` (§4.1).
pub fn ldconfig_cache_update(rootfs: &Path) -> Result<(), ProvisioningError> {
    let status = Command::new("ldconfig")
        .arg("-r")
        .arg(rootfs)
        .status()
        .map_err(|_| ProvisioningError::LdconfigRefresh {
            rootfs: rootfs.to_path_buf(),
        })?;
    if !status.success() {
        return Err(ProvisioningError::LdconfigRefresh {
            rootfs: rootfs.to_path_buf(),
        });
    }
    tracing::debug!(rootfs = %rootfs.display(), "linker cache refreshed");
    Ok(())
}

/// Expands a shell glob pattern without invoking a shell (§4.1,
/// `fspathGetEntries`).
pub fn fspath_get_entries(pattern: &str) -> Vec<PathBuf> {
    glob::glob(pattern)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .collect()
}

/// Walks a symlink chain to its terminal regular file (§4.1,
/// `accelengineAttachLibs`'s inline walk). Returns the resolved path.
pub fn resolve_symlink_chain(start: &Path) -> io::Result<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let meta = fs::symlink_metadata(&current)?;
        if !meta.file_type().is_symlink() {
            return Ok(current);
        }
        let target = fs::read_link(&current)?;
        current = if target.is_absolute() {
            target
        } else {
            current
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .join(target)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fspath_get_entries_returns_empty_for_no_matches() {
        let entries = fspath_get_entries("/no/such/path/xdma*");
        assert!(entries.is_empty());
    }

    #[test]
    fn resolve_symlink_chain_follows_relative_links() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.so.1.2");
        fs::write(&real, b"stub").unwrap();
        let link1 = dir.path().join("real.so.1");
        symlink("real.so.1.2", &link1).unwrap();
        let link2 = dir.path().join("real.so");
        symlink("real.so.1", &link2).unwrap();

        let resolved = resolve_symlink_chain(&link2).unwrap();
        assert_eq!(resolved, real);
    }
}

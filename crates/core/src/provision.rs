//! Container provisioner: top-level orchestrator for the `configure`
//! command (§4.8).

use std::path::Path;

use crate::device::AttachedSet;
use crate::error::ProvisioningError;
use crate::fs::{self, CreateKind};
use crate::namespace::NamespaceGuard;
use crate::sysfs;
use crate::world::World;

const SYSFS_CGROUP_DEV_PATH: &str = "sys/fs/cgroup/devices";
const SYSFS_CGROUP_DEV_ALLOW: &str = "devices.allow";
const MIB: u64 = 1024 * 1024;
const GIB: u64 = MIB * 1024;

/// Adjusts host-side device node permissions (§4.8 step 1, `hostSetup`).
/// Runs before entering the container namespace.
fn host_setup(world: &World, attached: &AttachedSet) -> Result<(), ProvisioningError> {
    for &idx in &attached.indices {
        let device = &world.devices[idx];
        for devpath in &device.devpaths {
            sysfs::chmod_world_rw(devpath)?;
        }

        let engine = world
            .engines
            .get(device.engine)
            .expect("device always references a registered engine");
        for syspath in [&device.syspath_accel, &device.syspath_engine]
            .into_iter()
            .flatten()
        {
            for entry in engine.sysentries_rw {
                sysfs::chmod_world_rw(&syspath.join(entry))?;
            }
        }

        tracing::info!(bdf = %device.bdf, "host files user permissions set");
    }
    Ok(())
}

/// Mounts every engine asset (bind mounts + resolved libraries) needed by
/// the attached devices' engines (§4.8 step 3).
fn mount_engine_assets(world: &World, rootfs: &Path, attached: &AttachedSet) -> Result<(), ProvisioningError> {
    let mut engines_needed: Vec<_> = attached
        .indices
        .iter()
        .map(|&idx| world.devices[idx].engine)
        .collect();
    engines_needed.sort_by_key(|tag| tag.as_str());
    engines_needed.dedup();

    for tag in engines_needed {
        let engine = world
            .engines
            .get(tag)
            .expect("attached device references a registered engine");

        for mount in &engine.mounts {
            fs::mount_file(
                rootfs,
                &mount.src,
                Some(&mount.dst),
                false,
                mount.rdonly,
                false,
            )?;
        }
        if !engine.mounts.is_empty() {
            tracing::info!(engine = tag.as_str(), "mount paths attached to container");
        }

        for lib_path in engine.lib_paths.iter().flatten() {
            attach_library(rootfs, lib_path)?;
        }
        if !engine.lib_paths.is_empty() {
            tracing::info!(engine = tag.as_str(), "driver libraries attached to container");
        }
    }

    Ok(())
}

/// Resolves `lib_path`'s symlink chain, bind-mounts the terminal regular
/// file, and recreates the original name as a symlink inside the rootfs
/// if it differed from the resolved path (§4.1, §4.8 step 3).
fn attach_library(rootfs: &Path, lib_path: &Path) -> Result<(), ProvisioningError> {
    let resolved = fs::resolve_symlink_chain(lib_path).map_err(|source| ProvisioningError::StatDevice {
        path: lib_path.to_path_buf(),
        source,
    })?;

    fs::mount_file(rootfs, &resolved, None, false, true, false)?;

    if resolved != lib_path {
        let basename = resolved
            .file_name()
            .expect("resolved library path always has a file name");
        let rel = lib_path.strip_prefix("/").unwrap_or(lib_path);
        let dstpath = rootfs.join(rel);
        fs::file_create(
            &dstpath,
            CreateKind::Symlink,
            Some(Path::new(basename)),
            0,
            0,
            0o777,
        )?;
        tracing::debug!(lib = %lib_path.display(), "library symlink created");
    }

    Ok(())
}

/// Whitelists every attached device node in the container's device cgroup
/// and bind-mounts device nodes and sysfs paths into the rootfs (§4.8
/// step 5, `allowDevices`).
fn allow_devices(world: &World, rootfs: &Path, attached: &AttachedSet) -> Result<(), ProvisioningError> {
    let cgroup_devices_path = rootfs.join(SYSFS_CGROUP_DEV_PATH);
    let guard = sysfs::CgroupRemountGuard::enter(cgroup_devices_path.clone())?;
    let allow_path = guard.path().join(SYSFS_CGROUP_DEV_ALLOW);

    for &idx in &attached.indices {
        let device = &world.devices[idx];

        for devpath in &device.devpaths {
            let (major, minor) = sysfs::device_major_minor(devpath)?;
            let entry = format!("c {major}:{minor} rwm");
            sysfs::write_string(&allow_path, &entry).map_err(|source| ProvisioningError::CgroupWrite {
                path: allow_path.clone(),
                source,
            })?;

            fs::mount_file(rootfs, devpath, None, true, false, true)?;
            tracing::info!(bdf = %device.bdf, major, minor, "device node whitelisted");
        }

        if let Some(syspath) = &device.syspath_accel {
            fs::mount_file(rootfs, syspath, None, false, false, true)?;
        }
        if let Some(syspath) = &device.syspath_engine {
            fs::mount_file(rootfs, syspath, None, false, false, true)?;
        }
    }

    Ok(())
}

/// Sets memlock rlimit and hugetlb cgroup limits sized to the attached
/// devices' aggregate hugepage requirements (§4.8 step 6).
fn limit_resources(world: &World, pid: i32, attached: &AttachedSet) -> Result<(), ProvisioningError> {
    let mut total_2m = 0u32;
    let mut total_1g = 0u32;

    for &idx in &attached.indices {
        let device = &world.devices[idx];
        let engine = world
            .engines
            .get(device.engine)
            .expect("device always references a registered engine");
        if let Some(binding) = engine.binding_for(device.func_id) {
            total_2m += binding.hugepage_2m;
            total_1g += binding.hugepage_1g;
        }
    }

    let memlock_bytes = (total_2m as u64 * MIB * 2) + (total_1g as u64 * GIB);
    sysfs::rlimit_memlock(pid, memlock_bytes)?;
    sysfs::limit_hugetlb(pid, total_2m, total_1g)?;

    tracing::info!(
        pid, memlock_bytes, hugepage_2m = total_2m, hugepage_1g = total_1g,
        "container memory limits configured"
    );
    Ok(())
}

/// Top-level `configure` sequence (§4.8): host setup, namespace entry,
/// engine asset mounts, linker cache refresh, device cgroup whitelisting,
/// and resource limits. The namespace is always restored, even on error.
pub fn provision_container(
    world: &World,
    pid: i32,
    rootfs: &Path,
    attached: &AttachedSet,
) -> Result<(), ProvisioningError> {
    host_setup(world, attached)?;

    let guard = NamespaceGuard::enter(pid)?;

    let result = (|| -> Result<(), ProvisioningError> {
        mount_engine_assets(world, rootfs, attached)?;
        fs::ldconfig_cache_update(rootfs)?;
        allow_devices(world, rootfs, attached)?;
        limit_resources(world, pid, attached)?;
        Ok(())
    })();

    match (result, guard.leave()) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(err), Ok(())) => Err(err),
        (Ok(()), Err(leave_err)) => Err(leave_err),
        (Err(err), Err(leave_err)) => {
            tracing::error!(%leave_err, "also failed to restore default mount namespace");
            Err(err)
        }
    }
}

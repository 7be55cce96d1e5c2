use std::path::PathBuf;

/// Taxonomy of failure kinds the provisioning engine can report.
///
/// `EngineUnavailable` is the only recoverable kind: the registry logs it
/// and simply drops the engine's devices from the catalog rather than
/// propagating it as a [`HookError`].
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("enumeration error: {0}")]
    Enumeration(#[from] EnumerationError),

    #[error("selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    #[error("provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration has no acceleration functions")]
    NoFunctions,

    #[error("configuration has no accelerator engines")]
    NoEngines,
}

#[derive(Debug, thiserror::Error)]
pub enum EnumerationError {
    #[error("engine {engine}: sysfs walk failed at {path}: {source}")]
    Sysfs {
        engine: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine {engine}: failed to parse BDF from symlink {path}")]
    BadSymlink { engine: &'static str, path: PathBuf },

    #[error("engine {engine}: malformed AFU id for device {bdf}")]
    MalformedAfuId { engine: &'static str, bdf: String },

    #[error("engine {engine}: port {bdf}: failed to resolve attached FME device")]
    MissingFme { engine: &'static str, bdf: String },

    #[error("engine {engine}: vendor library call failed: {message}")]
    VendorLibrary { engine: &'static str, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("device token '{0}' does not match any enumerated accelerator")]
    UnknownDevice(String),

    #[error("function '{0}' is not in the acceleration function catalog")]
    UnknownFunction(String),

    #[error("device {bdf} does not carry function '{function}' and is not reconfigurable")]
    NotReconfigurable { bdf: String, function: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BitstreamError {
    #[error("device {bdf}: loader '{command}' exited with status {status}")]
    LoaderFailed {
        bdf: String,
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("device {bdf}: loader '{command}' could not be spawned: {source}")]
    LoaderSpawn {
        bdf: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("device {bdf}: expected hardware id '{expected}' after reload but found '{actual}'")]
    HardwareIdMismatch {
        bdf: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("failed to enter mount namespace of pid {pid}: {source}")]
    EnterNamespace { pid: i32, source: std::io::Error },

    #[error("failed to restore original mount namespace: {source}")]
    LeaveNamespace { source: std::io::Error },

    #[error("mount of {src} onto {dst} failed: {source}")]
    Mount {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create destination path {path}: {source}")]
    CreatePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to chmod {path}: {source}")]
    Chmod {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to find cgroup '{controller}' for pid {pid}: {source}")]
    CgroupLookup {
        pid: i32,
        controller: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remount cgroup hierarchy at {path}: {source}")]
    CgroupRemount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write cgroup attribute {path}: {source}")]
    CgroupWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set resource limit {resource} for pid {pid}: {source}")]
    Rlimit {
        pid: i32,
        resource: &'static str,
        source: std::io::Error,
    },

    #[error("failed to stat device node {path}: {source}")]
    StatDevice {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to refresh linker cache for {rootfs}")]
    LdconfigRefresh { rootfs: PathBuf },

    #[error("failed to switch filesystem identity to uid={uid} gid={gid}")]
    FsIdSwitch { uid: u32, gid: u32 },
}

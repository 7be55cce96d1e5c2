//! Container accelerator provisioning engine: discovers installed FPGA
//! engines, enumerates their devices, reconciles requested functions, and
//! grafts the result into a container's namespace, device cgroup, and
//! resource limits.

pub mod catalog;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod fs;
pub mod namespace;
pub mod provision;
pub mod selector;
pub mod sysfs;
pub mod world;

pub use error::HookError;
pub use world::World;

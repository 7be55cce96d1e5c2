//! Accelerator engines and the engine registry (§4.5, §4.6).

pub mod intel;
pub mod xilinx;

use std::path::PathBuf;

use crate::device::AccelDevice;
use crate::error::{BitstreamError, EnumerationError};

/// Which of the two statically-known accelerator back-ends an [`Engine`] is.
///
/// A fixed, small enum keyed table stands in for the source's function
/// pointer struct and array indexed by `e_accelengine` (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineTag {
    Intel,
    Xilinx,
}

impl EngineTag {
    pub const ALL: [EngineTag; 2] = [EngineTag::Intel, EngineTag::Xilinx];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineTag::Intel => "IntelOPAE",
            EngineTag::Xilinx => "XilinxAWS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(name))
    }
}

/// Per-engine mapping from a logical function to the vendor artefact needed
/// to realise it (§3 `EngineFunctionBinding`).
#[derive(Debug, Clone)]
pub struct EngineFunctionBinding {
    pub func_id: i32,
    /// UUID for Intel, AGFI id for Xilinx.
    pub hwid: String,
    pub bitstream_file: String,
    pub hugepage_2m: u32,
    pub hugepage_1g: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountPath<'a> {
    pub src: &'a std::path::Path,
    pub dst: &'a std::path::Path,
    pub rdonly: bool,
}

#[derive(Debug, Clone)]
pub struct OwnedMountPath {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub rdonly: bool,
}

/// Per-engine capability set: enumerate its devices, load a bitstream on one
/// of them. Replaces the source's `t_accelOps` function-pointer pair with a
/// trait object (§9).
pub trait EngineOps: std::fmt::Debug {
    fn enumerate(
        &self,
        bindings: &[EngineFunctionBinding],
        fme_arena: &mut Vec<AccelDevice>,
    ) -> Result<Vec<AccelDevice>, EnumerationError>;

    /// Loads `binding` onto `device`, returning the hardware id read back
    /// after the reload (must equal `binding.hwid` or the caller treats it
    /// as fatal).
    fn load_bitstream(
        &self,
        device: &AccelDevice,
        binding: &EngineFunctionBinding,
        bitstream_dir: &std::path::Path,
    ) -> Result<String, BitstreamError>;
}

/// A named accelerator back-end (§3 `Engine`).
#[derive(Debug)]
pub struct Engine {
    pub tag: EngineTag,
    pub bitstream_dir: PathBuf,
    pub reconfig_physfn: bool,
    pub reconfig_virtfn: bool,
    pub sriov_mode: bool,
    pub mounts: Vec<OwnedMountPath>,
    /// Sysfs attribute paths, relative to a device's syspath, that must be
    /// made world read/write on the host.
    pub sysentries_rw: &'static [&'static str],
    /// Required shared-library filenames.
    pub required_libs: &'static [&'static str],
    /// Resolved absolute path for each entry in `required_libs`, filled in
    /// by [`EngineRegistry::probe_installed`] (invariant I3).
    pub lib_paths: Vec<Option<PathBuf>>,
    pub bindings: Vec<EngineFunctionBinding>,
    pub ops: Box<dyn EngineOps + Send + Sync>,
}

impl Engine {
    /// True iff every required library was resolved (invariant I3). An
    /// engine with no required libraries (Xilinx, which resolves its vendor
    /// library lazily at enumeration time) is trivially installed.
    pub fn installed(&self) -> bool {
        self.lib_paths.len() == self.required_libs.len()
            && self.lib_paths.iter().all(Option::is_some)
    }

    pub fn binding_for(&self, func_id: i32) -> Option<&EngineFunctionBinding> {
        self.bindings.iter().find(|b| b.func_id == func_id)
    }

    pub fn binding_for_hwid(&self, hwid: &str) -> i32 {
        self.bindings
            .iter()
            .find(|b| b.hwid.eq_ignore_ascii_case(hwid))
            .map(|b| b.func_id)
            .unwrap_or(crate::catalog::FUNC_UNKNOWN)
    }

    pub fn supports_reconfig(&self, kind: crate::device::PciFunctionKind) -> bool {
        match kind {
            crate::device::PciFunctionKind::Physical => self.reconfig_physfn,
            crate::device::PciFunctionKind::Virtual => self.reconfig_virtfn,
        }
    }
}

/// Fixed-size sparse table of engines, keyed by [`EngineTag`] (§4.6, §9).
#[derive(Debug, Default)]
pub struct EngineRegistry {
    slots: [Option<Engine>; 2],
}

impl EngineRegistry {
    pub fn insert(&mut self, engine: Engine) {
        let slot = match engine.tag {
            EngineTag::Intel => 0,
            EngineTag::Xilinx => 1,
        };
        self.slots[slot] = Some(engine);
    }

    pub fn get(&self, tag: EngineTag) -> Option<&Engine> {
        self.slots[Self::index(tag)].as_ref()
    }

    pub fn get_mut(&mut self, tag: EngineTag) -> Option<&mut Engine> {
        self.slots[Self::index(tag)].as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Engine> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    fn index(tag: EngineTag) -> usize {
        match tag {
            EngineTag::Intel => 0,
            EngineTag::Xilinx => 1,
        }
    }

    /// Probes every registered engine for installation status by resolving
    /// its required library names against a pre-parsed `ldconfig -p`
    /// listing (name -> resolved path). Implements invariant I3 / property
    /// P2.
    pub fn probe_installed(&mut self, ld_cache: &std::collections::HashMap<String, PathBuf>) {
        for engine in self.slots.iter_mut().flatten() {
            engine.lib_paths = engine
                .required_libs
                .iter()
                .map(|name| ld_cache.get(*name).cloned())
                .collect();

            if engine.installed() {
                tracing::debug!(engine = engine.tag.as_str(), "engine installed");
            } else {
                let missing: Vec<_> = engine
                    .required_libs
                    .iter()
                    .zip(engine.lib_paths.iter())
                    .filter(|(_, path)| path.is_none())
                    .map(|(name, _)| *name)
                    .collect();
                tracing::info!(
                    engine = engine.tag.as_str(),
                    ?missing,
                    "engine not installed: required libraries missing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_tag_lookup_is_case_insensitive() {
        assert_eq!(EngineTag::from_name("intelopae"), Some(EngineTag::Intel));
        assert_eq!(EngineTag::from_name("XilinxAWS"), Some(EngineTag::Xilinx));
        assert_eq!(EngineTag::from_name("nvidia"), None);
    }
}

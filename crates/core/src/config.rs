//! Configuration document loader (§4.4).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::FunctionCatalog;
use crate::engine::{Engine, EngineFunctionBinding, EngineTag, OwnedMountPath};
use crate::engine::intel::IntelOpaeOps;
use crate::engine::xilinx::XilinxAwsOps;
use crate::error::ConfigError;

const XILINX_SDX_RTE_DEFAULT: &str = "/opt/Xilinx/SDx/rte";

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    global: RawGlobal,
    #[serde(rename = "accelerationFunctions", default)]
    acceleration_functions: Vec<RawFunction>,
    #[serde(rename = "acceleratorEngines", default)]
    accelerator_engines: Vec<RawEngine>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGlobal {
    loglevel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawEngine {
    name: String,
    #[serde(rename = "bitstreamLocation", default)]
    bitstream_location: String,
    #[serde(rename = "partialConfigPhysfn", default)]
    partial_config_physfn: bool,
    #[serde(rename = "partialConfigVirtfn", default)]
    partial_config_virtfn: bool,
    #[serde(rename = "activateSriov", default)]
    activate_sriov: bool,
    #[serde(rename = "xilinxSdxRTE", default)]
    xilinx_sdx_rte: Option<String>,
    #[serde(default)]
    functions: Vec<RawEngineFunction>,
}

#[derive(Debug, Deserialize)]
struct RawEngineFunction {
    name: String,
    #[serde(rename = "hwID", default)]
    hw_id: String,
    #[serde(rename = "hugepage2M", default)]
    hugepage_2m: u32,
    #[serde(rename = "hugepage1G", default)]
    hugepage_1g: u32,
    #[serde(rename = "bistreamFile", default)]
    bitstream_file: String,
}

/// Parsed outcome of the configuration document: the function catalog and
/// a fully-populated set of statically-registered engines.
pub struct LoadedConfig {
    pub functions: FunctionCatalog,
    pub engines: Vec<Engine>,
    /// `global.loglevel`, mapped later onto a `tracing::Level` (§4.10)
    /// unless the command line overrides it.
    pub loglevel: Option<String>,
}

/// Loads and parses the configuration document at `path` (§4.4). The path
/// is a parameter rather than a constant so the loader is unit-testable
/// against fixtures; the CLI binary always calls it with the fixed
/// `/etc/acceleration.json`.
pub fn load(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let raw_bytes = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawConfig =
        serde_json::from_str(&raw_bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if raw.acceleration_functions.is_empty() {
        return Err(ConfigError::NoFunctions);
    }
    if raw.accelerator_engines.is_empty() {
        return Err(ConfigError::NoEngines);
    }

    let mut builder = FunctionCatalog::builder();
    for function in &raw.acceleration_functions {
        builder.push(function.name.clone(), function.description.clone());
    }
    let functions = builder.build();

    let mut engines = register_static_engines();

    for raw_engine in raw.accelerator_engines {
        let Some(tag) = EngineTag::from_name(&raw_engine.name) else {
            tracing::warn!(engine = %raw_engine.name, "unknown engine: ignored");
            continue;
        };
        let engine = engines
            .iter_mut()
            .find(|e| e.tag == tag)
            .expect("statically registered engines cover every EngineTag");

        engine.bitstream_dir = PathBuf::from(raw_engine.bitstream_location);
        engine.reconfig_physfn = raw_engine.partial_config_physfn;
        engine.reconfig_virtfn = raw_engine.partial_config_virtfn;
        engine.sriov_mode = raw_engine.activate_sriov;

        if tag == EngineTag::Xilinx {
            let src = raw_engine
                .xilinx_sdx_rte
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| XILINX_SDX_RTE_DEFAULT.to_string());
            engine.mounts = vec![OwnedMountPath {
                src: PathBuf::from(&src),
                dst: PathBuf::from(XILINX_SDX_RTE_DEFAULT),
                rdonly: true,
            }];
        }

        if raw_engine.functions.is_empty() {
            tracing::warn!(engine = %raw_engine.name, "no acceleration function found");
        }

        engine.bindings = raw_engine
            .functions
            .into_iter()
            .map(|raw_fn| {
                let func_id = functions.name_to_index(&raw_fn.name);
                if func_id == crate::catalog::FUNC_UNKNOWN {
                    tracing::warn!(
                        engine = %engine.tag.as_str(), function = %raw_fn.name,
                        "unknown function: ignored"
                    );
                }
                EngineFunctionBinding {
                    func_id,
                    hwid: raw_fn.hw_id,
                    bitstream_file: raw_fn.bitstream_file,
                    hugepage_2m: raw_fn.hugepage_2m,
                    hugepage_1g: raw_fn.hugepage_1g,
                }
            })
            .collect();
    }

    Ok(LoadedConfig {
        functions,
        engines,
        loglevel: raw.global.loglevel,
    })
}

fn register_static_engines() -> Vec<Engine> {
    vec![
        Engine {
            tag: EngineTag::Intel,
            bitstream_dir: PathBuf::new(),
            reconfig_physfn: false,
            reconfig_virtfn: false,
            sriov_mode: false,
            mounts: Vec::new(),
            sysentries_rw: &["userclk_freqcmd", "userclk_freqcntrcmd", "errors/clear"],
            required_libs: &["libopae-c.so", "libopae-c++.so"],
            lib_paths: Vec::new(),
            bindings: Vec::new(),
            ops: Box::new(IntelOpaeOps::new()),
        },
        Engine {
            tag: EngineTag::Xilinx,
            bitstream_dir: PathBuf::new(),
            reconfig_physfn: true,
            reconfig_virtfn: false,
            sriov_mode: false,
            mounts: Vec::new(),
            sysentries_rw: &["resource0", "resource4"],
            required_libs: &[],
            lib_paths: Vec::new(),
            bindings: Vec::new(),
            ops: Box::new(XilinxAwsOps::new()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_functions_and_engine_bindings() {
        let file = write_fixture(
            r#"{
                "global": { "loglevel": "debug" },
                "accelerationFunctions": [
                    { "name": "gzip", "description": "gzip compression" },
                    { "name": "sha512", "description": "sha512 hashing" }
                ],
                "acceleratorEngines": [
                    {
                        "name": "IntelOPAE",
                        "bitstreamLocation": "/opt/bitstreams",
                        "partialConfigPhysfn": true,
                        "functions": [
                            { "name": "gzip", "hwID": "d8424dc4-a4a3-4c34-afe9-23ad51cb2cba",
                              "hugepage2M": 4, "bistreamFile": "gzip.gbs" }
                        ]
                    }
                ]
            }"#,
        );

        let loaded = load(file.path()).unwrap();
        assert_eq!(loaded.loglevel.as_deref(), Some("debug"));
        assert_eq!(loaded.functions.len(), 2);

        let intel = loaded
            .engines
            .iter()
            .find(|e| e.tag == EngineTag::Intel)
            .unwrap();
        assert!(intel.reconfig_physfn);
        assert_eq!(intel.bindings.len(), 1);
        assert_eq!(intel.bindings[0].func_id, loaded.functions.name_to_index("gzip"));
    }

    #[test]
    fn xilinx_engine_gets_implicit_sdx_rte_mount() {
        let file = write_fixture(
            r#"{
                "accelerationFunctions": [{ "name": "gzip", "description": "" }],
                "acceleratorEngines": [{ "name": "XilinxAWS", "bitstreamLocation": "" }]
            }"#,
        );
        let loaded = load(file.path()).unwrap();
        let xilinx = loaded
            .engines
            .iter()
            .find(|e| e.tag == EngineTag::Xilinx)
            .unwrap();
        assert_eq!(xilinx.mounts.len(), 1);
        assert_eq!(xilinx.mounts[0].src, PathBuf::from(XILINX_SDX_RTE_DEFAULT));
        assert!(xilinx.mounts[0].rdonly);
    }

    #[test]
    fn unknown_engine_name_is_ignored() {
        let file = write_fixture(
            r#"{
                "accelerationFunctions": [{ "name": "gzip", "description": "" }],
                "acceleratorEngines": [{ "name": "NvidiaCuda", "bitstreamLocation": "" }]
            }"#,
        );
        let loaded = load(file.path()).unwrap();
        assert!(loaded.engines.iter().all(|e| e.bindings.is_empty()));
    }

    #[test]
    fn missing_functions_is_an_error() {
        let file = write_fixture(r#"{"acceleratorEngines": []}"#);
        assert!(matches!(load(file.path()), Err(ConfigError::NoFunctions)));
    }
}

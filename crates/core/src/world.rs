//! The process-wide, explicitly-constructed state: function catalog,
//! engine registry, enumerated device catalog (§3 `World`, §9).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::catalog::FunctionCatalog;
use crate::config::LoadedConfig;
use crate::device::AccelDevice;
use crate::engine::EngineRegistry;
use crate::error::EnumerationError;

pub struct World {
    pub functions: FunctionCatalog,
    pub engines: EngineRegistry,
    pub devices: Vec<AccelDevice>,
}

impl World {
    /// Loads the configuration at `config_path`, probes engine
    /// installation against the linker cache, and enumerates devices for
    /// every installed engine (C4 -> C6 -> C5, §2 control flow).
    pub fn build(config_path: &Path) -> Result<Self, crate::error::HookError> {
        let LoadedConfig {
            functions,
            engines,
            loglevel: _,
        } = crate::config::load(config_path)?;

        let mut registry = EngineRegistry::default();
        for engine in engines {
            registry.insert(engine);
        }

        let ld_cache = parse_ldconfig_cache();
        registry.probe_installed(&ld_cache);

        let devices = enumerate_all(&mut registry).map_err(crate::error::HookError::from)?;

        Ok(World {
            functions,
            engines: registry,
            devices,
        })
    }
}

/// Runs `ldconfig -p` and parses its `soname => resolved path` lines
/// (§4.6, `findInstalledEngines`).
fn parse_ldconfig_cache() -> HashMap<String, PathBuf> {
    let mut cache = HashMap::new();

    let output = match Command::new("ldconfig").arg("-p").output() {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(%err, "failed to run ldconfig -p");
            return cache;
        }
    };

    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        let line = line.trim();
        let Some((name, rest)) = line.split_once(' ') else {
            continue;
        };
        let Some(path) = rest.rsplit(' ').next() else {
            continue;
        };
        cache.insert(name.to_string(), PathBuf::from(path));
    }

    cache
}

fn enumerate_all(registry: &mut EngineRegistry) -> Result<Vec<AccelDevice>, EnumerationError> {
    let mut fme_arena: Vec<AccelDevice> = Vec::new();
    let mut devices = Vec::new();

    for engine in registry.iter() {
        if !engine.installed() {
            continue;
        }
        let mut found = engine.ops.enumerate(&engine.bindings, &mut fme_arena)?;
        devices.append(&mut found);
    }

    devices.append(&mut fme_arena);
    Ok(devices)
}

//! Device/function selector: parses the requested-device and
//! requested-function lists and reconciles them against the enumerated
//! catalog (§4.7).

use crate::device::{AttachedSet, PciBdf};
use crate::error::{HookError, SelectionError};
use crate::world::World;

/// Parses a comma-separated device list (`all`, a `bus:dev.func` triple,
/// or a decimal slot id) into an [`AttachedSet`] of indices into
/// `world.devices` (§4.7).
pub fn select_devices(world: &World, devices: &str) -> Result<AttachedSet, SelectionError> {
    let mut attached = AttachedSet::default();

    for token in devices.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if token.eq_ignore_ascii_case("all") {
            attached.indices = (0..world.devices.len()).collect();
            tracing::info!(count = attached.len(), "all devices attached");
            return Ok(attached);
        }

        let found = if let Some(bdf) = PciBdf::parse(token) {
            world.devices.iter().position(|d| d.bdf == bdf)
        } else if let Ok(slot_id) = token.parse::<i32>() {
            world.devices.iter().position(|d| d.slot_id == slot_id)
        } else {
            None
        };

        match found {
            Some(idx) => {
                let device = &world.devices[idx];
                tracing::info!(
                    bdf = %device.bdf, engine = device.engine.as_str(), "device attached"
                );
                attached.indices.push(idx);
            }
            None => return Err(SelectionError::UnknownDevice(token.to_string())),
        }
    }

    Ok(attached)
}

/// Parses a comma-separated function list and reconciles each attached
/// device with its assigned function, reloading bitstreams as needed
/// (§4.7). An empty `functions` string preserves each device's current
/// function and is not an error.
pub fn reconcile_functions(
    world: &mut World,
    attached: &AttachedSet,
    functions: &str,
) -> Result<(), HookError> {
    let mut func_ids = Vec::new();
    for token in functions.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let func_id = world.functions.name_to_index(token);
        if func_id == crate::catalog::FUNC_UNKNOWN {
            return Err(SelectionError::UnknownFunction(token.to_string()).into());
        }
        func_ids.push(func_id);
    }

    if func_ids.is_empty() {
        tracing::warn!("acceleration function(s) not provided: use accelerators current functions");
        return Ok(());
    }

    // Fewer functions than devices: replicate the last one across the tail.
    let last = *func_ids.last().unwrap();
    while func_ids.len() < attached.len() {
        func_ids.push(last);
    }

    for (&idx, &func_id) in attached.indices.iter().zip(func_ids.iter()) {
        let device = &world.devices[idx];
        if device.has_func(func_id) {
            tracing::info!(
                bdf = %device.bdf, function = world.functions.index_to_name(func_id),
                "function already loaded"
            );
            continue;
        }

        let engine = world
            .engines
            .get(device.engine)
            .expect("device always references a registered engine");
        if !engine.supports_reconfig(device.pcifn_type) {
            return Err(SelectionError::NotReconfigurable {
                bdf: device.bdf.to_string(),
                function: world.functions.index_to_name(func_id).to_string(),
            }
            .into());
        }

        let binding = engine
            .binding_for(func_id)
            .ok_or_else(|| SelectionError::UnknownFunction(world.functions.index_to_name(func_id).to_string()))?
            .clone();

        tracing::info!(
            bdf = %device.bdf, function = %world.functions.index_to_name(func_id), "loading function"
        );
        let new_hwid = engine
            .ops
            .load_bitstream(device, &binding, &engine.bitstream_dir)?;

        let device = &mut world.devices[idx];
        device.func_id = func_id;
        device.func_hwid = new_hwid;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FunctionCatalog;
    use crate::device::{AccelDevice, PciFunctionKind};
    use crate::engine::EngineTag;
    use crate::world::World;

    fn device(bdf: PciBdf, slot_id: i32) -> AccelDevice {
        AccelDevice {
            engine: EngineTag::Intel,
            func_id: crate::catalog::FUNC_UNKNOWN,
            func_hwid: String::new(),
            devpaths: vec![],
            syspath_accel: None,
            syspath_engine: None,
            slot_id,
            vendor_id: 0,
            device_id: 0,
            bdf,
            pcifn_type: PciFunctionKind::Physical,
            link: None,
        }
    }

    fn world_with_devices(devices: Vec<AccelDevice>) -> World {
        World {
            functions: FunctionCatalog::builder().push("gzip", "").build(),
            engines: crate::engine::EngineRegistry::default(),
            devices,
        }
    }

    #[test]
    fn selects_all_devices() {
        let world = world_with_devices(vec![
            device(PciBdf::new(6, 0, 0), 0),
            device(PciBdf::new(6, 0, 1), 1),
        ]);
        let attached = select_devices(&world, "all").unwrap();
        assert_eq!(attached.len(), 2);
    }

    #[test]
    fn selects_by_bdf_and_slot_id() {
        let world = world_with_devices(vec![device(PciBdf::new(6, 0, 0), 3)]);
        assert_eq!(select_devices(&world, "06:00.0").unwrap().len(), 1);
        assert_eq!(select_devices(&world, "3").unwrap().len(), 1);
    }

    #[test]
    fn unknown_device_token_is_an_error() {
        let world = world_with_devices(vec![]);
        assert!(matches!(
            select_devices(&world, "99:00.0"),
            Err(SelectionError::UnknownDevice(_))
        ));
    }
}

//! Intel FPGA engine: enumerates AFU ports/FMEs directly from sysfs, since
//! libopae does not itself export the sysfs layout (§4.5.1).

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{BitstreamError, EngineFunctionBinding, EngineOps};
use crate::catalog::FUNC_UNKNOWN;
use crate::device::{AccelDevice, DeviceLink, PciBdf, PciFunctionKind};
use crate::error::EnumerationError;
use crate::sysfs;

const ENGINE_TAG: &str = "IntelOPAE";
const SYS_FPGA_CLASS_PATH: &str = "/sys/class/fpga";
const UUID_LEN: usize = 32;

#[derive(Debug, Default)]
pub struct IntelOpaeOps;

impl IntelOpaeOps {
    pub fn new() -> Self {
        Self
    }
}

/// Parses the terminal `domain:bus:dev.func` of a `device` symlink target
/// (e.g. `../../../0000:06:00.0`) into its (bus, device, function) triple.
fn bdf_from_symlink(link: &Path) -> Result<PciBdf, EnumerationError> {
    let target = std::fs::read_link(link).map_err(|source| EnumerationError::Sysfs {
        engine: ENGINE_TAG,
        path: link.to_path_buf(),
        source,
    })?;
    let name = target
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| EnumerationError::BadSymlink {
            engine: ENGINE_TAG,
            path: link.to_path_buf(),
        })?;

    // name looks like "0000:06:00.0": domain:bus:dev.func
    let (head, func_str) = name
        .rsplit_once('.')
        .ok_or_else(|| EnumerationError::BadSymlink {
            engine: ENGINE_TAG,
            path: link.to_path_buf(),
        })?;
    let mut parts = head.rsplit(':');
    let dev_str = parts.next();
    let bus_str = parts.next();
    match (bus_str, dev_str, func_str) {
        (Some(bus), Some(dev), func) => {
            let bus = u8::from_str_radix(bus, 16).ok();
            let dev = u8::from_str_radix(dev, 16).ok();
            let func = u8::from_str_radix(func, 16).ok();
            match (bus, dev, func) {
                (Some(bus), Some(dev), Some(func)) => Ok(PciBdf::new(bus, dev, func)),
                _ => Err(EnumerationError::BadSymlink {
                    engine: ENGINE_TAG,
                    path: link.to_path_buf(),
                }),
            }
        }
        _ => Err(EnumerationError::BadSymlink {
            engine: ENGINE_TAG,
            path: link.to_path_buf(),
        }),
    }
}

/// Reformats a raw 32-hex-char `afu_id` sysfs value into the canonical
/// 8-4-4-4-12 UUID form.
fn format_afu_uuid(raw: &str) -> Option<String> {
    if raw.len() != UUID_LEN || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!(
        "{}-{}-{}-{}-{}",
        &raw[0..8],
        &raw[8..12],
        &raw[12..16],
        &raw[16..20],
        &raw[20..32]
    ))
}

fn read_afu_id(
    bindings: &[EngineFunctionBinding],
    syspath_accel: &Path,
    bdf: &PciBdf,
) -> Result<(String, i32), EnumerationError> {
    let afu_id_path = syspath_accel.join("afu_id");
    let raw = sysfs::read_string(&afu_id_path).map_err(|source| EnumerationError::Sysfs {
        engine: ENGINE_TAG,
        path: afu_id_path.clone(),
        source,
    })?;
    let hwid = format_afu_uuid(&raw).ok_or_else(|| EnumerationError::MalformedAfuId {
        engine: ENGINE_TAG,
        bdf: bdf.to_string(),
    })?;
    let func_id = bindings
        .iter()
        .find(|b| b.hwid.eq_ignore_ascii_case(&hwid))
        .map(|b| b.func_id)
        .unwrap_or(FUNC_UNKNOWN);
    Ok((hwid, func_id))
}

impl EngineOps for IntelOpaeOps {
    fn enumerate(
        &self,
        bindings: &[EngineFunctionBinding],
        fme_arena: &mut Vec<AccelDevice>,
    ) -> Result<Vec<AccelDevice>, EnumerationError> {
        let mut ports = Vec::new();

        let entries = match std::fs::read_dir(SYS_FPGA_CLASS_PATH) {
            Ok(entries) => entries,
            Err(_) => {
                tracing::warn!("sysfs FPGA class not found: check FPGA driver inserted");
                return Ok(ports);
            }
        };

        for entry in entries {
            let entry = entry.map_err(|source| EnumerationError::Sysfs {
                engine: ENGINE_TAG,
                path: PathBuf::from(SYS_FPGA_CLASS_PATH),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some((_, slot_str)) = name.rsplit_once('.') else {
                tracing::error!(entry = name, "failed to get FPGA instance id");
                continue;
            };
            let Ok(slot_id) = slot_str.parse::<i32>() else {
                tracing::error!(entry = name, "failed to get FPGA instance id");
                continue;
            };

            let sysentry = entry.path();
            let bdf = match bdf_from_symlink(&sysentry.join("device")) {
                Ok(bdf) => bdf,
                Err(err) => {
                    tracing::error!(%err, entry = name, "failed to get bdf from device symlink");
                    continue;
                }
            };

            let vendor_id =
                sysfs::read_u64(&sysentry.join("device").join("vendor")).unwrap_or(0) as u32;
            let device_id =
                sysfs::read_u64(&sysentry.join("device").join("device")).unwrap_or(0) as u32;

            let mut link = None;

            // FME device, if present: cache it for later VF->PF resolution.
            let fme_syspath = sysentry.join(format!("intel-fpga-fme.{slot_id}"));
            if fme_syspath.is_dir() {
                let fme = AccelDevice {
                    engine: crate::engine::EngineTag::Intel,
                    func_id: FUNC_UNKNOWN,
                    func_hwid: String::new(),
                    devpaths: vec![PathBuf::from(format!(
                        "/dev/intel-fpga-fme.{slot_id}"
                    ))],
                    syspath_accel: Some(fme_syspath),
                    syspath_engine: None,
                    slot_id,
                    vendor_id,
                    device_id,
                    bdf,
                    pcifn_type: PciFunctionKind::Physical,
                    link: None,
                };
                link = Some(DeviceLink(fme_arena.len()));
                tracing::info!(
                    bdf = %fme.bdf, slot = slot_id, vendor = format!("{vendor_id:04x}"),
                    device = format!("{device_id:04x}"), "new FME device"
                );
                fme_arena.push(fme);
            }

            // PORT device, if present.
            let port_syspath = sysentry.join(format!("intel-fpga-port.{slot_id}"));
            if port_syspath.is_dir() {
                let devpath = PathBuf::from(format!("/dev/intel-fpga-port.{slot_id}"));

                let (func_hwid, func_id, mut pcifn_type, mut resolved_link) =
                    match read_afu_id(bindings, &port_syspath, &bdf) {
                        Ok((hwid, fid)) => (hwid, fid, PciFunctionKind::Physical, link),
                        Err(err) => {
                            tracing::error!(%err, "failed to read AFU id");
                            continue;
                        }
                    };

                if resolved_link.is_none() {
                    // No FME co-located: this port is a VF, resolve its PF.
                    let physfn_link = port_syspath.join("device").join("physfn");
                    match bdf_from_symlink(&physfn_link) {
                        Ok(pf_bdf) => {
                            pcifn_type = PciFunctionKind::Virtual;
                            resolved_link = fme_arena
                                .iter()
                                .position(|fme| fme.bdf == pf_bdf)
                                .map(DeviceLink);
                            if resolved_link.is_none() {
                                tracing::error!(
                                    bdf = %bdf, "failed to resolve attached FME for VF port"
                                );
                                continue;
                            }
                        }
                        Err(_) => {
                            tracing::error!(bdf = %bdf, "port has neither FME nor physfn link");
                            continue;
                        }
                    }
                }

                let port = AccelDevice {
                    engine: crate::engine::EngineTag::Intel,
                    func_id,
                    func_hwid,
                    devpaths: vec![devpath],
                    syspath_accel: Some(port_syspath),
                    syspath_engine: None,
                    slot_id,
                    vendor_id,
                    device_id,
                    bdf,
                    pcifn_type,
                    link: resolved_link,
                };
                tracing::info!(
                    bdf = %port.bdf, slot = slot_id, afuid = %port.func_hwid,
                    func = port.func_id, "new PORT device"
                );
                ports.push(port);
            }
        }

        Ok(ports)
    }

    fn load_bitstream(
        &self,
        device: &AccelDevice,
        binding: &EngineFunctionBinding,
        bitstream_dir: &Path,
    ) -> Result<String, BitstreamError> {
        let bitstream_path = bitstream_dir.join(&binding.bitstream_file);
        let bus = format!("{}", device.bdf.bus);
        let dev = format!("{}", device.bdf.device);
        let func = format!("{}", device.bdf.function);
        let command_str = format!(
            "fpgaconf -b {bus} -d {dev} -f {func} {}",
            bitstream_path.display()
        );

        let status = Command::new("fpgaconf")
            .args(["-b", &bus, "-d", &dev, "-f", &func])
            .arg(&bitstream_path)
            .status()
            .map_err(|source| BitstreamError::LoaderSpawn {
                bdf: device.bdf.to_string(),
                command: command_str.clone(),
                source,
            })?;

        if !status.success() {
            return Err(BitstreamError::LoaderFailed {
                bdf: device.bdf.to_string(),
                command: command_str,
                status,
            });
        }

        let syspath = device
            .syspath_accel
            .as_ref()
            .expect("Intel port always has an accel syspath");
        let afu_id_path = syspath.join("afu_id");
        let raw = sysfs::read_string(&afu_id_path).map_err(|_| BitstreamError::HardwareIdMismatch {
            bdf: device.bdf.to_string(),
            expected: binding.hwid.clone(),
            actual: String::from("<unreadable afu_id>"),
        })?;
        let actual = format_afu_uuid(&raw).unwrap_or_default();

        if !actual.eq_ignore_ascii_case(&binding.hwid) {
            return Err(BitstreamError::HardwareIdMismatch {
                bdf: device.bdf.to_string(),
                expected: binding.hwid.clone(),
                actual,
            });
        }

        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_afu_uuid_reformats_32_hex_chars() {
        let raw = "d8424dc4a4a34c34afe923ad51cb2cba";
        assert_eq!(
            format_afu_uuid(raw),
            Some("d8424dc4-a4a3-4c34-afe9-23ad51cb2cba".to_string())
        );
    }

    #[test]
    fn format_afu_uuid_rejects_wrong_length_or_non_hex() {
        assert_eq!(format_afu_uuid("too-short"), None);
        assert_eq!(format_afu_uuid(&"z".repeat(32)), None);
    }
}

//! Xilinx AWS FPGA engine: slot/image enumeration goes through
//! `libfpga_mgmt.so`, loaded with `dlopen` exactly as the vendor SDK expects
//! (there is no sysfs-only path for AGFI image identification) (§4.5.2).

use std::ffi::{c_void, CString};
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::process::Command;

use glob::glob;

use super::{BitstreamError, EngineFunctionBinding, EngineOps};
use crate::catalog::FUNC_UNKNOWN;
use crate::device::{AccelDevice, PciBdf, PciFunctionKind};
use crate::engine::EngineTag;
use crate::error::EnumerationError;

const ENGINE_TAG: &str = "XilinxAWS";
const LIB_FPGA_MGMT: &str = "libfpga_mgmt.so";
const FPGA_SLOT_MAX: usize = 16;
const FPGA_APP_PF: usize = 0;
const FPGA_MGMT_PF: usize = 1;
const AFI_ID_LEN: usize = 64;

#[repr(C)]
#[derive(Clone, Copy)]
struct PciMapEntry {
    vendor_id: u16,
    device_id: u16,
    bus: u8,
    dev: u8,
    func: u8,
    _pad: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct FpgaSlotSpec {
    map: [PciMapEntry; 2],
}

#[repr(C)]
struct FpgaMgmtImageIds {
    afi_id: [u8; AFI_ID_LEN],
}

#[repr(C)]
struct FpgaMgmtImageInfo {
    ids: FpgaMgmtImageIds,
}

type FpgaPciGetAllSlotSpecsFn =
    unsafe extern "C" fn(*mut FpgaSlotSpec, c_int) -> c_int;
type FpgaMgmtDescribeLocalImageFn =
    unsafe extern "C" fn(c_int, *mut FpgaMgmtImageInfo, u32) -> c_int;

/// Thin RAII wrapper around a `dlopen` handle for `libfpga_mgmt.so`.
struct VendorLib {
    handle: *mut c_void,
}

impl VendorLib {
    fn open() -> Option<Self> {
        let name = CString::new(LIB_FPGA_MGMT).expect("library name has no interior NUL");
        // SAFETY: `name` is a valid NUL-terminated C string for the call's
        // duration; a null return means the vendor library is not installed.
        let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            None
        } else {
            Some(Self { handle })
        }
    }

    /// # Safety
    /// The caller must instantiate `F` as the correct function pointer type
    /// for `symbol`, matching the vendor library's actual ABI.
    unsafe fn symbol<F: Copy>(&self, symbol: &str) -> Option<F> {
        let name = CString::new(symbol).ok()?;
        let ptr = libc::dlsym(self.handle, name.as_ptr());
        if ptr.is_null() {
            None
        } else {
            Some(std::mem::transmute_copy(&ptr))
        }
    }
}

impl Drop for VendorLib {
    fn drop(&mut self) {
        // SAFETY: `handle` was returned by a successful `dlopen` above.
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

fn afi_id_to_string(raw: &[u8; AFI_ID_LEN]) -> String {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

fn describe_local_image(
    lib: &VendorLib,
    slot_id: i32,
) -> Result<FpgaMgmtImageInfo, EnumerationError> {
    let describe: FpgaMgmtDescribeLocalImageFn =
        unsafe { lib.symbol("fpga_mgmt_describe_local_image") }.ok_or_else(|| {
            EnumerationError::VendorLibrary {
                engine: ENGINE_TAG,
                message: "symbol fpga_mgmt_describe_local_image not found".into(),
            }
        })?;

    let mut info = FpgaMgmtImageInfo {
        ids: FpgaMgmtImageIds {
            afi_id: [0; AFI_ID_LEN],
        },
    };
    // SAFETY: `info` is a valid, zeroed, appropriately-sized out-parameter.
    let rc = unsafe { describe(slot_id, &mut info, 0) };
    if rc < 0 {
        return Err(EnumerationError::VendorLibrary {
            engine: ENGINE_TAG,
            message: format!("slot {slot_id}: failed to get image info"),
        });
    }
    Ok(info)
}

#[derive(Debug, Default)]
pub struct XilinxAwsOps;

impl XilinxAwsOps {
    pub fn new() -> Self {
        Self
    }
}

impl EngineOps for XilinxAwsOps {
    fn enumerate(
        &self,
        bindings: &[EngineFunctionBinding],
        _fme_arena: &mut Vec<AccelDevice>,
    ) -> Result<Vec<AccelDevice>, EnumerationError> {
        let Some(lib) = VendorLib::open() else {
            tracing::warn!(library = LIB_FPGA_MGMT, "vendor library not installed");
            return Ok(Vec::new());
        };

        let get_slots: FpgaPciGetAllSlotSpecsFn =
            unsafe { lib.symbol("fpga_pci_get_all_slot_specs") }.ok_or_else(|| {
                EnumerationError::VendorLibrary {
                    engine: ENGINE_TAG,
                    message: "symbol fpga_pci_get_all_slot_specs not found".into(),
                }
            })?;

        let mut slots = [FpgaSlotSpec {
            map: [PciMapEntry {
                vendor_id: 0,
                device_id: 0,
                bus: 0,
                dev: 0,
                func: 0,
                _pad: 0,
            }; 2],
        }; FPGA_SLOT_MAX];

        // SAFETY: `slots` is a correctly-sized, zeroed array matching the
        // vendor ABI's expected layout and capacity argument.
        let rc = unsafe { get_slots(slots.as_mut_ptr(), FPGA_SLOT_MAX as c_int) };
        if rc < 0 {
            return Err(EnumerationError::VendorLibrary {
                engine: ENGINE_TAG,
                message: "failed to get FPGA slots".into(),
            });
        }

        let mut devices = Vec::new();
        for (slot_id, slot) in slots.iter().enumerate() {
            let app_pf = slot.map[FPGA_APP_PF];
            if app_pf.vendor_id == 0 {
                continue;
            }

            let info = describe_local_image(&lib, slot_id as i32)?;
            let hwid = afi_id_to_string(&info.ids.afi_id);
            let func_id = bindings
                .iter()
                .find(|b| b.hwid.eq_ignore_ascii_case(&hwid))
                .map(|b| b.func_id)
                .unwrap_or(FUNC_UNKNOWN);

            let bdf = PciBdf::new(app_pf.bus, app_pf.dev, app_pf.func);

            let pattern = format!("/dev/xdma{slot_id}*");
            let devpaths: Vec<PathBuf> = glob(&pattern)
                .into_iter()
                .flatten()
                .filter_map(Result::ok)
                .collect();

            let mgmt_pf = slot.map[FPGA_MGMT_PF];
            let syspath_accel = Some(PathBuf::from(format!(
                "/sys/bus/pci/devices/0000:{}",
                bdf
            )));
            let syspath_engine = Some(PathBuf::from(format!(
                "/sys/bus/pci/devices/0000:{}",
                PciBdf::new(mgmt_pf.bus, mgmt_pf.dev, mgmt_pf.func)
            )));

            tracing::info!(
                bdf = %bdf, slot = slot_id, afgi = %hwid, func = func_id,
                "new XilinxAWS device"
            );

            devices.push(AccelDevice {
                engine: EngineTag::Xilinx,
                func_id,
                func_hwid: hwid,
                devpaths,
                syspath_accel,
                syspath_engine,
                slot_id: slot_id as i32,
                vendor_id: app_pf.vendor_id as u32,
                device_id: app_pf.device_id as u32,
                bdf,
                pcifn_type: PciFunctionKind::Physical,
                link: None,
            });
        }

        Ok(devices)
    }

    fn load_bitstream(
        &self,
        device: &AccelDevice,
        binding: &EngineFunctionBinding,
        _bitstream_dir: &Path,
    ) -> Result<String, BitstreamError> {
        let command_str = format!(
            "fpga-load-local-image -S {} -I {}",
            device.slot_id, binding.hwid
        );

        let status = Command::new("fpga-load-local-image")
            .args(["-S", &device.slot_id.to_string(), "-I", &binding.hwid])
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

        let actual = match VendorLib::open() {
            Some(lib) => match describe_local_image(&lib, device.slot_id) {
                Ok(info) => afi_id_to_string(&info.ids.afi_id),
                Err(_) => String::new(),
            },
            None => String::new(),
        };

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
    fn afi_id_to_string_stops_at_first_nul() {
        let mut raw = [0u8; AFI_ID_LEN];
        raw[..9].copy_from_slice(b"agfi-1234");
        assert_eq!(afi_id_to_string(&raw), "agfi-1234");
    }
}

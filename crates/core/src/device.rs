//! Enumerated accelerator devices (§3 `PciBdf`, `AccelDevice`, `AttachedSet`).

use std::path::PathBuf;

use crate::catalog::FUNC_UNKNOWN;
use crate::engine::EngineTag;

/// A PCIe (bus, device, function) triple and its canonical `bb:dd.f` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciBdf {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciBdf {
    pub fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }

    /// Parses a `bb:dd.f` string (e.g. `06:00.0`), the same format as
    /// [`std::fmt::Display`] produces.
    pub fn parse(s: &str) -> Option<Self> {
        let (bus_str, rest) = s.split_once(':')?;
        let (dev_str, fn_str) = rest.split_once('.')?;
        let bus = u8::from_str_radix(bus_str, 16).ok()?;
        let device = u8::from_str_radix(dev_str, 16).ok()?;
        let function = u8::from_str_radix(fn_str, 16).ok()?;
        Some(Self::new(bus, device, function))
    }
}

impl std::fmt::Display for PciBdf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciFunctionKind {
    Physical,
    Virtual,
}

/// Opaque, engine-private link from a device to another device in the same
/// engine's catalog (e.g. an Intel VF port pointing at its PF/FME). Modeled
/// as an arena index rather than a raw pointer (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLink(pub usize);

#[derive(Debug, Clone)]
pub struct AccelDevice {
    pub engine: EngineTag,
    /// Logical function id currently loaded, or [`FUNC_UNKNOWN`].
    pub func_id: i32,
    pub func_hwid: String,
    pub devpaths: Vec<PathBuf>,
    pub syspath_accel: Option<PathBuf>,
    pub syspath_engine: Option<PathBuf>,
    pub slot_id: i32,
    pub vendor_id: u32,
    pub device_id: u32,
    pub bdf: PciBdf,
    pub pcifn_type: PciFunctionKind,
    /// Engine-private link, e.g. Intel VF -> PF/FME (arena index).
    pub link: Option<DeviceLink>,
}

impl AccelDevice {
    pub fn has_func(&self, func_id: i32) -> bool {
        self.func_id != FUNC_UNKNOWN && self.func_id == func_id
    }
}

/// An ordered subsequence of [`AccelDevice`]s selected by the user request.
/// Each element is an index into the enumerated catalog, never a copy
/// (§3 `AttachedSet`).
#[derive(Debug, Clone, Default)]
pub struct AttachedSet {
    pub indices: Vec<usize>,
}

impl AttachedSet {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn bdf_display_matches_canonical_format() {
        let bdf = PciBdf::new(0x06, 0x00, 0);
        assert_eq!(bdf.to_string(), "06:00.0");
    }

    #[rstest]
    #[case(0x06, 0x00, 0)]
    #[case(0x1a, 0x1f, 7)]
    #[case(0xff, 0x1f, 7)]
    fn bdf_parse_roundtrips_through_display(#[case] bus: u8, #[case] device: u8, #[case] function: u8) {
        let bdf = PciBdf::new(bus, device, function);
        let parsed = PciBdf::parse(&bdf.to_string()).unwrap();
        assert_eq!(parsed, bdf);
    }

    #[rstest]
    #[case("not-a-bdf")]
    #[case("06:00")]
    #[case("06:00.zz")]
    fn bdf_parse_rejects_malformed_tokens(#[case] token: &str) {
        assert!(PciBdf::parse(token).is_none());
    }
}

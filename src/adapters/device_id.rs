//! Device identity derived from the hardware id.
//!
//! On ESP32 the hardware id is the factory MAC burned into eFuse.  From it:
//! - `hex`: every id byte as lowercase hex (`deadbeefcafe`)
//! - `short`: the last 4 hex characters (`cafe`), or all of them if shorter
//! - `name`: the advertised name `<base>-<short>`, at most 20 characters

use core::fmt::Write;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Longest advertised device name.
pub const DEVICE_NAME_MAX: usize = 20;

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_hw_id() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: `mac` is a valid 6-byte buffer for the duration of the call.
    let ret = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if ret != esp_idf_svc::sys::ESP_OK {
        log::error!("hardware id unavailable (err {}), using zero id", ret);
        mac = [0u8; 6];
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_hw_id() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Identity strings computed once at registry initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    hex: heapless::String<34>,
    short: heapless::String<4>,
    name: heapless::String<DEVICE_NAME_MAX>,
}

impl DeviceIdentity {
    /// Derive the identity from raw id bytes (at most 16 are used).
    pub fn from_id(id: &[u8], name_base: &str) -> Self {
        let mut hex = heapless::String::<34>::new();
        for b in id.iter().take(16) {
            let _ = write!(hex, "{b:02x}");
        }

        let tail = hex.len().saturating_sub(4);
        let mut short = heapless::String::<4>::new();
        let _ = short.push_str(&hex[tail..]);

        let mut name = heapless::String::<DEVICE_NAME_MAX>::new();
        for c in name_base.chars().chain(core::iter::once('-')).chain(short.chars()) {
            if name.push(c).is_err() {
                break;
            }
        }

        log::info!("NOTICE Hardware id is '{}' [{}]", hex, short);
        Self { hex, short, name }
    }

    /// Identity of this board.
    pub fn local(name_base: &str) -> Self {
        Self::from_id(&read_hw_id(), name_base)
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn short(&self) -> &str {
        &self.short
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

//! FIDO HID device enumeration.

use anyhow::{anyhow, Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

/// FIDO alliance HID usage page and usage.
const FIDO_USAGE_PAGE: u16 = 0xF1D0;
const FIDO_USAGE_U2FHID: u16 = 0x01;

/// One attached authenticator as seen during enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FidoDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product_name: Option<String>,
    pub path: String,
}

/// Lists HID interfaces on the FIDO usage page.
pub fn list_devices() -> AnyResult<Vec<FidoDevice>> {
    let api = hidapi::HidApi::new().context("Failed to initialize HID API")?;
    let mut devices = Vec::new();

    for device_info in api.device_list() {
        if device_info.usage_page() != FIDO_USAGE_PAGE
            || device_info.usage() != FIDO_USAGE_U2FHID
        {
            continue;
        }

        let device = FidoDevice {
            vendor_id: device_info.vendor_id(),
            product_id: device_info.product_id(),
            manufacturer: device_info.manufacturer_string().map(|s| s.to_string()),
            product_name: device_info.product_string().map(|s| s.to_string()),
            path: device_info.path().to_string_lossy().to_string(),
        };

        log::info!(
            "Found FIDO device: {} - VID: 0x{:04x}, PID: 0x{:04x}, Path: {}",
            device.product_name.as_deref().unwrap_or("Unknown"),
            device.vendor_id,
            device.product_id,
            device.path
        );
        devices.push(device);
    }

    log::debug!("Found {} FIDO devices", devices.len());
    Ok(devices)
}

/// Opens the HID interface behind an enumerated device.
pub fn open_device(device: &FidoDevice) -> AnyResult<hidapi::HidDevice> {
    let api = hidapi::HidApi::new().context("Failed to initialize HID API")?;
    let path = std::ffi::CString::new(device.path.as_bytes())
        .map_err(|_| anyhow!("invalid device path: {}", device.path))?;
    api.open_path(&path).context(format!(
        "Failed to open FIDO device at {}. It may be in use by another \
         application, or permissions may be missing",
        device.path
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_no_panic() {
        // Must not panic on machines without any authenticator attached.
        let _ = list_devices();
    }

    #[test]
    fn test_device_serialization() {
        let device = FidoDevice {
            vendor_id: 0x1050,
            product_id: 0x0407,
            manufacturer: Some("Yubico".to_string()),
            product_name: Some("YubiKey OTP+FIDO+CCID".to_string()),
            path: "/dev/hidraw0".to_string(),
        };
        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("\"vendor_id\":4176"));
        assert!(json.contains("YubiKey"));
    }
}

//! Lists attached FIDO authenticators and dumps device capabilities.

use anyhow::Result;
use ctap_client::ctap2::{Ctap2Hid, Ctap2Transport};
use ctap_client::device;
use ctap_client::hid::CtapHidChannel;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let devices = device::list_devices()?;
    if devices.is_empty() {
        println!("No FIDO devices found.");
        return Ok(());
    }

    for entry in devices {
        println!(
            "{} ({:04x}:{:04x}) at {}",
            entry.product_name.as_deref().unwrap_or("Unknown"),
            entry.vendor_id,
            entry.product_id,
            entry.path
        );

        let hid_device = match device::open_device(&entry) {
            Ok(dev) => dev,
            Err(e) => {
                log::warn!("Could not open {}: {}", entry.path, e);
                continue;
            }
        };
        let channel = match CtapHidChannel::open(hid_device) {
            Ok(channel) => channel,
            Err(e) => {
                log::warn!("CTAPHID init failed for {}: {}", entry.path, e);
                continue;
            }
        };

        match Ctap2Hid::new(channel) {
            Ok(mut ctap2) => match ctap2.get_info() {
                Ok(info) => {
                    println!("  versions: {}", info.versions.join(", "));
                    println!("  aaguid: {}", hex::encode(info.aaguid));
                    println!("  pin protocols: {:?}", info.pin_protocols);
                    println!(
                        "  clientPin: {}",
                        match info.options.client_pin {
                            Some(true) => "set",
                            Some(false) => "supported, not set",
                            None => "unsupported",
                        }
                    );
                }
                Err(e) => log::warn!("get_info failed: {}", e),
            },
            Err(_) => println!("  CTAP1-only device"),
        }
    }
    Ok(())
}

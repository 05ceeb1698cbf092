//! Parsing of the per-device `uevent` attribute (`KEY=VALUE` lines).

use std::collections::HashMap;

use crate::error::UeventError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent {
    pub slot: String,
    pub vendor: u16,
    pub device: u16,
    pub driver: Option<String>,
}

pub fn parse_uevent(text: &str) -> Result<Uevent, UeventError> {
    let vars: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();

    let id = vars
        .get("PCI_ID")
        .ok_or(UeventError::MissingKey("PCI_ID"))?;
    let (vendor, device) = id
        .split_once(':')
        .and_then(|(vendor, device)| {
            Some((
                u16::from_str_radix(vendor, 16).ok()?,
                u16::from_str_radix(device, 16).ok()?,
            ))
        })
        .ok_or_else(|| UeventError::MalformedId(id.to_string()))?;

    let slot = vars
        .get("PCI_SLOT_NAME")
        .filter(|slot| !slot.is_empty())
        .ok_or(UeventError::MissingKey("PCI_SLOT_NAME"))?;

    Ok(Uevent {
        slot: slot.to_string(),
        vendor,
        device,
        driver: vars.get("DRIVER").map(|driver| driver.to_string()),
    })
}

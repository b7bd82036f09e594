//! Known scanner devices
//!
//! Maps USB vendor/product id pairs to human-readable names. The built-in
//! table is compiled in and never persisted; the user table is editable at
//! runtime and round-trips through the settings blob.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Device table keyed by canonical (uppercase) vendor id
pub type DeviceTable = BTreeMap<String, VendorEntry>;

/// Vendor entry with its products keyed by canonical product id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorEntry {
    /// Manufacturer name (synthesized for user entries when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,
    /// Products by product id
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceEntry>,
}

/// A single product entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Model name (synthesized for user entries when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Resolved device description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Vendor id, 4 uppercase hex digits
    pub vendor_id: String,
    /// Product id, 4 uppercase hex digits
    pub product_id: String,
    /// Vendor name
    pub vendor_name: String,
    /// Device name
    pub device_name: String,
}

/// Where a device entry comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSource {
    /// Compiled-in table
    Builtin,
    /// User-added table
    User,
}

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Vendor or product id is not 4 hex digits
    #[error("Invalid device id (VID:{vid}, PID:{pid}): 4 hex digits required")]
    Validation {
        /// Vendor id as supplied
        vid: String,
        /// Product id as supplied
        pid: String,
    },

    /// Pair already present in the built-in table
    #[error("Device (VID:0x{vid}, PID:0x{pid}) is already in the supported devices list")]
    Duplicate {
        /// Canonical vendor id
        vid: String,
        /// Canonical product id
        pid: String,
    },

    /// Pair absent from the user table
    #[error("Device (VID:0x{vid}, PID:0x{pid}) not found in user devices list")]
    NotFound {
        /// Canonical vendor id
        vid: String,
        /// Canonical product id
        pid: String,
    },
}

/// Built-in scanners: (vendor id, vendor name, [(product id, model)])
const BUILTIN_DEVICES: &[(&str, &str, &[(&str, &str)])] = &[
    (
        "0C2E",
        "Honeywell",
        &[
            ("0CAA", "Honeywell Voyager 1200g"),
            ("0CD4", "Honeywell Xenon 1900"),
            ("0206", "Honeywell MS9520"),
            ("0CA1", "Honeywell MS7120"),
            ("0720", "Honeywell Voyager 1400g"),
            ("0CCF", "Honeywell Xenon 1902"),
            ("1014", "Honeywell Granit X5400"),
        ],
    ),
    (
        "23D0",
        "Zebra Technologies",
        &[("0C82", "Zebra DS2200"), ("0C83", "Zebra DS2200-HC")],
    ),
    (
        "05E0",
        "Zebra (formerly Symbol)",
        &[("1701", "Zebra DS4308"), ("0116", "Symbol LS2208")],
    ),
    (
        "05F9",
        "Datalogic",
        &[
            ("4204", "QuickScan Lite QW2400"),
            ("4205", "QuickScan I QD2430"),
        ],
    ),
    (
        "1EAB",
        "Newland (NLS)",
        &[("1D06", "Newland FM430"), ("1D07", "Newland FM420")],
    ),
    (
        "1F3A",
        "Atol",
        &[("1009", "Atol SB2108 Plus"), ("100A", "Atol SB2105")],
    ),
    (
        "2DD6",
        "IDZOR/Mercury",
        &[
            ("0261", "IDZOR Mercury 5"),
            ("21CA", "IDZOR Mercury 4"),
            ("228A", "IDZOR Mercury 3"),
            ("2A6A", "IDZOR Mercury 2"),
        ],
    ),
    (
        "AC90",
        "BitBook",
        &[("3003", "BitBook SC-60ABH"), ("3004", "BitBook SC-60A")],
    ),
    (
        "0647",
        "VMC",
        &[("3339", "VMC BurstScanX L"), ("3338", "VMC BurstScanX S")],
    ),
    (
        "27DD",
        "Mindeo",
        &[("0002", "Mindeo 6600-HD"), ("0003", "Mindeo 6600")],
    ),
    (
        "1A86",
        "QinHeng Electronics (CH340)",
        &[
            ("5723", "Atol USB-HID scanner (CH340 based)"),
            ("7523", "Atol USB-COM scanner (CH340 based)"),
        ],
    ),
    (
        "28E9",
        "Netum",
        &[("018A", "Netum NS-806"), ("018B", "Netum NS-808")],
    ),
    (
        "0483",
        "STMicroelectronics",
        &[("5740", "STM32 based scanners")],
    ),
    (
        "0403",
        "FTDI",
        &[
            ("6001", "Scanners with FT232RL chip"),
            ("6015", "Scanners with FT231X chip"),
        ],
    ),
    (
        "2AAF",
        "ATOL",
        &[("C002", "ATOL SB3100 BT"), ("1009", "ATOL SB3100")],
    ),
];

static BUILTIN_TABLE: LazyLock<DeviceTable> = LazyLock::new(|| {
    BUILTIN_DEVICES
        .iter()
        .map(|(vid, vendor, products)| {
            let devices = products
                .iter()
                .map(|(pid, name)| {
                    (
                        (*pid).to_string(),
                        DeviceEntry {
                            name: Some((*name).to_string()),
                        },
                    )
                })
                .collect();
            (
                (*vid).to_string(),
                VendorEntry {
                    vendor_name: Some((*vendor).to_string()),
                    devices,
                },
            )
        })
        .collect()
});

/// Check a vendor or product id against `^[0-9A-F]{4}$`, case-insensitively
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 4 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Format a numeric USB id the way the tables key it
pub fn format_id(id: u16) -> String {
    format!("{:04X}", id)
}

fn normalize(vid: &str, pid: &str) -> Result<(String, String), RegistryError> {
    if !is_valid_id(vid) || !is_valid_id(pid) {
        return Err(RegistryError::Validation {
            vid: vid.to_string(),
            pid: pid.to_string(),
        });
    }
    Ok((vid.to_ascii_uppercase(), pid.to_ascii_uppercase()))
}

fn synthesized_vendor_name(vid: &str) -> String {
    format!("Vendor {}", vid)
}

fn synthesized_device_name(vid: &str, pid: &str) -> String {
    format!("Custom device (VID:0x{}, PID:0x{})", vid, pid)
}

/// Built-in plus user device tables
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    user: DeviceTable,
}

impl DeviceRegistry {
    /// Create a registry with an empty user table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from a persisted user table
    ///
    /// Keys are canonicalized; entries with malformed ids and pairs that
    /// collide with the built-in table are dropped.
    pub fn with_user_devices(table: DeviceTable) -> Self {
        let mut user = DeviceTable::new();
        for (vid, vendor) in table {
            for (pid, device) in vendor.devices {
                let Ok((vid, pid)) = normalize(&vid, &pid) else {
                    tracing::warn!(%vid, %pid, "Dropping malformed user device entry");
                    continue;
                };
                if Self::builtin_entry(&vid, &pid).is_some() {
                    tracing::warn!(%vid, %pid, "Dropping user device that shadows a built-in entry");
                    continue;
                }
                let entry = user.entry(vid).or_insert_with(|| VendorEntry {
                    vendor_name: vendor.vendor_name.clone(),
                    devices: BTreeMap::new(),
                });
                entry.devices.insert(pid, device);
            }
        }
        Self { user }
    }

    /// The compiled-in table
    pub fn builtin_devices() -> &'static DeviceTable {
        &BUILTIN_TABLE
    }

    /// The user table
    pub fn user_devices(&self) -> &DeviceTable {
        &self.user
    }

    /// Merged view of both tables; built-in vendor names win
    pub fn all_devices(&self) -> DeviceTable {
        let mut all = BUILTIN_TABLE.clone();
        for (vid, vendor) in &self.user {
            let entry = all.entry(vid.clone()).or_insert_with(|| VendorEntry {
                vendor_name: vendor.vendor_name.clone(),
                devices: BTreeMap::new(),
            });
            for (pid, device) in &vendor.devices {
                entry.devices.insert(pid.clone(), device.clone());
            }
        }
        all
    }

    fn builtin_entry<'a>(vid: &str, pid: &str) -> Option<(&'a VendorEntry, &'a DeviceEntry)> {
        let vendor = BUILTIN_TABLE.get(vid)?;
        vendor.devices.get(pid).map(|device| (vendor, device))
    }

    fn user_entry(&self, vid: &str, pid: &str) -> Option<(&VendorEntry, &DeviceEntry)> {
        let vendor = self.user.get(vid)?;
        vendor.devices.get(pid).map(|device| (vendor, device))
    }

    /// Resolve a device by its ids
    pub fn lookup(&self, vid: &str, pid: &str) -> Option<DeviceDescriptor> {
        let (vid, pid) = normalize(vid, pid).ok()?;

        if let Some((vendor, device)) = self.user_entry(&vid, &pid) {
            return Some(DeviceDescriptor {
                vendor_name: vendor
                    .vendor_name
                    .clone()
                    .unwrap_or_else(|| synthesized_vendor_name(&vid)),
                device_name: device
                    .name
                    .clone()
                    .unwrap_or_else(|| synthesized_device_name(&vid, &pid)),
                vendor_id: vid,
                product_id: pid,
            });
        }

        let (vendor, device) = Self::builtin_entry(&vid, &pid)?;
        Some(DeviceDescriptor {
            vendor_name: vendor.vendor_name.clone().unwrap_or_default(),
            device_name: device.name.clone().unwrap_or_default(),
            vendor_id: vid,
            product_id: pid,
        })
    }

    /// Resolve a device by numeric USB ids
    pub fn lookup_ids(&self, vid: u16, pid: u16) -> Option<DeviceDescriptor> {
        self.lookup(&format_id(vid), &format_id(pid))
    }

    /// Vendor name for a vendor id, if either table knows the vendor
    pub fn vendor_name(&self, vid: &str) -> Option<String> {
        if !is_valid_id(vid) {
            return None;
        }
        let vid = vid.to_ascii_uppercase();
        if let Some(name) = BUILTIN_TABLE.get(&vid).and_then(|v| v.vendor_name.clone()) {
            return Some(name);
        }
        self.user.get(&vid).map(|vendor| {
            vendor
                .vendor_name
                .clone()
                .unwrap_or_else(|| synthesized_vendor_name(&vid))
        })
    }

    /// Whether the pair is in either table
    pub fn is_known(&self, vid: &str, pid: &str) -> bool {
        self.source(vid, pid).is_some()
    }

    /// Which table holds the pair
    pub fn source(&self, vid: &str, pid: &str) -> Option<DeviceSource> {
        let (vid, pid) = normalize(vid, pid).ok()?;
        if self.user_entry(&vid, &pid).is_some() {
            Some(DeviceSource::User)
        } else if Self::builtin_entry(&vid, &pid).is_some() {
            Some(DeviceSource::Builtin)
        } else {
            None
        }
    }

    /// Add a device to the user table
    ///
    /// Re-adding an existing user pair overwrites it with the same
    /// synthesized name.
    pub fn add_user_device(&mut self, vid: &str, pid: &str) -> Result<DeviceDescriptor, RegistryError> {
        let (vid, pid) = normalize(vid, pid)?;

        if Self::builtin_entry(&vid, &pid).is_some() {
            return Err(RegistryError::Duplicate { vid, pid });
        }

        let vendor = self.user.entry(vid.clone()).or_insert_with(|| VendorEntry {
            vendor_name: Some(synthesized_vendor_name(&vid)),
            devices: BTreeMap::new(),
        });
        let device_name = synthesized_device_name(&vid, &pid);
        vendor.devices.insert(
            pid.clone(),
            DeviceEntry {
                name: Some(device_name.clone()),
            },
        );

        tracing::info!(%vid, %pid, "User device added");

        Ok(DeviceDescriptor {
            vendor_name: vendor
                .vendor_name
                .clone()
                .unwrap_or_else(|| synthesized_vendor_name(&vid)),
            device_name,
            vendor_id: vid,
            product_id: pid,
        })
    }

    /// Remove a device from the user table, dropping its vendor when emptied
    pub fn remove_user_device(&mut self, vid: &str, pid: &str) -> Result<(), RegistryError> {
        let (vid, pid) = normalize(vid, pid)?;

        let Some(vendor) = self.user.get_mut(&vid) else {
            return Err(RegistryError::NotFound { vid, pid });
        };
        if vendor.devices.remove(&pid).is_none() {
            return Err(RegistryError::NotFound { vid, pid });
        }
        if vendor.devices.is_empty() {
            self.user.remove(&vid);
        }

        tracing::info!(%vid, %pid, "User device removed");
        Ok(())
    }
}

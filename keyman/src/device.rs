//! Device descriptors and authenticator information snapshots

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque transport path identifying an attached authenticator
///
/// Two discovery snapshots are compared by this value only. Some platforms
/// reassign HID paths when a device is re-plugged; the reset machine relies on
/// the path surviving a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePath(Vec<u8>);

impl DevicePath {
    /// Create a path from raw identity bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw identity bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for DevicePath {
    fn from(path: &str) -> Self {
        Self(path.as_bytes().to_vec())
    }
}

impl From<String> for DevicePath {
    fn from(path: String) -> Self {
        Self(path.into_bytes())
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for DevicePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One entry of a discovery snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub path: DevicePath,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub product_string: Option<String>,
}

impl DeviceDescriptor {
    /// Descriptor with only a path; ids and product string unknown
    pub fn new(path: impl Into<DevicePath>) -> Self {
        Self {
            path: path.into(),
            vendor_id: None,
            product_id: None,
            product_string: None,
        }
    }

    /// Set the USB vendor and product ids
    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self.product_id = Some(product_id);
        self
    }

    /// Set the product string
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product_string = Some(product.into());
        self
    }

    /// Name to show in a device list
    pub fn label(&self) -> &str {
        match self.product_string.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "Unknown",
        }
    }
}

/// Authenticator model identifier (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aaguid(pub [u8; 16]);

impl fmt::Display for Aaguid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for Aaguid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The authenticatorGetInfo answer as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthenticatorInfo {
    pub versions: BTreeSet<String>,
    pub aaguid: Aaguid,
    pub extensions: Vec<String>,
    pub options: BTreeMap<String, bool>,
}

/// Snapshot of a selected device's capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Path of the session's device
    pub path: DevicePath,
    pub versions: BTreeSet<String>,
    pub aaguid: Aaguid,
    pub extensions: Vec<String>,
    pub options: BTreeMap<String, bool>,
}

impl DeviceInfo {
    pub(crate) fn from_parts(path: DevicePath, info: AuthenticatorInfo) -> Self {
        Self {
            path,
            versions: info.versions,
            aaguid: info.aaguid,
            extensions: info.extensions,
            options: info.options,
        }
    }

    /// Value of a getInfo option, `None` when the device does not report it
    pub fn option(&self, name: &str) -> Option<bool> {
        self.options.get(name).copied()
    }

    /// Whether the device reports a configured client PIN
    pub fn has_pin(&self) -> bool {
        self.option("clientPin").unwrap_or(false)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let versions: Vec<&str> = self.versions.iter().map(String::as_str).collect();
        let options: Vec<String> = self
            .options
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        writeln!(f, "Path: {}", self.path)?;
        writeln!(f, "Versions: {}", versions.join(", "))?;
        writeln!(f, "AAGUID: {}", self.aaguid)?;
        writeln!(f, "Extensions: {}", self.extensions.join(", "))?;
        write!(f, "Options: {}", options.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> DeviceInfo {
        let info = AuthenticatorInfo {
            versions: ["FIDO_2_0", "FIDO_2_1"].iter().map(|v| v.to_string()).collect(),
            aaguid: Aaguid([0xab; 16]),
            extensions: vec!["credProtect".to_string(), "hmac-secret".to_string()],
            options: [("clientPin".to_string(), true), ("rk".to_string(), true)]
                .into_iter()
                .collect(),
        };
        DeviceInfo::from_parts(DevicePath::from("/dev/hidraw3"), info)
    }

    #[test]
    fn test_label_falls_back_to_unknown() {
        assert_eq!(DeviceDescriptor::new("/dev/hidraw0").label(), "Unknown");
        assert_eq!(
            DeviceDescriptor::new("/dev/hidraw0").with_product("").label(),
            "Unknown"
        );
        assert_eq!(
            DeviceDescriptor::new("/dev/hidraw0")
                .with_product("Security Key NFC")
                .label(),
            "Security Key NFC"
        );
    }

    #[test]
    fn test_has_pin_reads_client_pin_option() {
        let mut info = sample_info();
        assert!(info.has_pin());

        info.options.insert("clientPin".to_string(), false);
        assert!(!info.has_pin());

        info.options.remove("clientPin");
        assert!(!info.has_pin());
    }

    #[test]
    fn test_display_summary() {
        let text = sample_info().to_string();
        assert!(text.starts_with("Path: /dev/hidraw3\n"));
        assert!(text.contains("Versions: FIDO_2_0, FIDO_2_1"));
        assert!(text.contains(&format!("AAGUID: {}", "ab".repeat(16))));
        assert!(text.contains("Options: clientPin=true, rk=true"));
    }

    #[test]
    fn test_serializes_path_and_aaguid_as_strings() {
        let json = serde_json::to_value(sample_info()).unwrap();
        assert_eq!(json["path"], "/dev/hidraw3");
        assert_eq!(json["aaguid"], "ab".repeat(16));
        assert_eq!(json["options"]["clientPin"], true);
    }
}

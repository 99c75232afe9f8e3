//! Device and transfer type definitions
//!
//! This module defines how a device is identified and addressed, and the
//! closed set of report transfers a backend knows how to execute.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vendor/product signature of a device
///
/// Serialized as the string form `"0x1234:0x0000"` so it can be written
/// directly in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

/// Signature of the OCZ Neural Impulse Actuator
pub const NIA_IDENTITY: DeviceIdentity = DeviceIdentity {
    vendor_id: 0x1234,
    product_id: 0x0000,
};

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}:{:#06x}", self.vendor_id, self.product_id)
    }
}

impl FromStr for DeviceIdentity {
    type Err = ProtocolError;

    /// Parse "0xVID:0xPID" (the `0x` prefix is optional, digits are hex)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidSignature(s.to_string());

        let (vid, pid) = s.trim().split_once(':').ok_or_else(invalid)?;
        let parse = |part: &str| {
            let digits = part
                .trim()
                .trim_start_matches("0x")
                .trim_start_matches("0X");
            if digits.is_empty() {
                return Err(invalid());
            }
            u16::from_str_radix(digits, 16).map_err(|_| invalid())
        };

        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

impl TryFrom<String> for DeviceIdentity {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceIdentity> for String {
    fn from(identity: DeviceIdentity) -> Self {
        identity.to_string()
    }
}

/// Interface class used to enumerate candidate devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceClass(pub u8);

impl InterfaceClass {
    /// USB Human Interface Device class
    pub const HID: InterfaceClass = InterfaceClass(0x03);
}

/// Opaque identifier of one attached device instance
///
/// Paths are compared ignoring ASCII case, the same way the OS reports
/// device names in change notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePath(String);

impl DevicePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path for a libusb device at (bus, address)
    pub fn for_usb(bus: u8, address: u8) -> Self {
        Self(format!("usb:{:03}:{:03}", bus, address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a device name from a notification refers to this path
    pub fn matches_name(&self, name: &str) -> bool {
        self.0.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DevicePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Report sizes reported by the device
///
/// All lengths include the leading report ID byte, so a buffer of exactly
/// this size can be handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportCapabilities {
    pub input_report_len: usize,
    pub output_report_len: usize,
    pub feature_report_len: usize,
}

/// Transfer mode for input or output reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Interrupt endpoint (streamed)
    #[default]
    Interrupt,
    /// Class request on the control endpoint
    Control,
}

/// Which handle of a session a transfer is issued on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleRole {
    /// Query handle: capabilities, feature reports, control-transfer reports
    Info,
    /// Read-only handle for streamed input reports
    Read,
    /// Write-only handle for streamed output reports
    Write,
}

/// HID report type, as carried in the high byte of wValue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReportType {
    Input = 1,
    Output = 2,
    Feature = 3,
}

/// HID class request: GET_REPORT
pub const HID_GET_REPORT: u8 = 0x01;
/// HID class request: SET_REPORT
pub const HID_SET_REPORT: u8 = 0x09;

/// Report transfers a backend can execute
///
/// Buffers follow the OS HID convention: byte 0 is the report ID (0 when the
/// device does not use numbered reports), followed by the report payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportTransfer {
    /// Read a feature report
    FeatureIn { len: usize },
    /// Write a feature report
    FeatureOut { data: Vec<u8> },
    /// Read an input report with a GET_REPORT control request
    InputViaControl { len: usize },
    /// Read an input report from the interrupt IN endpoint
    InputViaInterrupt { len: usize },
    /// Write an output report with a SET_REPORT control request
    OutputViaControl { data: Vec<u8> },
    /// Write an output report to the interrupt OUT endpoint
    OutputViaInterrupt { data: Vec<u8> },
}

impl ReportTransfer {
    /// Input transfer for the given mode
    pub fn input(mode: TransferMode, len: usize) -> Self {
        match mode {
            TransferMode::Interrupt => Self::InputViaInterrupt { len },
            TransferMode::Control => Self::InputViaControl { len },
        }
    }

    /// Output transfer for the given mode
    pub fn output(mode: TransferMode, data: Vec<u8>) -> Self {
        match mode {
            TransferMode::Interrupt => Self::OutputViaInterrupt { data },
            TransferMode::Control => Self::OutputViaControl { data },
        }
    }

    /// Handle this transfer must be issued on
    pub fn role(&self) -> HandleRole {
        match self {
            Self::FeatureIn { .. }
            | Self::FeatureOut { .. }
            | Self::InputViaControl { .. }
            | Self::OutputViaControl { .. } => HandleRole::Info,
            Self::InputViaInterrupt { .. } => HandleRole::Read,
            Self::OutputViaInterrupt { .. } => HandleRole::Write,
        }
    }

    pub fn report_type(&self) -> ReportType {
        match self {
            Self::FeatureIn { .. } | Self::FeatureOut { .. } => ReportType::Feature,
            Self::InputViaControl { .. } | Self::InputViaInterrupt { .. } => ReportType::Input,
            Self::OutputViaControl { .. } | Self::OutputViaInterrupt { .. } => ReportType::Output,
        }
    }

    /// True if the transfer moves data from the device to the host
    pub fn is_in(&self) -> bool {
        matches!(
            self,
            Self::FeatureIn { .. } | Self::InputViaControl { .. } | Self::InputViaInterrupt { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FeatureIn { .. } => "feature-in",
            Self::FeatureOut { .. } => "feature-out",
            Self::InputViaControl { .. } => "input-via-control",
            Self::InputViaInterrupt { .. } => "input-via-interrupt",
            Self::OutputViaControl { .. } => "output-via-control",
            Self::OutputViaInterrupt { .. } => "output-via-interrupt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse() {
        let id: DeviceIdentity = "0x1234:0x0000".parse().unwrap();
        assert_eq!(id, NIA_IDENTITY);

        // Prefix is optional
        let id: DeviceIdentity = "04f9:ABCD".parse().unwrap();
        assert_eq!(id, DeviceIdentity::new(0x04f9, 0xabcd));

        assert!("1234".parse::<DeviceIdentity>().is_err());
        assert!("0x:0x1".parse::<DeviceIdentity>().is_err());
        assert!("0x12345:0x0".parse::<DeviceIdentity>().is_err());
        assert!("zz:00".parse::<DeviceIdentity>().is_err());
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(NIA_IDENTITY.to_string(), "0x1234:0x0000");
        let back: DeviceIdentity = NIA_IDENTITY.to_string().parse().unwrap();
        assert_eq!(back, NIA_IDENTITY);
    }

    #[test]
    fn test_path_matching_ignores_case() {
        let path = DevicePath::new(r"\\?\hid#vid_1234&pid_0000#7&1a2b");
        assert!(path.matches_name(r"\\?\HID#VID_1234&PID_0000#7&1A2B"));
        assert!(!path.matches_name(r"\\?\hid#vid_1234&pid_0001#7&1a2b"));
    }

    #[test]
    fn test_usb_path_format() {
        assert_eq!(DevicePath::for_usb(1, 4).as_str(), "usb:001:004");
    }

    #[test]
    fn test_transfer_roles() {
        assert_eq!(
            ReportTransfer::FeatureIn { len: 8 }.role(),
            HandleRole::Info
        );
        assert_eq!(
            ReportTransfer::input(TransferMode::Interrupt, 56).role(),
            HandleRole::Read
        );
        assert_eq!(
            ReportTransfer::input(TransferMode::Control, 56).role(),
            HandleRole::Info
        );
        assert_eq!(
            ReportTransfer::output(TransferMode::Interrupt, vec![0; 8]).role(),
            HandleRole::Write
        );
        assert_eq!(
            ReportTransfer::output(TransferMode::Control, vec![0; 8]).role(),
            HandleRole::Info
        );
    }

    #[test]
    fn test_transfer_direction() {
        assert!(ReportTransfer::InputViaControl { len: 1 }.is_in());
        assert!(!ReportTransfer::FeatureOut { data: vec![] }.is_in());
        assert_eq!(
            ReportTransfer::FeatureOut { data: vec![] }.report_type(),
            ReportType::Feature
        );
    }
}

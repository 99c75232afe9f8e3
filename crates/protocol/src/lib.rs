//! Wire-level types for the NIA biosensor
//!
//! This crate defines everything that is fixed by the device firmware and the
//! HID class contract: the 56-byte input report layout, the sample triple
//! encoding, device identities and paths, and the closed set of report
//! transfers a backend can execute. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{RawReport, decode_report};
//!
//! let report = RawReport::from_samples(&[120, -40], 1000).unwrap();
//! let packet = decode_report(&report).unwrap();
//! assert_eq!(packet.samples, vec![120, -40]);
//! assert_eq!(packet.packet_timer, 998);
//! ```

pub mod error;
pub mod report;
pub mod types;

pub use error::{ProtocolError, Result};
pub use report::{
    DecodedPacket, MAX_SAMPLES_PER_REPORT, REPORT_LEN, RawReport, SAMPLE_DC_OFFSET, Sample,
    decode_report, encode_sample,
};
pub use types::{
    DeviceIdentity, DevicePath, HID_GET_REPORT, HID_SET_REPORT, HandleRole, InterfaceClass,
    NIA_IDENTITY, ReportCapabilities, ReportTransfer, ReportType, TransferMode,
};

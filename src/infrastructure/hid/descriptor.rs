//! HID Application Descriptor
//!
//! Static description of the virtual game pad handed to the radio stack when
//! the HID device application is registered: the report descriptor, the SDP
//! service record strings and the quality-of-service request.

use crate::domain::settings::{SDP_DESCRIPTION, SDP_NAME, SDP_PROVIDER};
use crate::infrastructure::hid::protocol::{ID_BATTERY, ID_GAMEPAD};

/// Device subclass advertised in the SDP record (game pad).
pub const SUBCLASS_GAMEPAD: u8 = 0x08;

/// Report descriptor modelled on the Xbox Wireless Controller (model 1914).
///
/// ```text
/// Report 1 (input, 16 bytes):
///   u16 X, Y, Z, Rz        sticks, 0..65535
///   u10 Brake + 6 pad      0..1023
///   u10 Accelerator + 6 pad
///   u4  Hat switch + 4 pad 1..8, null state when released
///   15 buttons + 1 pad
///   Record + 7 pad
/// Report 4 (input, 1 byte):
///   Battery strength 0..255
/// ```
pub const REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop Ctrls)
    0x09, 0x05, // Usage (Game Pad)
    0xA1, 0x01, // Collection (Application)
    0x85, ID_GAMEPAD, //   Report ID (1)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x15, 0x00, //     Logical Minimum (0)
    0x27, 0xFF, 0xFF, 0x00, 0x00, //     Logical Maximum (65535)
    0x95, 0x02, //     Report Count (2)
    0x75, 0x10, //     Report Size (16)
    0x81, 0x02, //     Input (Data,Var,Abs)
    0xC0, //   End Collection
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x09, 0x32, //     Usage (Z)
    0x09, 0x35, //     Usage (Rz)
    0x15, 0x00, //     Logical Minimum (0)
    0x27, 0xFF, 0xFF, 0x00, 0x00, //     Logical Maximum (65535)
    0x95, 0x02, //     Report Count (2)
    0x75, 0x10, //     Report Size (16)
    0x81, 0x02, //     Input (Data,Var,Abs)
    0xC0, //   End Collection
    0x05, 0x02, //   Usage Page (Sim Ctrls)
    0x09, 0xC5, //   Usage (Brake)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x03, //   Logical Maximum (1023)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x0A, //   Report Size (10)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x00, //   Logical Maximum (0)
    0x75, 0x06, //   Report Size (6)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x03, //   Input (Const,Var,Abs)
    0x05, 0x02, //   Usage Page (Sim Ctrls)
    0x09, 0xC4, //   Usage (Accelerator)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x03, //   Logical Maximum (1023)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x0A, //   Report Size (10)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x00, //   Logical Maximum (0)
    0x75, 0x06, //   Report Size (6)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x03, //   Input (Const,Var,Abs)
    0x05, 0x01, //   Usage Page (Generic Desktop Ctrls)
    0x09, 0x39, //   Usage (Hat switch)
    0x15, 0x01, //   Logical Minimum (1)
    0x25, 0x08, //   Logical Maximum (8)
    0x35, 0x00, //   Physical Minimum (0)
    0x46, 0x3B, 0x01, //   Physical Maximum (315)
    0x66, 0x14, 0x00, //   Unit (English Rotation, Degrees)
    0x75, 0x04, //   Report Size (4)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x42, //   Input (Data,Var,Abs,Null State)
    0x75, 0x04, //   Report Size (4)
    0x95, 0x01, //   Report Count (1)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x00, //   Logical Maximum (0)
    0x35, 0x00, //   Physical Minimum (0)
    0x45, 0x00, //   Physical Maximum (0)
    0x65, 0x00, //   Unit (None)
    0x81, 0x03, //   Input (Const,Var,Abs)
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (0x01)
    0x29, 0x0F, //   Usage Maximum (0x0F)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x0F, //   Report Count (15)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x00, //   Logical Maximum (0)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x03, //   Input (Const,Var,Abs)
    0x05, 0x0C, //   Usage Page (Consumer)
    0x0A, 0xB2, 0x00, //   Usage (Record)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x01, //   Report Size (1)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x00, //   Logical Maximum (0)
    0x75, 0x07, //   Report Size (7)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x03, //   Input (Const,Var,Abs)
    0x05, 0x06, //   Usage Page (Generic Dev Ctrls)
    0x09, 0x20, //   Usage (Battery Strength)
    0x85, ID_BATTERY, //   Report ID (4)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0xC0, // End Collection
];

/// Requested L2CAP service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    NoTraffic,
    BestEffort,
    Guaranteed,
}

/// Best-effort quality-of-service request for the interrupt channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosSettings {
    pub service_type: ServiceType,
    /// Bytes per second
    pub token_rate: u32,
    /// Bytes
    pub token_bucket_size: u32,
    /// Bytes per second, 0 = unspecified
    pub peak_bandwidth: u32,
    /// Microseconds
    pub latency: u32,
    /// Microseconds
    pub delay_variation: u32,
}

/// 9 bytes every 11.25 ms.
pub const QOS_SETTINGS: QosSettings = QosSettings {
    service_type: ServiceType::BestEffort,
    token_rate: 800,
    token_bucket_size: 9,
    peak_bandwidth: 0,
    latency: 11_250,
    delay_variation: u32::MAX,
};

/// SDP record contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpSettings {
    pub name: String,
    pub description: String,
    pub provider: String,
    pub subclass: u8,
    pub report_descriptor: &'static [u8],
}

/// Everything the radio stack needs to register the virtual game pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub sdp: SdpSettings,
    pub qos: QosSettings,
}

impl AppDescriptor {
    /// Same descriptor under a different service record identity.
    pub fn with_identity(
        name: impl Into<String>,
        description: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            sdp: SdpSettings {
                name: name.into(),
                description: description.into(),
                provider: provider.into(),
                subclass: SUBCLASS_GAMEPAD,
                report_descriptor: REPORT_DESCRIPTOR,
            },
            qos: QOS_SETTINGS,
        }
    }
}

impl Default for AppDescriptor {
    fn default() -> Self {
        Self::with_identity(SDP_NAME, SDP_DESCRIPTION, SDP_PROVIDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_is_one_application_collection() {
        assert_eq!(&REPORT_DESCRIPTOR[..6], &[0x05, 0x01, 0x09, 0x05, 0xA1, 0x01]);
        assert_eq!(REPORT_DESCRIPTOR.last(), Some(&0xC0));
    }

    #[test]
    fn test_descriptor_declares_both_report_ids() {
        let ids: Vec<u8> = REPORT_DESCRIPTOR
            .windows(2)
            .filter(|w| w[0] == 0x85)
            .map(|w| w[1])
            .collect();
        assert_eq!(ids, vec![ID_GAMEPAD, ID_BATTERY]);
    }

    #[test]
    fn test_default_descriptor() {
        let descriptor = AppDescriptor::default();
        assert_eq!(descriptor.sdp.name, SDP_NAME);
        assert_eq!(descriptor.sdp.subclass, SUBCLASS_GAMEPAD);
        assert_eq!(descriptor.qos.token_bucket_size, 9);
        assert_eq!(descriptor.qos.service_type, ServiceType::BestEffort);
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction pad position, encoded as the HID hat-switch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Dpad {
    #[default]
    Released = 0,
    Up = 1,
    UpRight = 2,
    Right = 3,
    DownRight = 4,
    Down = 5,
    DownLeft = 6,
    Left = 7,
    UpLeft = 8,
}

impl Dpad {
    /// Hat-switch value as written into the input report.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Map a raw hat-switch value back to a direction. Values above 8 are rejected.
    pub fn from_value(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Released,
            1 => Self::Up,
            2 => Self::UpRight,
            3 => Self::Right,
            4 => Self::DownRight,
            5 => Self::Down,
            6 => Self::DownLeft,
            7 => Self::Left,
            8 => Self::UpLeft,
            _ => return None,
        })
    }
}

/// Stick axis rest position.
pub const STICK_CENTER: u16 = 32768;

/// Largest trigger value the report can carry (10 bits).
pub const TRIGGER_MAX: u16 = 1023;

/// Full snapshot of the controller inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamepadState {
    // Face buttons
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,

    // Shoulder buttons
    pub l1: bool,
    pub r1: bool,

    // Stick clicks
    pub l3: bool,
    pub r3: bool,

    // Menu buttons
    pub view: bool,
    pub menu: bool,
    pub home: bool,
    pub record: bool,

    pub dpad: Dpad,

    // Sticks: Up/Left = 0, Down/Right = 65535, Center = 32768
    pub lx: u16,
    pub ly: u16,
    pub rx: u16,
    pub ry: u16,

    // Triggers: Released = 0, Pressed = 1023
    pub l2: u16,
    pub r2: u16,
}

impl Default for GamepadState {
    fn default() -> Self {
        Self {
            a: false,
            b: false,
            x: false,
            y: false,
            l1: false,
            r1: false,
            l3: false,
            r3: false,
            view: false,
            menu: false,
            home: false,
            record: false,
            dpad: Dpad::Released,
            lx: STICK_CENTER,
            ly: STICK_CENTER,
            rx: STICK_CENTER,
            ry: STICK_CENTER,
            l2: 0,
            r2: 0,
        }
    }
}

/// Identity of a paired host, usually its Bluetooth address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn address(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Profile-level connection state of a single peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Connected, or on its way in or out.
    pub const ACTIVE: [ConnectionState; 3] = [
        ConnectionState::Connected,
        ConnectionState::Connecting,
        ConnectionState::Disconnecting,
    ];
}

/// HID report type as carried by GET_REPORT / SET_REPORT transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

/// Normalised event fanned out to every interested listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileEvent {
    /// The radio service was bound (`true`) or torn down (`false`).
    ServiceStateChanged { available: bool },
    AppStatusChanged {
        plugged_device: Option<PeerId>,
        registered: bool,
    },
    ConnectionStateChanged {
        device: PeerId,
        state: ConnectionState,
    },
    GetReport {
        device: PeerId,
        report_type: ReportType,
        report_id: u8,
        buffer_size: usize,
    },
    SetReport {
        device: PeerId,
        report_type: ReportType,
        report_id: u8,
        data: Vec<u8>,
    },
    InterruptData {
        device: PeerId,
        report_id: u8,
        data: Vec<u8>,
    },
}

impl ProfileEvent {
    /// Host-to-device report traffic, as opposed to connection lifecycle.
    pub fn is_report_traffic(&self) -> bool {
        matches!(
            self,
            Self::GetReport { .. } | Self::SetReport { .. } | Self::InterruptData { .. }
        )
    }
}

/// Vibration parameters extracted from a force-feedback report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RumbleEffect {
    /// 0..=255
    pub amplitude: u8,
    pub duration_ms: u32,
    pub start_delay_ms: u32,
    pub loop_count: u8,
}

/// What the haptics layer should do in response to a feedback report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackEvent {
    NoOp,
    Cancel,
    /// Short pulse at the actuator's default strength.
    OneShot { duration_ms: u32 },
    Rumble(RumbleEffect),
}

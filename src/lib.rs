//! Bluetooth HID game pad emulator.
//!
//! The device presents itself to a paired host as an HID game pad with a
//! battery indicator and a force-feedback channel. Front ends feed
//! [`GamepadState`](domain::models::GamepadState) snapshots into a
//! [`ConnectionOrchestrator`](infrastructure::hid::ConnectionOrchestrator) and
//! react to the [`ProfileEvent`](domain::models::ProfileEvent)s it fans out.

pub mod domain;
pub mod infrastructure;

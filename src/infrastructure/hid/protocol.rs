//! Gamepad Report Protocol
//!
//! Encoding of the controller state into the input report declared by
//! [`REPORT_DESCRIPTOR`](super::descriptor::REPORT_DESCRIPTOR), and decoding
//! of the force-feedback reports written by the host.

use crate::domain::haptics::ONE_SHOT_DURATION_MS;
use crate::domain::models::{FeedbackEvent, GamepadState, RumbleEffect, TRIGGER_MAX};
use tracing::trace;

/// Gamepad input report ID
pub const ID_GAMEPAD: u8 = 1;
/// Force-feedback output report ID
pub const ID_FEEDBACK: u8 = 3;
/// Battery strength input report ID
pub const ID_BATTERY: u8 = 4;

/// Size of the gamepad input report payload (without the report ID)
pub const GAMEPAD_REPORT_LEN: usize = 16;

/// Minimum payload carrying a full set-effect block
pub const FEEDBACK_EFFECT_LEN: usize = 8;

/// Encode the controller state into the 16-byte input report
///
/// # Input Report Structure (16 bytes, report ID 1)
///
/// ```text
/// [0-1]   : Left stick X (u16 little-endian)
/// [2-3]   : Left stick Y
/// [4-5]   : Right stick X
/// [6-7]   : Right stick Y
/// [8-9]   : Left trigger  (10 bits, upper 6 bits zero)
/// [10-11] : Right trigger (10 bits, upper 6 bits zero)
/// [12]    : Hat switch in the low nibble (0 = released, 1..8 clockwise from up)
/// [13]    : bit 0: A, bit 1: B, bit 2: X, bit 3: Y, bit 4: L1, bit 5: R1
/// [14]    : bit 0: View, bit 1: Menu, bit 2: L3, bit 3: R3, bit 6: Home
/// [15]    : bit 0: Record
/// ```
pub fn encode(state: &GamepadState) -> [u8; GAMEPAD_REPORT_LEN] {
    let mut report = [0u8; GAMEPAD_REPORT_LEN];
    encode_into(state, &mut report);
    report
}

/// Encode into a caller-owned buffer, overwriting every byte.
pub fn encode_into(state: &GamepadState, report: &mut [u8; GAMEPAD_REPORT_LEN]) {
    report[0..2].copy_from_slice(&state.lx.to_le_bytes());
    report[2..4].copy_from_slice(&state.ly.to_le_bytes());
    report[4..6].copy_from_slice(&state.rx.to_le_bytes());
    report[6..8].copy_from_slice(&state.ry.to_le_bytes());
    report[8..10].copy_from_slice(&(state.l2 & TRIGGER_MAX).to_le_bytes());
    report[10..12].copy_from_slice(&(state.r2 & TRIGGER_MAX).to_le_bytes());
    report[12] = state.dpad.value() & 0x0F;

    report[13] = bit(state.a, 0)
        | bit(state.b, 1)
        | bit(state.x, 2)
        | bit(state.y, 3)
        | bit(state.l1, 4)
        | bit(state.r1, 5);

    report[14] = bit(state.view, 0)
        | bit(state.menu, 1)
        | bit(state.l3, 2)
        | bit(state.r3, 3)
        | bit(state.home, 6);

    report[15] = bit(state.record, 0);

    trace!("Encoded gamepad report: {:02X?}", report);
}

fn bit(pressed: bool, position: u8) -> u8 {
    u8::from(pressed) << position
}

/// Decode a host-originated output report
///
/// # Feedback Report Structure (report ID 3)
///
/// ```text
/// [0]   : Actuator enable flags (low nibble), 0 = stop
/// [1-4] : Per-actuator magnitude, 0..100
/// [5]   : Duration, 10 ms units
/// [6]   : Start delay, 10 ms units
/// [7]   : Loop count
/// ```
///
/// Short or partial reports are never rejected: they fall back to a single
/// default pulse.
pub fn decode_feedback(report_id: u8, data: &[u8]) -> FeedbackEvent {
    if report_id != ID_FEEDBACK {
        return FeedbackEvent::NoOp;
    }

    let Some(&flags) = data.first() else {
        return FeedbackEvent::NoOp;
    };

    if flags == 0 {
        return FeedbackEvent::Cancel;
    }

    if data.len() < FEEDBACK_EFFECT_LEN {
        return FeedbackEvent::OneShot {
            duration_ms: ONE_SHOT_DURATION_MS,
        };
    }

    let magnitude = data[1..5]
        .iter()
        .map(|&m| u32::from(m.min(100)))
        .sum::<u32>()
        / 4;
    let amplitude = (255 * magnitude / 100) as u8;

    FeedbackEvent::Rumble(RumbleEffect {
        amplitude,
        duration_ms: u32::from(data[5]) * 10,
        start_delay_ms: u32::from(data[6]) * 10,
        loop_count: data[7],
    })
}

/// Convert a charge fraction into the battery report byte.
///
/// Returns `None` for values outside `0.0..=1.0` (including NaN).
pub fn encode_battery(fraction: f32) -> Option<u8> {
    if !(0.0..=1.0).contains(&fraction) {
        return None;
    }
    Some((fraction * 255.0).round() as u8)
}

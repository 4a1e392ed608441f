use crate::domain::models::{FeedbackEvent, RumbleEffect};

/// Length of the pulse played for short or under-specified feedback reports.
pub const ONE_SHOT_DURATION_MS: u32 = 30;

/// Vibration pattern ready for an actuator: alternating segments of
/// `timings_ms[i]` milliseconds at `amplitudes[i]` strength.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waveform {
    pub timings_ms: Vec<u32>,
    pub amplitudes: Vec<u8>,
}

impl Waveform {
    pub fn total_duration_ms(&self) -> u32 {
        self.timings_ms.iter().sum()
    }
}

impl RumbleEffect {
    /// Expand the effect into a waveform.
    ///
    /// Each loop contributes a gap and a pulse. Without loops both segments
    /// carry the amplitude. Returns `None` when there is nothing to play.
    pub fn waveform(&self) -> Option<Waveform> {
        if self.amplitude == 0 || self.duration_ms == 0 {
            return None;
        }

        let count = (usize::from(self.loop_count) + 1) * 2;
        let looping = self.loop_count > 0;
        let mut timings_ms = Vec::with_capacity(count);
        let mut amplitudes = Vec::with_capacity(count);

        for index in 0..count {
            if index % 2 == 0 {
                timings_ms.push(if looping {
                    self.start_delay_ms
                } else {
                    self.duration_ms
                });
                amplitudes.push(if looping { 0 } else { self.amplitude });
            } else {
                timings_ms.push(self.duration_ms);
                amplitudes.push(self.amplitude);
            }
        }

        Some(Waveform {
            timings_ms,
            amplitudes,
        })
    }
}

/// Instruction for the excluded haptics layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HapticCommand {
    Cancel,
    /// Pulse at the actuator's default amplitude.
    OneShot { duration_ms: u32 },
    Play(Waveform),
}

/// Turn a decoded feedback event into something an actuator can play.
pub fn plan(event: &FeedbackEvent) -> Option<HapticCommand> {
    match event {
        FeedbackEvent::NoOp => None,
        FeedbackEvent::Cancel => Some(HapticCommand::Cancel),
        FeedbackEvent::OneShot { duration_ms } => Some(HapticCommand::OneShot {
            duration_ms: *duration_ms,
        }),
        FeedbackEvent::Rumble(effect) => effect.waveform().map(HapticCommand::Play),
    }
}

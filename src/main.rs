use bt_hid_gamepad::domain::haptics::{self, HapticCommand};
use bt_hid_gamepad::domain::models::{
    ConnectionState, Dpad, GamepadState, PeerId, ProfileEvent, STICK_CENTER, TRIGGER_MAX,
};
use bt_hid_gamepad::domain::settings::SettingsService;
use bt_hid_gamepad::infrastructure::hid::loopback::LoopbackStack;
use bt_hid_gamepad::infrastructure::hid::protocol::{self, ID_FEEDBACK};
use bt_hid_gamepad::infrastructure::hid::{
    ChannelListener, ConnectionOrchestrator, ListenerInterest, OrchestratorConfig,
    ProfileListener,
};
use bt_hid_gamepad::infrastructure::logging;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Host used when no previous connection is remembered.
const DEMO_HOST: &str = "00:1A:7D:DA:71:13";

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const FRAME_COUNT: u32 = 90;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings = SettingsService::new()?;
    let _log_guard = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting Bluetooth HID gamepad on the loopback stack");

    let host = settings
        .get()
        .last_connected_peer
        .clone()
        .filter(|_| settings.get().auto_connect_last_peer)
        .unwrap_or_else(|| PeerId::new(DEMO_HOST));

    let stack = LoopbackStack::new();
    stack.pair(&host);

    let orchestrator = ConnectionOrchestrator::new(
        Arc::new(stack.clone()),
        OrchestratorConfig::from_settings(settings.get()),
    );
    let (listener, mut events) = ChannelListener::new(ListenerInterest::All);
    let listener: Arc<dyn ProfileListener> = listener;
    let profile = orchestrator.add_listener(listener.clone());

    // Plays the radio stack's side; a real stack calls back on its own
    let driver = {
        let stack = stack.clone();
        let host = host.clone();
        tokio::spawn(async move {
            let step = Duration::from_millis(100);
            stack.announce_service();
            tokio::time::sleep(step).await;
            stack.confirm_registration();
            tokio::time::sleep(step).await;
            stack.settle();
            stack.report_battery(87, 100);
            tokio::time::sleep(step * 3).await;
            stack.host_set_report(&host, ID_FEEDBACK, &[0x0F, 40, 40, 40, 40, 5, 2, 1]);
            tokio::time::sleep(step).await;
            stack.host_set_report(&host, ID_FEEDBACK, &[0x00]);
        })
    };

    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    let mut frame = 0;
    while frame < FRAME_COUNT {
        tokio::select! {
            Some(event) = events.recv() => {
                on_profile_event(&orchestrator, &mut settings, &host, event);
            }
            _ = ticker.tick() => {
                orchestrator.send_gamepad(&demo_frame(frame));
                frame += 1;
            }
        }
    }

    driver.await?;
    while let Ok(event) = events.try_recv() {
        on_profile_event(&orchestrator, &mut settings, &host, event);
    }

    info!("Paired hosts: {:?}", profile.paired_devices());
    orchestrator.remove_listener(&listener);
    info!(
        "Shut down, loopback stack saw {} commands",
        stack.take_commands().len()
    );
    Ok(())
}

fn on_profile_event(
    orchestrator: &ConnectionOrchestrator,
    settings: &mut SettingsService,
    host: &PeerId,
    event: ProfileEvent,
) {
    match event {
        ProfileEvent::ServiceStateChanged { available } => {
            info!("HID service available: {}", available);
        }
        ProfileEvent::AppStatusChanged { registered, .. } => {
            info!("HID app registered: {}", registered);
            if registered && settings.get().auto_connect_last_peer {
                orchestrator.request_connect(Some(host.clone()));
            }
        }
        ProfileEvent::ConnectionStateChanged { device, state } => {
            info!("{} -> {:?}", device, state);
            if state == ConnectionState::Connected {
                if let Err(e) = settings.remember_peer(&device) {
                    warn!("Failed to save settings: {}", e);
                }
            }
        }
        ProfileEvent::SetReport {
            report_id, data, ..
        }
        | ProfileEvent::InterruptData {
            report_id, data, ..
        } => {
            let feedback = protocol::decode_feedback(report_id, &data);
            match haptics::plan(&feedback) {
                Some(HapticCommand::Play(waveform)) => info!(
                    "Rumble for {} ms: {:?} / {:?}",
                    waveform.total_duration_ms(),
                    waveform.timings_ms,
                    waveform.amplitudes
                ),
                Some(command) => info!("Haptics: {:?}", command),
                None => debug!("Feedback report ignored: {:?}", feedback),
            }
        }
        ProfileEvent::GetReport { report_id, .. } => {
            debug!("Host read report {}", report_id);
        }
    }
}

/// Sweep the left stick, pulse A and walk the d-pad around.
fn demo_frame(frame: u32) -> GamepadState {
    let phase = (frame % 30) as f32 / 30.0;
    let sweep = (phase * std::f32::consts::TAU).sin();

    GamepadState {
        a: frame % 20 < 10,
        dpad: Dpad::from_value((frame / 10 % 9) as u8).unwrap_or_default(),
        lx: (f32::from(STICK_CENTER) + sweep * 32767.0) as u16,
        r2: (phase * f32::from(TRIGGER_MAX)) as u16,
        ..Default::default()
    }
}

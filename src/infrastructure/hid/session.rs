//! Device Application Session
//!
//! Owns the HID application registration on the bound service and the peer
//! that currently receives input reports. Radio-stack failures are logged and
//! swallowed here; the orchestrator reconciles on the next event.

use crate::domain::models::{GamepadState, PeerId, ReportType};
use crate::infrastructure::hid::descriptor::AppDescriptor;
use crate::infrastructure::hid::protocol::{
    self, GAMEPAD_REPORT_LEN, ID_BATTERY, ID_GAMEPAD,
};
use crate::infrastructure::hid::stack::{HandshakeError, HidProxy};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    /// Registration requested, waiting for the stack to confirm.
    Registering,
    Registered,
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum BatteryError {
    #[error("bad battery level data received: level={level}, scale={scale}")]
    InvalidReading { level: i32, scale: i32 },
    #[error("battery level {0} is outside 0.0..=1.0")]
    OutOfRange(f32),
}

/// Charge fraction from a raw platform reading.
pub fn battery_fraction(level: i32, scale: i32) -> Result<f32, BatteryError> {
    if level < 0 || scale <= 0 {
        return Err(BatteryError::InvalidReading { level, scale });
    }
    Ok(level as f32 / scale as f32)
}

pub struct DeviceApp {
    descriptor: AppDescriptor,
    proxy: Option<Arc<dyn HidProxy>>,
    registration: RegistrationState,
    sink: Option<PeerId>,
    // Scratch buffer, also the answer to GET_REPORT for the gamepad report
    report: [u8; GAMEPAD_REPORT_LEN],
    battery: Option<u8>,
}

impl DeviceApp {
    pub fn new(descriptor: AppDescriptor) -> Self {
        Self {
            descriptor,
            proxy: None,
            registration: RegistrationState::Unregistered,
            sink: None,
            report: protocol::encode(&GamepadState::default()),
            battery: None,
        }
    }

    pub fn registration(&self) -> RegistrationState {
        self.registration
    }

    pub fn sink(&self) -> Option<&PeerId> {
        self.sink.as_ref()
    }

    pub fn has_service(&self) -> bool {
        self.proxy.is_some()
    }

    /// Request registration on a freshly bound service.
    ///
    /// The state only becomes `Registered` once the stack confirms through
    /// [`DeviceApp::on_app_status_changed`].
    pub fn register_app(&mut self, proxy: Arc<dyn HidProxy>) {
        let same_proxy = self
            .proxy
            .as_ref()
            .is_some_and(|current| same_handle(current, &proxy));
        if same_proxy && self.registration != RegistrationState::Unregistered {
            debug!("HID app already {:?} on this service", self.registration);
            return;
        }

        info!("Registering HID app '{}'", self.descriptor.sdp.name);
        self.proxy = Some(proxy.clone());
        match proxy.register_app(&self.descriptor) {
            Ok(()) => self.registration = RegistrationState::Registering,
            Err(e) => {
                warn!("HID app registration failed: {}", e);
                self.registration = RegistrationState::Unregistered;
            }
        }
    }

    /// Withdraw the application. Does nothing when not registered.
    pub fn unregister_app(&mut self) {
        if self.registration == RegistrationState::Unregistered {
            return;
        }
        self.registration = RegistrationState::Unregistered;

        if let Some(proxy) = &self.proxy {
            info!("Unregistering HID app");
            if let Err(e) = proxy.unregister_app() {
                warn!("HID app unregistration failed: {}", e);
            }
        }
    }

    pub fn on_app_status_changed(&mut self, registered: bool) {
        self.registration = if registered {
            RegistrationState::Registered
        } else {
            RegistrationState::Unregistered
        };
    }

    /// Forget the service handle after it went away or was unbound.
    pub fn detach(&mut self) {
        self.proxy = None;
        self.registration = RegistrationState::Unregistered;
        self.sink = None;
    }

    /// Choose the peer that receives input reports; `None` drops them.
    pub fn set_sink(&mut self, device: Option<PeerId>) {
        if self.sink != device {
            debug!("Report sink: {:?} -> {:?}", self.sink, device);
            self.sink = device;
        }
    }

    pub fn send_gamepad(&mut self, state: &GamepadState) {
        let Some(device) = &self.sink else {
            return;
        };

        protocol::encode_into(state, &mut self.report);
        send(&self.proxy, device, ID_GAMEPAD, &self.report);
    }

    /// Report the charge level. Invalid fractions are logged and dropped.
    pub fn send_battery_level(&mut self, fraction: f32) {
        let Some(level) = protocol::encode_battery(fraction) else {
            error!("{}", BatteryError::OutOfRange(fraction));
            return;
        };
        self.battery = Some(level);

        if let Some(device) = &self.sink {
            send(&self.proxy, device, ID_BATTERY, &[level]);
        }
    }

    /// Answer a host GET_REPORT with the latest value of the requested report.
    pub fn reply_get_report(&self, device: &PeerId, report_type: ReportType, report_id: u8) {
        let Some(proxy) = &self.proxy else {
            return;
        };

        let result = match (report_type, report_id) {
            (ReportType::Input, ID_GAMEPAD) => {
                proxy.reply_report(device, report_type, report_id, &self.report)
            }
            (ReportType::Input, ID_BATTERY) => {
                let level = self.battery.unwrap_or(u8::MAX);
                proxy.reply_report(device, report_type, report_id, &[level])
            }
            _ => proxy.report_error(device, HandshakeError::InvalidReportId),
        };

        if let Err(e) = result {
            warn!("Failed to answer GET_REPORT {} from {}: {}", report_id, device, e);
        }
    }
}

fn send(proxy: &Option<Arc<dyn HidProxy>>, device: &PeerId, report_id: u8, data: &[u8]) {
    let Some(proxy) = proxy else {
        trace!("No HID service, dropping report {}", report_id);
        return;
    };
    if let Err(e) = proxy.send_report(device, report_id, data) {
        warn!("Failed to send report {} to {}: {}", report_id, device, e);
    }
}

fn same_handle(a: &Arc<dyn HidProxy>, b: &Arc<dyn HidProxy>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::hid::loopback::{LoopbackStack, StackCommand};

    fn registered_app(stack: &LoopbackStack) -> DeviceApp {
        let mut app = DeviceApp::new(AppDescriptor::default());
        app.register_app(stack.proxy());
        app.on_app_status_changed(true);
        stack.take_commands();
        app
    }

    #[test]
    fn test_registration_waits_for_confirmation() {
        let stack = LoopbackStack::new();
        let mut app = DeviceApp::new(AppDescriptor::default());

        app.register_app(stack.proxy());
        assert_eq!(app.registration(), RegistrationState::Registering);
        assert_eq!(stack.take_commands(), vec![StackCommand::RegisterApp]);

        // Same service again: no second registration
        app.register_app(stack.proxy());
        assert!(stack.take_commands().is_empty());

        app.on_app_status_changed(true);
        assert_eq!(app.registration(), RegistrationState::Registered);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let stack = LoopbackStack::new();
        let mut app = registered_app(&stack);

        app.unregister_app();
        app.unregister_app();
        assert_eq!(stack.take_commands(), vec![StackCommand::UnregisterApp]);
        assert_eq!(app.registration(), RegistrationState::Unregistered);
    }

    #[test]
    fn test_reports_need_a_sink() {
        let stack = LoopbackStack::new();
        let mut app = registered_app(&stack);
        let host = PeerId::new("host");

        app.send_gamepad(&GamepadState::default());
        assert!(stack.take_commands().is_empty());

        app.set_sink(Some(host.clone()));
        let state = GamepadState {
            a: true,
            ..Default::default()
        };
        app.send_gamepad(&state);
        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::SendReport {
                device: host,
                report_id: ID_GAMEPAD,
                data: protocol::encode(&state).to_vec(),
            }]
        );
    }

    #[test]
    fn test_battery_level() {
        let stack = LoopbackStack::new();
        let mut app = registered_app(&stack);
        let host = PeerId::new("host");
        app.set_sink(Some(host.clone()));

        app.send_battery_level(1.5);
        app.send_battery_level(-0.2);
        assert!(stack.take_commands().is_empty());

        app.send_battery_level(1.0);
        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::SendReport {
                device: host,
                report_id: ID_BATTERY,
                data: vec![255],
            }]
        );
    }

    #[test]
    fn test_battery_fraction() {
        assert_eq!(battery_fraction(50, 100), Ok(0.5));
        assert_eq!(
            battery_fraction(-1, 100),
            Err(BatteryError::InvalidReading {
                level: -1,
                scale: 100
            })
        );
        assert!(battery_fraction(10, 0).is_err());
    }

    #[test]
    fn test_get_report_replies() {
        let stack = LoopbackStack::new();
        let mut app = registered_app(&stack);
        let host = PeerId::new("host");
        app.send_battery_level(0.0);

        app.reply_get_report(&host, ReportType::Input, ID_GAMEPAD);
        app.reply_get_report(&host, ReportType::Input, ID_BATTERY);
        app.reply_get_report(&host, ReportType::Feature, 9);

        assert_eq!(
            stack.take_commands(),
            vec![
                StackCommand::ReplyReport {
                    device: host.clone(),
                    report_id: ID_GAMEPAD,
                    data: protocol::encode(&GamepadState::default()).to_vec(),
                },
                StackCommand::ReplyReport {
                    device: host.clone(),
                    report_id: ID_BATTERY,
                    data: vec![0],
                },
                StackCommand::ReportError {
                    device: host,
                    error: HandshakeError::InvalidReportId,
                },
            ]
        );
    }

    #[test]
    fn test_detach_drops_everything() {
        let stack = LoopbackStack::new();
        let mut app = registered_app(&stack);
        app.set_sink(Some(PeerId::new("host")));

        app.detach();
        assert!(!app.has_service());
        assert!(app.sink().is_none());
        assert_eq!(app.registration(), RegistrationState::Unregistered);

        app.send_gamepad(&GamepadState::default());
        assert!(stack.take_commands().is_empty());
    }
}

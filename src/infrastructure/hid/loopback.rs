//! Loopback Radio Stack
//!
//! In-memory stand-in for the platform HID-device service. Every command is
//! recorded and applied to a table of paired peers, but nothing happens on
//! its own: the driver (a test or the demo) decides when the service comes
//! up, when registration is confirmed and when connections settle.
//!
//! ```text
//!  connect()         finish_connect()
//! Disconnected ──▶ Connecting ──────────▶ Connected
//!      ▲                                      │
//!      │  finish_disconnect()   disconnect()  │
//!      └─────────────── Disconnecting ◀───────┘
//! ```
//!
//! Events are never delivered from inside a command, and the internal lock
//! is released before an event is handed to the orchestrator.

use crate::domain::models::{ConnectionState, PeerId, ReportType};
use crate::infrastructure::hid::descriptor::AppDescriptor;
use crate::infrastructure::hid::stack::{
    EventSink, HandshakeError, HidPlatform, HidProxy, StackError, StackEvent,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A command issued to the loopback stack, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCommand {
    BindService,
    UnbindService,
    RegisterBatteryObserver,
    UnregisterBatteryObserver,
    RegisterApp,
    UnregisterApp,
    SendReport {
        device: PeerId,
        report_id: u8,
        data: Vec<u8>,
    },
    ReplyReport {
        device: PeerId,
        report_id: u8,
        data: Vec<u8>,
    },
    ReportError {
        device: PeerId,
        error: HandshakeError,
    },
    Connect(PeerId),
    Disconnect(PeerId),
}

#[derive(Default)]
struct State {
    commands: Vec<StackCommand>,
    peers: BTreeMap<PeerId, ConnectionState>,
    service_sink: Option<EventSink>,
    battery_sink: Option<EventSink>,
    app: Option<AppDescriptor>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, command: StackCommand) -> MutexGuard<'_, State> {
        debug!("loopback <- {:?}", command);
        let mut state = self.lock();
        state.commands.push(command);
        state
    }
}

/// Driver handle. Clones share the same stack.
#[derive(Clone)]
pub struct LoopbackStack {
    shared: Arc<Shared>,
    proxy: Arc<LoopbackProxy>,
}

impl Default for LoopbackStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackStack {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let proxy = Arc::new(LoopbackProxy {
            shared: shared.clone(),
        });
        Self { shared, proxy }
    }

    /// The service handle announced by [`LoopbackStack::announce_service`].
    pub fn proxy(&self) -> Arc<dyn HidProxy> {
        self.proxy.clone()
    }

    pub fn pair(&self, device: &PeerId) {
        self.shared
            .lock()
            .peers
            .entry(device.clone())
            .or_insert(ConnectionState::Disconnected);
    }

    /// Drain the command log.
    pub fn take_commands(&self) -> Vec<StackCommand> {
        std::mem::take(&mut self.shared.lock().commands)
    }

    pub fn peer_state(&self, device: &PeerId) -> Option<ConnectionState> {
        self.shared.lock().peers.get(device).copied()
    }

    /// Change a peer's state without telling anyone.
    pub fn set_peer_state(&self, device: &PeerId, state: ConnectionState) {
        self.shared.lock().peers.insert(device.clone(), state);
    }

    pub fn is_service_bound(&self) -> bool {
        self.shared.lock().service_sink.is_some()
    }

    pub fn has_battery_observer(&self) -> bool {
        self.shared.lock().battery_sink.is_some()
    }

    /// Descriptor of the currently registered application, if any.
    pub fn registered_app(&self) -> Option<AppDescriptor> {
        self.shared.lock().app.clone()
    }

    /// Hand an event to whoever bound the service. Returns `false` if nobody did.
    pub fn deliver(&self, event: StackEvent) -> bool {
        let sink = self.shared.lock().service_sink.clone();
        match sink {
            Some(sink) => {
                sink.deliver(event);
                true
            }
            None => false,
        }
    }

    pub fn announce_service(&self) -> bool {
        self.deliver(StackEvent::ServiceStateChanged(Some(self.proxy())))
    }

    /// The service dies, taking the registered application with it.
    pub fn drop_service(&self) -> bool {
        self.shared.lock().app = None;
        self.deliver(StackEvent::ServiceStateChanged(None))
    }

    /// Confirm a pending registration. Does nothing if no app was registered.
    pub fn confirm_registration(&self) -> bool {
        if self.registered_app().is_none() {
            return false;
        }
        self.deliver(StackEvent::AppStatusChanged {
            plugged_device: None,
            registered: true,
        })
    }

    /// Mark the peer connected and report it, whether or not we asked for it.
    pub fn finish_connect(&self, device: &PeerId) -> bool {
        self.transition(device, ConnectionState::Connected)
    }

    pub fn finish_disconnect(&self, device: &PeerId) -> bool {
        self.transition(device, ConnectionState::Disconnected)
    }

    /// Complete every pending connect and disconnect, repeating while the
    /// resulting events trigger new ones.
    pub fn settle(&self) {
        for _ in 0..16 {
            let pending: Vec<(PeerId, ConnectionState)> = self
                .shared
                .lock()
                .peers
                .iter()
                .filter_map(|(device, state)| match state {
                    ConnectionState::Connecting => {
                        Some((device.clone(), ConnectionState::Connected))
                    }
                    ConnectionState::Disconnecting => {
                        Some((device.clone(), ConnectionState::Disconnected))
                    }
                    _ => None,
                })
                .collect();

            if pending.is_empty() {
                return;
            }
            for (device, state) in pending {
                self.transition(&device, state);
            }
        }
    }

    pub fn report_battery(&self, level: i32, scale: i32) -> bool {
        let sink = self.shared.lock().battery_sink.clone();
        match sink {
            Some(sink) => {
                sink.deliver(StackEvent::BatteryChanged { level, scale });
                true
            }
            None => false,
        }
    }

    /// Host writes an output report, e.g. force feedback.
    pub fn host_set_report(&self, device: &PeerId, report_id: u8, data: &[u8]) -> bool {
        self.deliver(StackEvent::SetReport {
            device: device.clone(),
            report_type: ReportType::Output,
            report_id,
            data: data.to_vec(),
        })
    }

    fn transition(&self, device: &PeerId, state: ConnectionState) -> bool {
        self.set_peer_state(device, state);
        self.deliver(StackEvent::ConnectionStateChanged {
            device: device.clone(),
            state,
        })
    }
}

impl HidPlatform for LoopbackStack {
    fn bind_service(&self, sink: EventSink) {
        self.shared.record(StackCommand::BindService).service_sink = Some(sink);
    }

    fn unbind_service(&self) {
        self.shared.record(StackCommand::UnbindService).service_sink = None;
    }

    fn register_battery_observer(&self, sink: EventSink) {
        self.shared
            .record(StackCommand::RegisterBatteryObserver)
            .battery_sink = Some(sink);
    }

    fn unregister_battery_observer(&self) {
        self.shared
            .record(StackCommand::UnregisterBatteryObserver)
            .battery_sink = None;
    }
}

struct LoopbackProxy {
    shared: Arc<Shared>,
}

impl HidProxy for LoopbackProxy {
    fn register_app(&self, descriptor: &AppDescriptor) -> Result<(), StackError> {
        let mut state = self.shared.record(StackCommand::RegisterApp);
        if state.app.is_some() {
            return Err(StackError::Rejected("app already registered".into()));
        }
        state.app = Some(descriptor.clone());
        Ok(())
    }

    fn unregister_app(&self) -> Result<(), StackError> {
        self.shared
            .record(StackCommand::UnregisterApp)
            .app
            .take()
            .map(|_| ())
            .ok_or_else(|| StackError::Rejected("no app registered".into()))
    }

    fn send_report(&self, device: &PeerId, report_id: u8, data: &[u8]) -> Result<(), StackError> {
        let state = self.shared.record(StackCommand::SendReport {
            device: device.clone(),
            report_id,
            data: data.to_vec(),
        });
        match state.peers.get(device) {
            Some(ConnectionState::Connected) => Ok(()),
            Some(_) => Err(StackError::Rejected(format!("{} is not connected", device))),
            None => Err(StackError::UnknownPeer(device.clone())),
        }
    }

    fn reply_report(
        &self,
        device: &PeerId,
        _report_type: ReportType,
        report_id: u8,
        data: &[u8],
    ) -> Result<(), StackError> {
        self.shared.record(StackCommand::ReplyReport {
            device: device.clone(),
            report_id,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn report_error(&self, device: &PeerId, error: HandshakeError) -> Result<(), StackError> {
        self.shared.record(StackCommand::ReportError {
            device: device.clone(),
            error,
        });
        Ok(())
    }

    fn connect(&self, device: &PeerId) -> Result<(), StackError> {
        let mut state = self.shared.record(StackCommand::Connect(device.clone()));
        let peer = state
            .peers
            .get_mut(device)
            .ok_or_else(|| StackError::UnknownPeer(device.clone()))?;
        if *peer == ConnectionState::Disconnected {
            *peer = ConnectionState::Connecting;
        }
        Ok(())
    }

    fn disconnect(&self, device: &PeerId) -> Result<(), StackError> {
        let mut state = self.shared.record(StackCommand::Disconnect(device.clone()));
        let peer = state
            .peers
            .get_mut(device)
            .ok_or_else(|| StackError::UnknownPeer(device.clone()))?;
        if matches!(*peer, ConnectionState::Connected | ConnectionState::Connecting) {
            *peer = ConnectionState::Disconnecting;
        }
        Ok(())
    }

    fn connected_devices(&self) -> Vec<PeerId> {
        self.devices_matching_states(&[ConnectionState::Connected])
    }

    fn devices_matching_states(&self, states: &[ConnectionState]) -> Vec<PeerId> {
        self.shared
            .lock()
            .peers
            .iter()
            .filter(|(_, state)| states.contains(state))
            .map(|(device, _)| device.clone())
            .collect()
    }

    fn paired_devices(&self) -> Vec<PeerId> {
        self.shared.lock().peers.keys().cloned().collect()
    }
}

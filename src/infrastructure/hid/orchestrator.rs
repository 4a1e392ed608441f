//! Connection Orchestrator
//!
//! Multiplexes any number of local listeners onto a single HID application
//! registration and decides which paired host is "the" connected device.
//!
//! ```text
//! NoService ──bind──▶ Bound/unregistered ──registered──▶ Bound/idle
//!     ▲                                                     │ request_connect
//!     │ service lost (any state)                            ▼
//!     └──────────────── Bound/connected(peer) ◀──────── Bound/connecting
//!                              │ request_connect(other | none)
//!                              ▼
//!                       Bound/disconnecting
//! ```
//!
//! Every public operation and every stack event runs under one lock,
//! including the fan-out to listeners. See [`ProfileListener`] for the
//! resulting reentrancy rule.

use crate::domain::models::{ConnectionState, GamepadState, PeerId, ProfileEvent};
use crate::domain::settings::Settings;
use crate::infrastructure::hid::descriptor::AppDescriptor;
use crate::infrastructure::hid::listener::{same_listener, ProfileListener};
use crate::infrastructure::hid::profile::DeviceProfile;
use crate::infrastructure::hid::session::{battery_fraction, DeviceApp, RegistrationState};
use crate::infrastructure::hid::stack::{EventSink, HidPlatform, HidProxy, StackEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub descriptor: AppDescriptor,
    /// Observe the platform battery and forward it as the battery report.
    pub battery_reporting: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            descriptor: AppDescriptor::default(),
            battery_reporting: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            descriptor: AppDescriptor::with_identity(
                settings.sdp_name.clone(),
                settings.sdp_description.clone(),
                settings.sdp_provider.clone(),
            ),
            battery_reporting: settings.battery_reporting_enabled,
        }
    }
}

struct Inner {
    listeners: Vec<Arc<dyn ProfileListener>>,
    connected_device: Option<PeerId>,
    waiting_for_device: Option<PeerId>,
    is_app_registered: bool,
    session: DeviceApp,
}

impl Inner {
    fn fan_out(&self, event: ProfileEvent) {
        for listener in &self.listeners {
            if listener.interest().wants(&event) {
                listener.on_event(&event);
            }
        }
    }
}

pub struct ConnectionOrchestrator {
    platform: Arc<dyn HidPlatform>,
    profile: Arc<DeviceProfile>,
    battery_reporting: bool,
    inner: Mutex<Inner>,
    this: Weak<Self>,
}

impl ConnectionOrchestrator {
    pub fn new(platform: Arc<dyn HidPlatform>, config: OrchestratorConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            platform,
            profile: Arc::new(DeviceProfile::new()),
            battery_reporting: config.battery_reporting,
            inner: Mutex::new(Inner {
                listeners: Vec::new(),
                connected_device: None,
                waiting_for_device: None,
                is_app_registered: false,
                session: DeviceApp::new(config.descriptor),
            }),
            this: this.clone(),
        })
    }

    /// Register interest in profile events.
    ///
    /// The first listener binds the HID service (and the battery observer);
    /// adding a listener that is already present changes nothing.
    pub fn add_listener(&self, listener: Arc<dyn ProfileListener>) -> Arc<DeviceProfile> {
        let mut inner = self.lock();
        if inner.listeners.iter().any(|l| same_listener(l, &listener)) {
            debug!("Listener already registered");
            return self.profile.clone();
        }

        inner.listeners.push(listener);
        if inner.listeners.len() == 1 {
            info!("First listener registered, binding HID device service");
            self.platform.bind_service(self.sink());
            if self.battery_reporting {
                self.platform.register_battery_observer(self.sink());
            }
        }
        self.profile.clone()
    }

    /// Drop interest in profile events. The last listener tears everything down.
    pub fn remove_listener(&self, listener: &Arc<dyn ProfileListener>) {
        let mut inner = self.lock();
        let Some(index) = inner.listeners.iter().position(|l| same_listener(l, listener)) else {
            debug!("Listener was not registered");
            return;
        };

        inner.listeners.remove(index);
        if !inner.listeners.is_empty() {
            return;
        }

        info!("Last listener removed, releasing HID device service");
        if self.battery_reporting {
            self.platform.unregister_battery_observer();
        }

        for device in self.profile.connected_devices() {
            info!("Disconnecting {}", device);
            if let Err(e) = self.profile.disconnect(&device) {
                warn!("Failed to disconnect {}: {}", device, e);
            }
        }

        inner.session.set_sink(None);
        inner.session.unregister_app();
        self.platform.unbind_service();
        inner.session.detach();
        self.profile.detach();

        inner.connected_device = None;
        inner.waiting_for_device = None;
        inner.is_app_registered = false;
    }

    /// Connect to `device`, disconnecting anything else; `None` just disconnects.
    ///
    /// Before the application is registered the request is remembered and
    /// carried out as soon as registration is confirmed.
    pub fn request_connect(&self, device: Option<PeerId>) {
        let mut inner = self.lock();
        self.request_connect_locked(&mut inner, device);
    }

    /// Send the controller state to the connected host, if there is one.
    pub fn send_gamepad(&self, state: &GamepadState) {
        let mut inner = self.lock();
        if inner.connected_device.is_some() {
            inner.session.send_gamepad(state);
        }
    }

    /// Re-derive connect/disconnect commands from the stack's peer table.
    pub fn reconcile(&self) {
        let mut inner = self.lock();
        self.reconcile_locked(&mut inner);
    }

    /// Entry point for everything the radio stack reports.
    pub fn handle_event(&self, event: StackEvent) {
        let mut inner = self.lock();
        match event {
            StackEvent::ServiceStateChanged(proxy) => {
                self.on_service_state_changed(&mut inner, proxy);
            }
            StackEvent::AppStatusChanged {
                plugged_device,
                registered,
            } => {
                self.on_app_status_changed(&mut inner, plugged_device, registered);
            }
            StackEvent::ConnectionStateChanged { device, state } => {
                self.on_connection_state_changed(&mut inner, device, state);
            }
            StackEvent::GetReport {
                device,
                report_type,
                report_id,
                buffer_size,
            } => {
                debug!("GET_REPORT {:?} {} from {}", report_type, report_id, device);
                inner.session.reply_get_report(&device, report_type, report_id);
                inner.fan_out(ProfileEvent::GetReport {
                    device,
                    report_type,
                    report_id,
                    buffer_size,
                });
            }
            StackEvent::SetReport {
                device,
                report_type,
                report_id,
                data,
            } => {
                debug!("SET_REPORT {:?} {} from {}", report_type, report_id, device);
                inner.fan_out(ProfileEvent::SetReport {
                    device,
                    report_type,
                    report_id,
                    data,
                });
            }
            StackEvent::InterruptData {
                device,
                report_id,
                data,
            } => {
                inner.fan_out(ProfileEvent::InterruptData {
                    device,
                    report_id,
                    data,
                });
            }
            StackEvent::BatteryChanged { level, scale } => match battery_fraction(level, scale) {
                Ok(fraction) => inner.session.send_battery_level(fraction),
                Err(e) => error!("{}", e),
            },
        }
    }

    pub fn profile(&self) -> Arc<DeviceProfile> {
        self.profile.clone()
    }

    pub fn connected_device(&self) -> Option<PeerId> {
        self.lock().connected_device.clone()
    }

    pub fn waiting_for_device(&self) -> Option<PeerId> {
        self.lock().waiting_for_device.clone()
    }

    pub fn is_app_registered(&self) -> bool {
        self.lock().is_app_registered
    }

    pub fn registration(&self) -> RegistrationState {
        self.lock().session.registration()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn on_service_state_changed(&self, inner: &mut Inner, proxy: Option<Arc<dyn HidProxy>>) {
        let available = proxy.is_some();
        match proxy {
            Some(proxy) => {
                info!("HID device service connected");
                self.profile.attach(proxy.clone());
                inner.session.register_app(proxy);
            }
            None => {
                warn!("HID device service disconnected");
                if inner.is_app_registered {
                    // Lost before we could unregister
                    self.on_app_status_changed(inner, None, false);
                }
                inner.session.detach();
                self.profile.detach();
            }
        }

        self.reconcile_locked(inner);
        inner.fan_out(ProfileEvent::ServiceStateChanged { available });
    }

    fn on_app_status_changed(
        &self,
        inner: &mut Inner,
        plugged_device: Option<PeerId>,
        registered: bool,
    ) {
        if inner.is_app_registered == registered {
            debug!("Duplicate app status ({}), ignoring", registered);
            return;
        }

        info!(
            "HID app {}",
            if registered { "registered" } else { "unregistered" }
        );
        inner.is_app_registered = registered;
        inner.session.on_app_status_changed(registered);
        inner.fan_out(ProfileEvent::AppStatusChanged {
            plugged_device,
            registered,
        });

        if registered {
            if let Some(device) = inner.waiting_for_device.clone() {
                debug!("Fulfilling postponed connect to {}", device);
                self.request_connect_locked(inner, Some(device));
            }
        }
    }

    fn on_connection_state_changed(
        &self,
        inner: &mut Inner,
        device: PeerId,
        state: ConnectionState,
    ) {
        info!("{} is {:?}", device, state);
        match state {
            ConnectionState::Connected => {
                // Incoming connection we did not ask for. Keep it only when
                // idle; next to an active peer it is an extra.
                if inner.waiting_for_device.is_none() && inner.connected_device.is_none() {
                    inner.waiting_for_device = Some(device.clone());
                }
            }
            ConnectionState::Disconnected => {
                // Attempt failed or timed out
                if inner.waiting_for_device.as_ref() == Some(&device) {
                    inner.waiting_for_device = None;
                }
            }
            ConnectionState::Connecting | ConnectionState::Disconnecting => {}
        }

        self.reconcile_locked(inner);
        inner.fan_out(ProfileEvent::ConnectionStateChanged { device, state });
    }

    fn request_connect_locked(&self, inner: &mut Inner, device: Option<PeerId>) {
        inner.waiting_for_device = device.clone();
        if !inner.is_app_registered {
            debug!("App not registered yet, postponing connect to {:?}", device);
            return;
        }

        inner.connected_device = None;
        self.reconcile_locked(inner);

        if let Some(device) = device {
            if inner.connected_device.as_ref() == Some(&device) {
                // Already connected, no event will come from the stack
                inner.fan_out(ProfileEvent::ConnectionStateChanged {
                    device,
                    state: ConnectionState::Connected,
                });
            }
        }
    }

    fn reconcile_locked(&self, inner: &mut Inner) {
        let connected = self.profile.connected_devices();

        // The current peer wins over the pending one; everything else goes
        let keep = [&inner.connected_device, &inner.waiting_for_device]
            .into_iter()
            .flatten()
            .find(|device| connected.contains(device))
            .cloned();

        for device in &connected {
            if keep.as_ref() != Some(device) {
                info!("Disconnecting {}", device);
                if let Err(e) = self.profile.disconnect(device) {
                    warn!("Failed to disconnect {}: {}", device, e);
                }
            }
        }

        // Only start a connection once nothing is in flight
        if let Some(target) = &inner.waiting_for_device {
            if inner.is_app_registered
                && self
                    .profile
                    .devices_matching_states(&ConnectionState::ACTIVE)
                    .is_empty()
            {
                info!("Connecting to {}", target);
                if let Err(e) = self.profile.connect(target) {
                    warn!("Failed to connect to {}: {}", target, e);
                }
            }
        }

        let vanished = inner
            .connected_device
            .as_ref()
            .is_some_and(|device| !connected.contains(device));
        if vanished {
            if let Some(device) = inner.connected_device.take() {
                info!("Lost {}", device);
            }
        }

        if inner.connected_device.is_none() {
            if let Some(device) = keep {
                info!("Using {} as the report sink", device);
                inner.connected_device = Some(device);
                inner.waiting_for_device = None;
            }
        }

        inner.session.set_sink(inner.connected_device.clone());
    }

    fn sink(&self) -> EventSink {
        EventSink::new(self.this.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::hid::listener::{ChannelListener, ListenerInterest};
    use crate::infrastructure::hid::loopback::{LoopbackStack, StackCommand};
    use crate::infrastructure::hid::protocol::{self, ID_BATTERY, ID_FEEDBACK, ID_GAMEPAD};
    use crate::domain::models::ReportType;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Records every event it sees.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProfileEvent>>,
        interest: ListenerInterest,
    }

    impl Recorder {
        fn with_interest(interest: ListenerInterest) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                interest,
            })
        }

        fn take(&self) -> Vec<ProfileEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl ProfileListener for Recorder {
        fn on_event(&self, event: &ProfileEvent) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn interest(&self) -> ListenerInterest {
            self.interest
        }
    }

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    fn setup() -> (LoopbackStack, Arc<ConnectionOrchestrator>) {
        let stack = LoopbackStack::new();
        let orchestrator =
            ConnectionOrchestrator::new(Arc::new(stack.clone()), OrchestratorConfig::default());
        (stack, orchestrator)
    }

    /// Listener attached, service up and app registered; command log drained.
    fn registered() -> (LoopbackStack, Arc<ConnectionOrchestrator>, Arc<Recorder>) {
        let (stack, orchestrator) = setup();
        let recorder = Arc::new(Recorder::default());
        orchestrator.add_listener(recorder.clone());
        assert!(stack.announce_service());
        assert!(stack.confirm_registration());
        stack.take_commands();
        recorder.take();
        (stack, orchestrator, recorder)
    }

    fn connected_to(device: &PeerId) -> (LoopbackStack, Arc<ConnectionOrchestrator>, Arc<Recorder>) {
        let (stack, orchestrator, recorder) = registered();
        stack.pair(device);
        orchestrator.request_connect(Some(device.clone()));
        stack.finish_connect(device);
        stack.take_commands();
        recorder.take();
        (stack, orchestrator, recorder)
    }

    #[test]
    fn test_cold_start() {
        let (stack, orchestrator) = setup();
        let host = peer("AA:BB:CC:DD:EE:FF");
        stack.pair(&host);
        assert!(!stack.is_service_bound());

        let recorder = Arc::new(Recorder::default());
        orchestrator.add_listener(recorder.clone());
        assert!(stack.is_service_bound());
        assert!(stack.has_battery_observer());

        stack.announce_service();
        assert_eq!(orchestrator.registration(), RegistrationState::Registering);
        stack.confirm_registration();
        assert!(orchestrator.is_app_registered());
        assert_eq!(stack.registered_app(), Some(AppDescriptor::default()));

        orchestrator.request_connect(Some(host.clone()));
        assert_eq!(
            stack.take_commands(),
            vec![
                StackCommand::BindService,
                StackCommand::RegisterBatteryObserver,
                StackCommand::RegisterApp,
                StackCommand::Connect(host.clone()),
            ]
        );

        stack.finish_connect(&host);
        assert_eq!(orchestrator.connected_device(), Some(host.clone()));
        assert_eq!(orchestrator.waiting_for_device(), None);

        let state = GamepadState {
            b: true,
            ..Default::default()
        };
        orchestrator.send_gamepad(&state);
        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::SendReport {
                device: host.clone(),
                report_id: ID_GAMEPAD,
                data: protocol::encode(&state).to_vec(),
            }]
        );

        assert_eq!(
            recorder.take(),
            vec![
                ProfileEvent::ServiceStateChanged { available: true },
                ProfileEvent::AppStatusChanged {
                    plugged_device: None,
                    registered: true
                },
                ProfileEvent::ConnectionStateChanged {
                    device: host,
                    state: ConnectionState::Connected
                },
            ]
        );
    }

    #[test]
    fn test_send_gamepad_without_peer_is_noop() {
        let (stack, orchestrator, _recorder) = registered();
        orchestrator.send_gamepad(&GamepadState::default());
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (stack, orchestrator, _recorder) = registered();
        let (a, b, c) = (peer("a"), peer("b"), peer("c"));
        for device in [&a, &b, &c] {
            stack.pair(device);
        }
        stack.set_peer_state(&a, ConnectionState::Connected);
        stack.set_peer_state(&b, ConnectionState::Connected);

        orchestrator.request_connect(Some(c.clone()));
        let first = stack.take_commands();
        assert_eq!(
            first,
            vec![StackCommand::Disconnect(a.clone()), StackCommand::Disconnect(b.clone())]
        );

        let before = (orchestrator.connected_device(), orchestrator.waiting_for_device());
        orchestrator.reconcile();
        orchestrator.reconcile();
        assert!(stack.take_commands().is_empty());
        assert_eq!(
            (orchestrator.connected_device(), orchestrator.waiting_for_device()),
            before
        );

        // Once the old peers are gone the pending connect goes out
        stack.finish_disconnect(&a);
        assert!(stack.take_commands().is_empty());
        stack.finish_disconnect(&b);
        assert_eq!(stack.take_commands(), vec![StackCommand::Connect(c.clone())]);
        orchestrator.reconcile();
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_at_most_one_connected_peer() {
        let (stack, orchestrator, _recorder) = registered();
        let (p, q) = (peer("p"), peer("q"));
        stack.pair(&p);
        stack.pair(&q);
        stack.set_peer_state(&p, ConnectionState::Connected);
        stack.set_peer_state(&q, ConnectionState::Connected);

        orchestrator.request_connect(Some(p.clone()));
        assert_eq!(orchestrator.connected_device(), Some(p.clone()));
        assert_eq!(stack.take_commands(), vec![StackCommand::Disconnect(q.clone())]);
        assert_eq!(stack.peer_state(&q), Some(ConnectionState::Disconnecting));
    }

    #[test]
    fn test_switching_peers() {
        let p = peer("p");
        let (stack, orchestrator, _recorder) = connected_to(&p);
        let q = peer("q");
        stack.pair(&q);

        orchestrator.request_connect(Some(q.clone()));
        assert_eq!(orchestrator.connected_device(), None);
        assert_eq!(stack.take_commands(), vec![StackCommand::Disconnect(p.clone())]);

        stack.finish_disconnect(&p);
        assert_eq!(stack.take_commands(), vec![StackCommand::Connect(q.clone())]);
        stack.finish_connect(&q);
        assert_eq!(orchestrator.connected_device(), Some(q));
    }

    #[test]
    fn test_request_connect_none_disconnects() {
        let p = peer("p");
        let (stack, orchestrator, _recorder) = connected_to(&p);

        orchestrator.request_connect(None);
        assert_eq!(orchestrator.connected_device(), None);
        assert_eq!(stack.take_commands(), vec![StackCommand::Disconnect(p.clone())]);

        orchestrator.send_gamepad(&GamepadState::default());
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_request_connect_to_current_peer_notifies() {
        let p = peer("p");
        let (stack, orchestrator, recorder) = connected_to(&p);

        orchestrator.request_connect(Some(p.clone()));
        assert!(stack.take_commands().is_empty());
        assert_eq!(orchestrator.connected_device(), Some(p.clone()));
        assert_eq!(
            recorder.take(),
            vec![ProfileEvent::ConnectionStateChanged {
                device: p,
                state: ConnectionState::Connected
            }]
        );
    }

    #[test]
    fn test_latched_connect() {
        let (stack, orchestrator) = setup();
        let host = peer("host");
        stack.pair(&host);
        let recorder = Arc::new(Recorder::default());
        orchestrator.add_listener(recorder.clone());
        stack.announce_service();
        stack.take_commands();

        orchestrator.request_connect(Some(host.clone()));
        assert_eq!(orchestrator.waiting_for_device(), Some(host.clone()));
        assert!(stack.take_commands().is_empty());

        stack.confirm_registration();
        assert_eq!(stack.take_commands(), vec![StackCommand::Connect(host)]);
    }

    #[test]
    fn test_latched_connect_before_service() {
        let (stack, orchestrator) = setup();
        let host = peer("host");
        stack.pair(&host);
        orchestrator.add_listener(Arc::new(Recorder::default()));

        orchestrator.request_connect(Some(host.clone()));
        stack.announce_service();
        assert!(!stack.take_commands().contains(&StackCommand::Connect(host.clone())));

        stack.confirm_registration();
        assert_eq!(stack.take_commands(), vec![StackCommand::Connect(host)]);
    }

    #[test]
    fn test_duplicate_app_status_is_dropped() {
        let (stack, orchestrator, recorder) = registered();
        stack.confirm_registration();
        assert!(recorder.take().is_empty());
        assert!(orchestrator.is_app_registered());
    }

    #[test]
    fn test_incoming_connection_is_adopted() {
        let (stack, orchestrator, _recorder) = registered();
        let host = peer("host");
        stack.pair(&host);

        stack.finish_connect(&host);
        assert_eq!(orchestrator.connected_device(), Some(host));
        assert_eq!(orchestrator.waiting_for_device(), None);
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_failed_connect_clears_waiting() {
        let (stack, orchestrator, _recorder) = registered();
        let host = peer("host");
        stack.pair(&host);

        orchestrator.request_connect(Some(host.clone()));
        assert_eq!(stack.take_commands(), vec![StackCommand::Connect(host.clone())]);

        // Timed out in the radio stack
        stack.finish_disconnect(&host);
        assert_eq!(orchestrator.waiting_for_device(), None);
        assert_eq!(orchestrator.connected_device(), None);
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_forced_teardown() {
        let p = peer("p");
        let (stack, orchestrator, recorder) = connected_to(&p);

        stack.drop_service();
        assert_eq!(orchestrator.connected_device(), None);
        assert_eq!(orchestrator.waiting_for_device(), None);
        assert!(!orchestrator.is_app_registered());
        assert!(!orchestrator.profile().is_bound());

        assert_eq!(
            recorder.take(),
            vec![
                ProfileEvent::AppStatusChanged {
                    plugged_device: None,
                    registered: false
                },
                ProfileEvent::ServiceStateChanged { available: false },
            ]
        );

        orchestrator.send_gamepad(&GamepadState::default());
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_service_lost_while_registering() {
        let (stack, orchestrator) = setup();
        let host = peer("host");
        stack.pair(&host);
        let recorder = Arc::new(Recorder::default());
        orchestrator.add_listener(recorder.clone());
        stack.announce_service();
        assert_eq!(orchestrator.registration(), RegistrationState::Registering);
        orchestrator.request_connect(Some(host.clone()));

        stack.drop_service();
        assert_eq!(
            recorder.take(),
            vec![
                ProfileEvent::ServiceStateChanged { available: true },
                ProfileEvent::ServiceStateChanged { available: false },
            ]
        );
        assert_eq!(orchestrator.registration(), RegistrationState::Unregistered);
        assert_eq!(orchestrator.waiting_for_device(), Some(host.clone()));
        stack.take_commands();

        stack.announce_service();
        stack.confirm_registration();
        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::RegisterApp, StackCommand::Connect(host)]
        );
    }

    #[test]
    fn test_service_comes_back() {
        let p = peer("p");
        let (stack, orchestrator, _recorder) = connected_to(&p);
        stack.drop_service();
        stack.set_peer_state(&p, ConnectionState::Disconnected);

        stack.announce_service();
        assert_eq!(stack.take_commands(), vec![StackCommand::RegisterApp]);
        stack.confirm_registration();
        assert!(orchestrator.is_app_registered());

        orchestrator.request_connect(Some(p.clone()));
        assert_eq!(stack.take_commands(), vec![StackCommand::Connect(p)]);
    }

    #[test]
    fn test_listener_lifecycle() {
        let (stack, orchestrator) = setup();
        let listener: Arc<dyn ProfileListener> = Arc::new(Recorder::default());

        let first = orchestrator.add_listener(listener.clone());
        let second = orchestrator.add_listener(listener.clone());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(orchestrator.listener_count(), 1);
        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::BindService, StackCommand::RegisterBatteryObserver]
        );

        orchestrator.remove_listener(&listener);
        assert_eq!(orchestrator.listener_count(), 0);
        assert!(!stack.is_service_bound());
        assert!(!stack.has_battery_observer());
        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::UnregisterBatteryObserver, StackCommand::UnbindService]
        );

        // Unknown listener: nothing happens
        orchestrator.remove_listener(&listener);
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_service_stays_bound_while_any_listener_remains() {
        let (stack, orchestrator) = setup();
        let first: Arc<dyn ProfileListener> = Arc::new(Recorder::default());
        let second: Arc<dyn ProfileListener> = Arc::new(Recorder::default());

        orchestrator.add_listener(first.clone());
        orchestrator.add_listener(second.clone());
        assert_eq!(orchestrator.listener_count(), 2);

        orchestrator.remove_listener(&first);
        assert!(stack.is_service_bound());
        orchestrator.remove_listener(&second);
        assert!(!stack.is_service_bound());
    }

    #[test]
    fn test_last_listener_tears_down_connection() {
        let p = peer("p");
        let (stack, orchestrator, recorder) = connected_to(&p);
        let listener: Arc<dyn ProfileListener> = recorder;

        orchestrator.remove_listener(&listener);
        assert_eq!(
            stack.take_commands(),
            vec![
                StackCommand::UnregisterBatteryObserver,
                StackCommand::Disconnect(p.clone()),
                StackCommand::UnregisterApp,
                StackCommand::UnbindService,
            ]
        );
        assert_eq!(orchestrator.connected_device(), None);
        assert_eq!(orchestrator.waiting_for_device(), None);
        assert!(!orchestrator.is_app_registered());

        // A late confirmation of the unregistration is a duplicate
        let late = Arc::new(Recorder::default());
        orchestrator.add_listener(late.clone());
        stack.take_commands();
        orchestrator.handle_event(StackEvent::AppStatusChanged {
            plugged_device: None,
            registered: false,
        });
        assert!(late.take().is_empty());
        assert!(stack.take_commands().is_empty());
        assert!(!orchestrator.is_app_registered());
    }

    #[test]
    fn test_unsolicited_second_peer_is_disconnected() {
        let p = peer("p");
        let (stack, orchestrator, _recorder) = connected_to(&p);
        let x = peer("x");
        stack.pair(&x);

        stack.finish_connect(&x);
        assert_eq!(stack.take_commands(), vec![StackCommand::Disconnect(x.clone())]);
        assert_eq!(stack.peer_state(&x), Some(ConnectionState::Disconnecting));
        assert_eq!(orchestrator.connected_device(), Some(p.clone()));
        assert_eq!(orchestrator.waiting_for_device(), None);

        // The current peer goes away: nothing is left to send to
        stack.finish_disconnect(&p);
        assert_eq!(orchestrator.connected_device(), None);
        orchestrator.send_gamepad(&GamepadState::default());
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_lost_peer_is_dropped_even_with_another_connected() {
        let p = peer("p");
        let (stack, orchestrator, _recorder) = connected_to(&p);
        let x = peer("x");
        stack.pair(&x);

        // Stack swaps peers without telling us about x
        stack.set_peer_state(&x, ConnectionState::Connected);
        stack.finish_disconnect(&p);
        assert_eq!(orchestrator.connected_device(), None);
        assert_eq!(stack.take_commands(), vec![StackCommand::Disconnect(x)]);
    }

    #[test]
    fn test_report_traffic_is_fanned_out() {
        let host = peer("host");
        let (stack, orchestrator, recorder) = connected_to(&host);
        let lifecycle_only = Recorder::with_interest(ListenerInterest::Lifecycle);
        orchestrator.add_listener(lifecycle_only.clone());

        stack.host_set_report(&host, ID_FEEDBACK, &[0x0F, 40, 40, 40, 40, 5, 2, 0]);
        stack.deliver(StackEvent::InterruptData {
            device: host.clone(),
            report_id: ID_FEEDBACK,
            data: vec![0],
        });

        let events = recorder.take();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(ProfileEvent::is_report_traffic));
        assert!(lifecycle_only.take().is_empty());
        assert_eq!(orchestrator.connected_device(), Some(host));
    }

    #[test]
    fn test_get_report_is_answered() {
        let host = peer("host");
        let (stack, orchestrator, recorder) = connected_to(&host);

        orchestrator.send_gamepad(&GamepadState::default());
        stack.take_commands();

        stack.deliver(StackEvent::GetReport {
            device: host.clone(),
            report_type: ReportType::Input,
            report_id: ID_GAMEPAD,
            buffer_size: 16,
        });
        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::ReplyReport {
                device: host,
                report_id: ID_GAMEPAD,
                data: protocol::encode(&GamepadState::default()).to_vec(),
            }]
        );
        assert_eq!(recorder.take().len(), 1);
    }

    #[test]
    fn test_battery_changes() {
        let host = peer("host");
        let (stack, _orchestrator, _recorder) = connected_to(&host);

        assert!(stack.report_battery(50, 100));
        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::SendReport {
                device: host,
                report_id: ID_BATTERY,
                data: vec![128],
            }]
        );

        // Bad readings are logged and dropped
        stack.report_battery(-1, 100);
        stack.report_battery(10, 0);
        assert!(stack.take_commands().is_empty());
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        assert_eq!(
            OrchestratorConfig::from_settings(&settings).descriptor,
            AppDescriptor::default()
        );

        settings.sdp_name = "Couch Pad".to_string();
        settings.battery_reporting_enabled = false;
        let config = OrchestratorConfig::from_settings(&settings);
        assert_eq!(config.descriptor.sdp.name, "Couch Pad");
        assert_eq!(config.descriptor.sdp.provider, settings.sdp_provider);
        assert!(!config.battery_reporting);
    }

    #[test]
    fn test_battery_reporting_disabled() {
        let stack = LoopbackStack::new();
        let config = OrchestratorConfig {
            battery_reporting: false,
            ..Default::default()
        };
        let orchestrator = ConnectionOrchestrator::new(Arc::new(stack.clone()), config);
        orchestrator.add_listener(Arc::new(Recorder::default()));

        assert!(!stack.has_battery_observer());
        assert_eq!(stack.take_commands(), vec![StackCommand::BindService]);
    }

    #[test]
    fn test_events_after_drop_are_discarded() {
        let (stack, orchestrator) = setup();
        orchestrator.add_listener(Arc::new(Recorder::default()));
        drop(orchestrator);

        // The sink is still stored, but its orchestrator is gone
        assert!(stack.announce_service());
        assert!(stack.take_commands().iter().all(|c| *c != StackCommand::RegisterApp));
    }

    async fn next_lifecycle(events: &mut UnboundedReceiver<ProfileEvent>) -> ProfileEvent {
        loop {
            match events.recv().await {
                Some(event) if !event.is_report_traffic() => return event,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_channel_listener_drives_reconnect() {
        let (stack, orchestrator) = setup();
        let host = peer("host");
        stack.pair(&host);
        let (listener, mut events) = ChannelListener::new(ListenerInterest::Lifecycle);
        orchestrator.add_listener(listener);

        stack.announce_service();
        assert_eq!(
            next_lifecycle(&mut events).await,
            ProfileEvent::ServiceStateChanged { available: true }
        );

        stack.confirm_registration();
        match next_lifecycle(&mut events).await {
            // Calling back into the orchestrator is fine outside on_event
            ProfileEvent::AppStatusChanged { registered: true, .. } => {
                orchestrator.request_connect(Some(host.clone()));
            }
            other => panic!("unexpected {:?}", other),
        }

        stack.settle();
        assert_eq!(
            next_lifecycle(&mut events).await,
            ProfileEvent::ConnectionStateChanged {
                device: host.clone(),
                state: ConnectionState::Connected
            }
        );
        assert_eq!(orchestrator.connected_device(), Some(host));
    }
}

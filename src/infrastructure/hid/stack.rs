//! Radio Stack Interface
//!
//! The platform's HID-device service is reached through two seams:
//! [`HidPlatform`] binds the service and the battery source, and the
//! [`HidProxy`] it hands back (inside [`StackEvent::ServiceStateChanged`])
//! carries every command while the service stays bound. Commands are
//! fire-and-forget; outcomes come back later as [`StackEvent`]s.

use crate::domain::models::{ConnectionState, PeerId, ReportType};
use crate::infrastructure::hid::descriptor::AppDescriptor;
use crate::infrastructure::hid::orchestrator::ConnectionOrchestrator;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("HID device service is not bound")]
    ServiceUnavailable,
    #[error("radio stack rejected the command: {0}")]
    Rejected(String),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

/// Error code sent back to the host when a GET_REPORT cannot be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    InvalidReportId,
    Unsupported,
}

/// Live handle to the bound HID-device service.
pub trait HidProxy: Send + Sync {
    fn register_app(&self, descriptor: &AppDescriptor) -> Result<(), StackError>;
    fn unregister_app(&self) -> Result<(), StackError>;

    /// Send an input report on the interrupt channel.
    fn send_report(&self, device: &PeerId, report_id: u8, data: &[u8]) -> Result<(), StackError>;

    /// Answer a GET_REPORT request.
    fn reply_report(
        &self,
        device: &PeerId,
        report_type: ReportType,
        report_id: u8,
        data: &[u8],
    ) -> Result<(), StackError>;
    fn report_error(&self, device: &PeerId, error: HandshakeError) -> Result<(), StackError>;

    fn connect(&self, device: &PeerId) -> Result<(), StackError>;
    fn disconnect(&self, device: &PeerId) -> Result<(), StackError>;

    fn connected_devices(&self) -> Vec<PeerId>;
    fn devices_matching_states(&self, states: &[ConnectionState]) -> Vec<PeerId>;
    fn paired_devices(&self) -> Vec<PeerId>;
}

/// Binds the HID-device service and the battery source.
///
/// Implementations must deliver events later, from their own callback
/// context, never from inside one of these calls.
pub trait HidPlatform: Send + Sync {
    fn bind_service(&self, sink: EventSink);
    fn unbind_service(&self);
    fn register_battery_observer(&self, sink: EventSink);
    fn unregister_battery_observer(&self);
}

/// Asynchronous notification from the radio stack.
#[derive(Clone)]
pub enum StackEvent {
    /// `Some` when the service became available, `None` when it went away.
    ServiceStateChanged(Option<Arc<dyn HidProxy>>),
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
    /// Raw battery reading; `level / scale` is the charge fraction.
    BatteryChanged { level: i32, scale: i32 },
}

impl fmt::Debug for StackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceStateChanged(proxy) => f
                .debug_tuple("ServiceStateChanged")
                .field(&proxy.is_some())
                .finish(),
            Self::AppStatusChanged {
                plugged_device,
                registered,
            } => f
                .debug_struct("AppStatusChanged")
                .field("plugged_device", plugged_device)
                .field("registered", registered)
                .finish(),
            Self::ConnectionStateChanged { device, state } => f
                .debug_struct("ConnectionStateChanged")
                .field("device", device)
                .field("state", state)
                .finish(),
            Self::GetReport {
                device,
                report_type,
                report_id,
                buffer_size,
            } => f
                .debug_struct("GetReport")
                .field("device", device)
                .field("report_type", report_type)
                .field("report_id", report_id)
                .field("buffer_size", buffer_size)
                .finish(),
            Self::SetReport {
                device,
                report_type,
                report_id,
                data,
            } => f
                .debug_struct("SetReport")
                .field("device", device)
                .field("report_type", report_type)
                .field("report_id", report_id)
                .field("data", data)
                .finish(),
            Self::InterruptData {
                device,
                report_id,
                data,
            } => f
                .debug_struct("InterruptData")
                .field("device", device)
                .field("report_id", report_id)
                .field("data", data)
                .finish(),
            Self::BatteryChanged { level, scale } => f
                .debug_struct("BatteryChanged")
                .field("level", level)
                .field("scale", scale)
                .finish(),
        }
    }
}

/// Where the platform delivers [`StackEvent`]s.
///
/// Holds the orchestrator weakly; events sent after it is dropped are discarded.
#[derive(Clone)]
pub struct EventSink {
    target: Weak<ConnectionOrchestrator>,
}

impl EventSink {
    pub(crate) fn new(target: Weak<ConnectionOrchestrator>) -> Self {
        Self { target }
    }

    pub fn deliver(&self, event: StackEvent) {
        match self.target.upgrade() {
            Some(orchestrator) => orchestrator.handle_event(event),
            None => trace!("Dropping {:?}, orchestrator is gone", event),
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

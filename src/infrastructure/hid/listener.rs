//! Profile Listeners
//!
//! Listeners are called synchronously while the orchestrator holds its lock.
//! A listener must return quickly and must never call back into the
//! orchestrator from `on_event`; doing so deadlocks. Consumers that need to
//! react with orchestrator calls should use [`ChannelListener`] and handle
//! the events from their own task.

use crate::domain::models::ProfileEvent;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which kinds of [`ProfileEvent`] a listener receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerInterest {
    #[default]
    All,
    /// Service, registration and connection changes only
    Lifecycle,
    /// GET_REPORT, SET_REPORT and interrupt data only
    Reports,
}

impl ListenerInterest {
    pub fn wants(self, event: &ProfileEvent) -> bool {
        match self {
            Self::All => true,
            Self::Lifecycle => !event.is_report_traffic(),
            Self::Reports => event.is_report_traffic(),
        }
    }
}

pub trait ProfileListener: Send + Sync {
    fn on_event(&self, event: &ProfileEvent);

    fn interest(&self) -> ListenerInterest {
        ListenerInterest::All
    }
}

/// Forwards events into a tokio channel.
pub struct ChannelListener {
    event_sender: mpsc::UnboundedSender<ProfileEvent>,
    interest: ListenerInterest,
}

impl ChannelListener {
    pub fn new(interest: ListenerInterest) -> (Arc<Self>, mpsc::UnboundedReceiver<ProfileEvent>) {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let listener = Arc::new(Self {
            event_sender,
            interest,
        });
        (listener, event_receiver)
    }
}

impl ProfileListener for ChannelListener {
    fn on_event(&self, event: &ProfileEvent) {
        // Receiver dropped: nobody is interested any more
        let _ = self.event_sender.send(event.clone());
    }

    fn interest(&self) -> ListenerInterest {
        self.interest
    }
}

/// Identity comparison used to deduplicate listeners.
pub(crate) fn same_listener(a: &Arc<dyn ProfileListener>, b: &Arc<dyn ProfileListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

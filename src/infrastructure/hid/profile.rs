//! Paired-peer registry handle returned to listeners.

use crate::domain::models::{ConnectionState, PeerId};
use crate::infrastructure::hid::stack::{HidProxy, StackError};
use std::sync::{Arc, Mutex, PoisonError};

/// Query and command the paired hosts through whichever service is bound.
///
/// Remains valid across service rebinds; while nothing is bound the queries
/// return nothing and commands fail with [`StackError::ServiceUnavailable`].
#[derive(Default)]
pub struct DeviceProfile {
    proxy: Mutex<Option<Arc<dyn HidProxy>>>,
}

impl DeviceProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, proxy: Arc<dyn HidProxy>) {
        *self.slot() = Some(proxy);
    }

    pub(crate) fn detach(&self) {
        *self.slot() = None;
    }

    pub fn is_bound(&self) -> bool {
        self.slot().is_some()
    }

    pub fn connected_devices(&self) -> Vec<PeerId> {
        self.current()
            .map(|proxy| proxy.connected_devices())
            .unwrap_or_default()
    }

    pub fn devices_matching_states(&self, states: &[ConnectionState]) -> Vec<PeerId> {
        self.current()
            .map(|proxy| proxy.devices_matching_states(states))
            .unwrap_or_default()
    }

    pub fn paired_devices(&self) -> Vec<PeerId> {
        self.current()
            .map(|proxy| proxy.paired_devices())
            .unwrap_or_default()
    }

    pub fn connect(&self, device: &PeerId) -> Result<(), StackError> {
        self.current()
            .ok_or(StackError::ServiceUnavailable)?
            .connect(device)
    }

    pub fn disconnect(&self, device: &PeerId) -> Result<(), StackError> {
        self.current()
            .ok_or(StackError::ServiceUnavailable)?
            .disconnect(device)
    }

    // Clone the handle out so no call into the stack happens under our lock
    fn current(&self) -> Option<Arc<dyn HidProxy>> {
        self.slot().clone()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn HidProxy>>> {
        self.proxy.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

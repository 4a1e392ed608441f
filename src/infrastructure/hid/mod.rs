//! HID Device Module
//!
//! Presents the device to a paired host as a Bluetooth HID game pad.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 ConnectionOrchestrator                  │
//! │  (listeners, connected peer, pending connect, one lock) │
//! └───────┬──────────────────┬───────────────────┬──────────┘
//!         │                  │                   │
//!         ▼                  ▼                   ▼
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐
//! │  DeviceApp   │   │ DeviceProfile│   │  HidPlatform   │
//! │ - register   │   │ - peers      │   │ - bind service │
//! │ - sink       │   │ - connect    │   │ - battery      │
//! │ - reports    │   │ - disconnect │   │                │
//! └──────┬───────┘   └──────┬───────┘   └───────┬────────┘
//!        │                  │                   │
//!        ▼                  ▼                   ▼
//! ┌──────────────┐   ┌─────────────────────────────────────┐
//! │   Protocol   │   │      HidProxy  ◀── StackEvent ──    │
//! │  Descriptor  │   │  (radio stack, or the loopback)     │
//! └──────────────┘   └─────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Input report encoding and feedback report decoding
//! - [`descriptor`] - Report descriptor, SDP record and QoS request
//! - [`stack`] - Radio stack traits, events and errors
//! - [`session`] - Application registration and the report sink
//! - [`profile`] - Paired-peer queries handed to listeners
//! - [`listener`] - Listener trait and the channel adapter
//! - [`orchestrator`] - The connection state machine
//! - [`loopback`] - In-memory radio stack

pub mod descriptor;
pub mod listener;
pub mod loopback;
pub mod orchestrator;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod stack;

pub use listener::{ChannelListener, ListenerInterest, ProfileListener};
pub use orchestrator::{ConnectionOrchestrator, OrchestratorConfig};
pub use profile::DeviceProfile;

//! Application service
//!
//! Wires resolver, monitors, hub and supervisor together and exposes the
//! current RTC config to the web boundary.

pub mod agent;
pub mod app;
pub mod config_server;
pub mod publisher;
pub mod settings_store;

pub use agent::{ActionDispatcher, ActionHandler, ControlAgentClient};
pub use app::{wait_for_app_ready, AppContext, AppStatus, ServiceState, SessionBackend};
pub use config_server::ConfigServer;
pub use publisher::{RtcConfigPublisher, SignalingBoundary};
pub use settings_store::SettingsStore;

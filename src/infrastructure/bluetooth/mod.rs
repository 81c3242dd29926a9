//! Bluetooth Module
//!
//! Runs the central-role session against a radio adapter.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  SessionCommand   ┌────────────────────────┐
//! │ Presentation ├──────────────────►│     SessionService     │
//! │              │◄──────────────────┤  (owns SessionManager) │
//! └──────────────┘  SessionSnapshot  └───────┬────────▲───────┘
//!                                   Transport│        │TransportEvent
//!                                    Request ▼        │
//!                                    ┌────────────────┴───────┐
//!                                    │   Transport adapter    │
//!                                    │ (loopback, or a radio) │
//!                                    └────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`service`] - Single-task actor that serializes events and commands
//! - [`loopback`] - In-process peripheral for demos and tests

pub mod loopback;
pub mod service;

// Re-export main service for convenience
pub use loopback::{LoopbackOptions, LoopbackTransport};
pub use service::{SessionCommand, SessionHandle, SessionService};

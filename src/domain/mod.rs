//! Domain Module
//!
//! Protocol state and decision logic, independent of any radio stack.
//!
//! - [`models`] - Devices, GATT records, connection state, session log, snapshots
//! - [`transport`] - Adapter contract (requests out, events in)
//! - [`session`] - Connection state machine, discovery pipeline and send path
//! - [`binding`] - Write/notify characteristic selection
//! - [`decoder`] - Inbound payload classification and log append rules
//! - [`settings`] - Persisted configuration
//! - [`error`] - Session error kinds

pub mod binding;
pub mod decoder;
pub mod error;
pub mod models;
pub mod session;
pub mod settings;
pub mod transport;

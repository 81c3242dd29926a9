//! Central-role BLE session manager: scan, connect to one peripheral,
//! discover its GATT layout, bind a write and a notify characteristic,
//! decode inbound payloads and send outbound ones.

pub mod domain;
pub mod infrastructure;
pub mod presentation;

//! Desktop client for the 8-cell balancer.
//!
//! The balancer notifies one `(voltage, current)` pair per cell about once a
//! second. [`TelemetryAggregator`] keeps those samples in three rolling
//! windows per channel (2 minutes, 1 hour, 12 hours) by averaging finer
//! windows into coarser ones, and can also be filled from the device's own
//! stored history. [`link`] talks to the device over BLE with btleplug and
//! [`ui`] plots the windows with egui.

pub mod aggregator;
pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod latch;
pub mod link;
pub mod payload;
pub mod session;
pub mod ui;
pub mod window;

pub use aggregator::{Readiness, TelemetryAggregator};
pub use channel::{Channel, Quantity, Resolution, CELL_COUNT};
pub use error::TelemetryError;
pub use session::Session;

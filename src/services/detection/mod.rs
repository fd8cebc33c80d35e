//! Background duplicate detection.
//!
//! A detection task scans one project's candidates page by page, compares
//! each new record with the ones seen before, and clusters records whose
//! combined score reaches the threshold. Changed clusters are written to the
//! [`DuplicateStore`](crate::storage::DuplicateStore) after every page.
//!
//! # Lifecycle
//!
//! ```text
//! start_detection ─► validate ─► AdmissionGate ─► pending ─► running
//!                        │             │                        │
//!                   InvalidInput   QueueBusy        ┌───────────┼───────────┐
//!                   (no task)      (no task)        ▼           ▼           ▼
//!                                               completed    failed    cancelled
//! ```
//!
//! The admission slot is released on every exit path before the terminal
//! state becomes visible.

mod cluster;
mod config;
mod manager;
mod scan;

pub use config::DetectionConfig;
pub use manager::DetectionTaskManager;

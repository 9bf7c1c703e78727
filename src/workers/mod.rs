//! Background loops that enforce a session while it is On.

pub mod capture_monitor;
pub mod managed;
pub mod process_killer;

pub use capture_monitor::{CaptureBatch, CaptureMonitor, CaptureMonitorConfig};
pub use managed::{ManagedWorker, WorkerLoop};
pub use process_killer::ProcessKiller;

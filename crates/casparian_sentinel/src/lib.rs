//! Sentinel: coordinator / control plane for the execution fabric.

pub mod control;
pub mod sentinel;

pub use control::{ControlRequest, ControlResponse, JobInfo, QueueStatsInfo};
pub use sentinel::{apply_conclude, dispatch_command_for, ConnectedWorker, Sentinel, SentinelConfig};

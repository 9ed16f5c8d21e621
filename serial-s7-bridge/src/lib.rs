//! Relay from serial instruments to Siemens S7 data blocks.
//!
//! Each configured device pairs one instrument with one controller. A
//! poller sends the device's commands in order, validates each response
//! line against the command patterns, encodes it, and queues it. A writer
//! drains the queue into `DB<db_number>` at `start_address + offset`.
//!
//! # Data flow
//!
//! ```text
//! instrument --(CR terminated lines)--> InstrumentPoller
//!     --> ResponseMatcher --> encode --> BoundedRelayQueue
//!     --> ControllerWriter --(S7 WriteVar)--> controller
//! ```
//!
//! The queue is bounded and drops the oldest item when full, so a slow or
//! unreachable controller never stalls instrument polling.

pub mod command;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod instrument;
pub mod matcher;
pub mod poller;
pub mod queue;
pub mod s7;
pub mod supervisor;
pub mod timing;
pub mod writer;

pub use command::{CommandKind, CommandSpec};
pub use config::SerialS7BridgeConfig;
pub use error::RelayError;
pub use supervisor::DeviceSupervisor;

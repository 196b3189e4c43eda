//! # Roboteq Core Library
//!
//! Driver for dual-channel Roboteq motor controllers on a half-duplex
//! ASCII serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Command encoding and reply framing for the controller's ASCII protocol
//! - A single-flight dispatcher with bounded retry and echo skipping
//! - Typed telemetry decoding with a per-query snapshot cache
//! - Threshold diagnostics and an async polling task
//! - A simulated controller for running without hardware
//!
//! ## Example
//!
//! ```rust,no_run
//! use roboteq_core::prelude::*;
//!
//! let controller = Controller::open_first_available(ControllerConfig::default())?;
//! if controller.controller_present() {
//!     controller.set_motor_speeds(250, 250)?;
//!     let volts = controller.get_volts()?;
//!     println!("{:?}", volts);
//! }
//! # Ok::<(), roboteq_core::protocol::ProtocolError>(())
//! ```

pub mod config;
pub mod controller;
pub mod demo;
pub mod diagnostics;
pub mod poller;
pub mod protocol;
pub mod telemetry;

pub use controller::Controller;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ControllerConfig, DriverConfig, PollConfig};
    pub use crate::controller::Controller;
    pub use crate::demo::SimulatedController;
    pub use crate::diagnostics::{evaluate, DiagnosticLevel, DiagnosticStatus, DiagnosticThresholds};
    pub use crate::poller::{PollEvent, TelemetryPoller, TelemetryUpdate};
    pub use crate::protocol::{Command, LinkState, ProtocolError, Transport};
    pub use crate::telemetry::{
        CachedSnapshot, FaultFlags, StatusFlags, TelemetryCache, TelemetryKind, TelemetrySnapshot,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

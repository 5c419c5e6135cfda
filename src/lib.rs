#![cfg_attr(docsrs, feature(doc_cfg))]
//! # bmstest_lib
//!
//! Capacity testing for lithium battery packs behind a smart BMS.
//!
//! The crate has two halves:
//!
//! - [`protocol`]: the BMS wire format. Request builders, frame validation
//!   and decoders for basic info, cell voltages, version and MOS control.
//! - [`engine`]: the test session state machine. Pre-check, sample recording
//!   with coulomb counting, health monitoring and the pass/fail verdict.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, used to build the `bmstest` command-line tool.
//!
//! ### Client Features
//! - `serialport`: Enables the **synchronous** client using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** client using `tokio` and `tokio-serial`.

/// Coulomb counting and sample smoothing.
pub mod capacity;
/// Battery chemistry profiles.
pub mod chemistry;
/// YAML test configuration.
pub mod config;
pub mod engine;
/// Contains error types for the library.
mod error;
pub mod health;
pub mod precheck;
/// Defines the communication protocol for the BMS.
pub mod protocol;
pub mod session;

pub use chemistry::{Chemistry, ChemistryProfile};
pub use config::TestConfig;
pub use engine::{Clock, MonotonicClock, SessionParams, SharedEngine, TestEngine};
pub use error::Error;
pub use health::{HealthEvent, HealthEventKind, HealthStatus, OverallHealth};
pub use precheck::PreCheckResult;
pub use protocol::BasicInfo;
pub use session::{CellSample, TestResult, TestSession, TestStatus};

/// Synchronous client for BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous client for BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;

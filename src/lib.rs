#![cfg_attr(docsrs, feature(doc_cfg))]
//! # cellbms_lib
//!
//! This crate implements the master side of a serial cell-monitor
//! chain: framing and checksumming of command packets, round-robin
//! voltage polling with ack/retry, decoding of compact status frames,
//! and a fixed-point PID loop that regulates a charger from the
//! pack's stress reading.
//!
//! The core ([`bms::Bms`]) is IO-free and byte-oriented; transports
//! and collaborators (charger, data bus, fault line) attach through
//! small traits, so the same state machine runs against a serial
//! port, a test harness, or anything else that moves bytes.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for
//!   compiling the `cellbms` command-line tool and pulls in
//!   `serialport`.
//! - `serialport`: Enables the synchronous serial transport using the
//!   `serialport` crate.
//! - `bin-dependencies`: Enables all features required by the
//!   `cellbms` binary executable.

/// Core polling, framing and retry state machine.
pub mod bms;
/// Charger regulation: PID loop, soak counter, shutdown.
pub mod charge;
/// Configuration structures and YAML loading.
pub mod config;
mod error;
/// Fixed-point PID controller.
pub mod pid;
/// Wire protocol: frame codec, command builders, reply parsers.
pub mod protocol;
/// Bounded byte queues decoupling the core from its transport.
pub mod queue;

pub use error::{Error, Fault, FaultLine};

/// Synchronous serial transport for the core.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

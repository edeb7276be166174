//! Bounded pools and pipeline stages for the owpeer bus
//!
//! This crate moves frames and objects between the serial link and the
//! application using only fixed-capacity storage:
//!
//! - [`pool`]: bounded item pools with an integrated FIFO and priority sends
//! - [`pipeline`]: link reader, decoder, dispatcher, encoder and link writer
//! - [`handler`]: the application's per-kind callbacks
//! - [`config`]: build-time capacities
//!
//! Everything is generic over an `embassy-sync` raw mutex, so the same code
//! runs single-core with `NoopRawMutex`, across cores and interrupts with
//! `CriticalSectionRawMutex`, and on a host in tests.

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod config;
pub mod handler;
pub mod pipeline;
pub mod pool;

pub use handler::BusHandler;
pub use pipeline::Bus;
pub use pool::{Occupancy, Pool, Slot};

//! This crate bridges a Plasmatronics PLxx solar charge controller to an MQTT broker.
//!
//! The controller is polled over its proprietary serial protocol. Each configured tag names one
//! controller register; its value is scaled, rendered through a printf-style format and
//! published to the tag's topic. Tags are grouped into update cycles that fire at their own
//! intervals, and every tag carries its own policy for failed reads.
//!
//! The serial port used for controller comms should be configured like so:
//! * Baud rate: 300, 1200, 2400 or 9600 (default 9600)
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! Layering, leaves first:
//! * [`protocol`] and [`register`] describe the wire format and register map.
//! * [`transport`] runs request/response transactions over any `embedded_io` port, with
//!   [`serial`] supplying the real device.
//! * [`tag`], [`cycle`] and [`scheduler`] decide what to read and what to publish.
//! * [`broker`] keeps the MQTT session alive and [`orchestrator`] drives the main loop.

pub mod broker;
pub mod config;
pub mod cycle;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod protocol;
pub mod register;
pub mod scheduler;
pub mod serial;
pub mod shutdown;
pub mod tag;
pub mod transport;

#[cfg(test)]
mod mock_broker;
#[cfg(test)]
mod mock_serial;

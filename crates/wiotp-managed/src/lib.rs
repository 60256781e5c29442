//! `wiotp-managed` runs the device-management protocol of the Watson IoT
//! Platform for a device, or for a device attached to a gateway.
//!
//! A managed client registers itself with the platform and keeps its
//! registration alive by renewing the lease before it expires. Once managed,
//! it can publish its location, diagnostic error codes and log entries, and
//! notify the platform about changes to the attributes the platform observes.
//!
//! Every client-initiated request is correlated with its response through a
//! unique identifier. Callers receive a [`pending::Completion`] which resolves
//! when the response arrives, when the request expires, or when the client
//! shuts down.
//!
//! The platform may also initiate requests, such as a reboot, a firmware
//! download or a management-extension action. These are dispatched to the
//! callbacks registered in [`dispatcher::Handlers`] on blocking threads, so a
//! slow callback never stalls message delivery. Requests without a callback
//! are answered as not implemented.
//!
//! The client runs on top of a [`transport::Transport`]. An MQTT 5 transport
//! is provided by the [`mqtt`] module, while tests and other integrations can
//! provide their own.
//!
//! A `tokio` runtime is required.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The managed client.
pub mod client;
/// Client configuration.
pub mod config;
/// Handlers for platform-initiated requests.
pub mod dispatcher;
/// Error management.
pub mod error;
/// Firmware update state machine.
pub mod firmware;
/// MQTT transport.
pub mod mqtt;
/// Request correlation.
pub mod pending;
/// Responses to platform-initiated requests.
pub mod responder;
/// Management session state.
pub mod session;
/// Transport abstraction.
pub mod transport;

mod sync;

pub use wiotp;

#[cfg(test)]
mod tests;

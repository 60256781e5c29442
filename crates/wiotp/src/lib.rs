//! `wiotp` describes the device-management protocol spoken between a managed
//! client and the Watson IoT Platform.
//!
//! A managed client is a connected identity, either a device or a gateway,
//! which takes part in the device-management protocol on top of plain
//! telemetry. The protocol runs over a publish/subscribe transport:
//! every client-initiated request carries a correlation identifier (`reqId`)
//! which the platform echoes back on a shared response topic, while
//! platform-initiated requests, such as a reboot or a firmware download,
//! arrive on dedicated topics and must always be answered.
//!
//! This crate contains only the protocol vocabulary:
//!
//! - the identity of a client and the topic scheme derived from it
//! - the wire messages exchanged with the platform
//! - device information and firmware descriptors
//! - the codecs used to encode and decode event payloads
//!
//! It does not perform any I/O, hence it can be used in `no_std`
//! environments with an allocator. The runtime driving the protocol lives in
//! the `wiotp-managed` crate.

#![no_std]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

extern crate alloc;

/// Payload codecs and their registry.
pub mod codec;
/// Device information.
pub mod device;
/// Error management.
pub mod error;
/// Firmware descriptors and states.
pub mod firmware;
/// Client identity.
pub mod identity;
/// Wire messages.
pub mod message;
/// Response codes used by the protocol.
pub mod response;
/// Topic scheme.
pub mod topic;

mod macros;

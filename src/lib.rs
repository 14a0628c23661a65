//! An embedded Bluetooth Classic SDP client.
//!
//! Scree implements the client side of the *Service Discovery Protocol* (SDP), the catalog
//! protocol Classic Bluetooth devices use to publish their services. Given an open L2CAP channel
//! to a remote device, a [`DiscoverySession`] drives the multi-round request/response
//! conversation, reassembles fragmented responses, and decodes the self-describing attribute
//! stream into a [`DiscoveryDb`] owned by the caller.
//!
//! # Using the crate
//!
//! Scree is runtime and hardware-agnostic: It does not manage the L2CAP connection itself and
//! never blocks. The host stack provides a few services through the [`SdpChannel`] trait:
//! * A non-blocking datagram enqueue towards the remote's SDP channel (PSM `0x0001`).
//! * An inactivity timer that can be armed and cancelled.
//!
//! In return, the host forwards channel events (`on_connect`, `on_data`, `on_disconnect`, a
//! timer firing) to the session. All entry points run to completion on the host's serialization
//! context; there is no internal locking.
//!
//! [`DiscoverySession`]: sdp/client/struct.DiscoverySession.html
//! [`DiscoveryDb`]: sdp/db/struct.DiscoveryDb.html
//! [`SdpChannel`]: sdp/trait.SdpChannel.html

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
mod log;
#[macro_use]
mod utils;

pub mod bytes;
mod device_address;
mod error;
pub mod sdp;
pub mod time;
pub mod uuid;

pub use self::device_address::DeviceAddress;
pub use self::error::Error;

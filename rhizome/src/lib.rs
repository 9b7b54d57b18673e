//! # Rhizome
//!
//! A secure peer-to-peer publish/subscribe substrate over ZeroMQ with
//! mandatory CURVE encryption and ZAP authentication, for distributed
//! soft-realtime systems (artificial life, distributed decision making,
//! telemetry sharing).
//!
//! Each peer, an [`Efunguz`], is identified by its long-term CURVE public
//! key. It publishes named byte-sequence records ([`Etale`]s) that remote
//! peers subscribe to through per-peer [`Ehypha`] objects, by key and title.
//!
//! Two structurally identical transports:
//!
//! - **Clear TCP** ([`Transport::Tcp`]): peers announce their publisher port
//!   to catalogue services with short beacons; catalogues republish
//!   `(key, endpoint)` bindings, and each ehypha picks its endpoint by
//!   majority vote over the catalogues it hears from.
//! - **Onion** ([`Transport::Tor`]): subscriber sockets reach
//!   `<onion>:port` through a SOCKS proxy; endpoints come from
//!   configuration and no catalogue is involved.
//!
//! ## Example
//!
//! ```no_run
//! use rhizome::prelude::*;
//!
//! fn main() -> rhizome::Result<()> {
//!     let (that_public, _) = rhizome::keys::generate_keypair()?;
//!     let (_, my_secret) = rhizome::keys::generate_keypair()?;
//!
//!     let mut peer = Efunguz::new(&my_secret, DEF_PUBSUB_PORT, Transport::Tcp)?;
//!     let (hypha, _) = peer.add_ehypha_at(&that_public, "203.0.113.5", DEF_PUBSUB_PORT)?;
//!     hypha.add_etale("zone")?;
//!
//!     loop {
//!         peer.emit_etale("pulse", &[Bytes::from_static(b"alive")])?;
//!         peer.update()?;
//!         std::thread::sleep(std::time::Duration::from_millis(20));
//!     }
//! }
//! ```
//!
//! Scheduling is single-threaded and cooperative: nothing here spawns a
//! thread, and all public APIs are non-blocking apart from the transport's
//! own internal buffering. Embedders call [`Efunguz::update`] from their own
//! loop and simply stop calling it to wind down.

#![deny(unsafe_code)]

pub mod dev_tracing;
mod efunguz;
mod ehypha;
mod etale;

pub use efunguz::{Efunguz, Transport};
pub use ehypha::Ehypha;
pub use etale::Etale;

// Re-export the shared kernel under its concern names.
pub use rhizome_core::error::{Result, RhizomeError};
pub use rhizome_core::status::Status;
pub use rhizome_core::{connpoint, consts, keys, time, whitelist};

/// Prelude module for convenient imports
///
/// ```rust
/// use rhizome::prelude::*;
/// ```
pub mod prelude {
    pub use super::consts::*;
    pub use super::{Efunguz, Ehypha, Etale, Status, Transport};
    pub use bytes::Bytes;
}

//! Rhizome Core
//!
//! Runtime-agnostic building blocks shared by the peer substrate and the
//! catalogue service:
//! - Z85 key normalization and derivation (`keys`)
//! - Microsecond time source (`time`)
//! - Idempotent operation statuses (`status`)
//! - Wire, port and interval constants (`consts`)
//! - `tcp://host:port` endpoint validation (`connpoint`)
//! - Whitelist file parsing (`whitelist`)
//! - ZAP authentication responder (`zap`)
//! - Error types (`error`)

#![deny(unsafe_code)]

pub mod connpoint;
pub mod consts;
pub mod error;
pub mod keys;
pub mod status;
pub mod time;
pub mod whitelist;
pub mod zap;

// A small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::consts::*;
    pub use crate::error::{Result, RhizomeError};
    pub use crate::keys::cut_pad_key;
    pub use crate::status::Status;
    pub use crate::time::time_musec;
}

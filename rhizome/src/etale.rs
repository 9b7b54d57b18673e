//! The published record: a named vector of byte-sequence parts.

use bytes::Bytes;

/// A named, versioned tuple of byte-sequences published by one peer and
/// subscribed by others.
///
/// An `Etale` lives inside the [`crate::Ehypha`] that subscribes to it; only
/// that ehypha mutates it, atomically per successfully decoded message.
/// While paused, the record keeps whatever the last un-paused receipt left.
#[derive(Debug, Clone)]
pub struct Etale {
    pub(crate) parts: Vec<Bytes>,
    pub(crate) t_out: i64,
    pub(crate) t_in: i64,
    pub(crate) paused: bool,
}

impl Etale {
    pub(crate) fn new() -> Self {
        Self {
            parts: Vec::new(),
            t_out: -1,
            t_in: -1,
            paused: false,
        }
    }

    /// Payload parts of the last receipt. Empty before the first one.
    #[must_use]
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    /// Publisher's wall clock at emission, µs since the Unix epoch.
    /// -1 before the first receipt.
    #[must_use]
    pub fn t_out(&self) -> i64 {
        self.t_out
    }

    /// Local wall clock at receipt, µs since the Unix epoch.
    /// -1 before the first receipt.
    #[must_use]
    pub fn t_in(&self) -> i64 {
        self.t_in
    }

    /// True while updates for this title are ignored.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.paused
    }
}

/// Topic frame for a title: the UTF-8 title bytes followed by one null byte.
///
/// The terminator keeps prefix-based subscription exact: a subscription to
/// `"zone"` must not match a publication of `"zones"`.
pub(crate) fn title_topic(title: &str) -> Vec<u8> {
    let mut topic = Vec::with_capacity(title.len() + 1);
    topic.extend_from_slice(title.as_bytes());
    topic.push(0);
    topic
}

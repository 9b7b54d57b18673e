//! Wire, port and interval constants shared across the substrate.
//!
//! All intervals are in microseconds since they are compared against the
//! [`crate::time::time_musec`] clock.

/// Length of a Z85-encoded CURVE key (maps to 32 raw bytes).
pub const KEY_Z85_LEN: usize = 40;

/// Length of the random routing identity used by onion-transport publishers.
pub const ZAP_SESSION_ID_LEN: usize = 32;

/// ZAP version constant (RFC 27).
pub const ZAP_VERSION: &[u8] = b"1.0";

/// ZAP endpoint in the transport's in-process namespace (RFC 27).
pub const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";

/// ZAP security domain. Must be non-empty for authentication to engage.
pub const ZAP_DOMAIN: &str = "rhizome";

/// Mechanism identifier carried in ZAP requests for CURVE sessions (RFC 27).
pub const CURVE_MECHANISM: &[u8] = b"CURVE";

/// Routing identity of a clear-TCP peer publisher and of a catalogue publisher.
pub const ROUTING_ID_PUBSUB: &[u8] = b"pubsub";

/// Routing identity of a catalogue beacon puller.
pub const ROUTING_ID_BEACON: &[u8] = b"beacon";

/// Default port of a peer's publisher.
pub const DEF_PUBSUB_PORT: u16 = 0xEDAF; // 60847

/// Default port of a catalogue's beacon puller.
pub const DEF_ECATAL_BEACON_PORT: u16 = 0xCAEB; // 51947

/// Default port of a catalogue's publisher.
pub const DEF_ECATAL_PUBSUB_PORT: u16 = 0xD21F; // 53791

/// Default SOCKS proxy of a local Tor daemon (from /etc/tor/torrc).
pub const DEF_SOCKS_PROXY_HOST: &str = "127.0.0.1";
pub const DEF_SOCKS_PROXY_PORT: u16 = 9050;

/// Linger applied to every socket so teardown never blocks.
pub const DEF_LINGER: i32 = 0;

/// How often a peer announces its publisher port to catalogues.
pub const DEF_BEACON_INTERVAL: i64 = 2_000_000;

/// How long a catalogue-reported endpoint keeps its vote. Negative: forever.
pub const DEF_ECATAL_FORGET_INTERVAL: i64 = 60_000_000;

/// How long a catalogue keeps a silent peer's endpoint published.
pub const DEF_DEACTIVATE_INTERVAL: i64 = 60_000_000;

/// How often a catalogue republishes its endpoint bindings.
pub const DEF_PUBLISH_INTERVAL: i64 = 1_000_000;

/// Upper bound on a single catalogue poll sleep.
pub const DEF_IDLE_INTERVAL: i64 = 10_000;

//! # Rhizome Catalogue
//!
//! The catalogue service (`Ecataloguz`) of the clear-TCP Rhizome transport.
//!
//! Peers announce their publisher port with short beacons; the catalogue
//! attributes each beacon to its sender through CURVE session metadata
//! (`User-Id` from the ZAP exchange, `Peer-Address` from the transport),
//! keeps a table of `(peer key, endpoint)` records, ages silent peers out,
//! and periodically republishes the active bindings for subscribing peers
//! to vote on.

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::{HashMap, HashSet};
use tracing::{debug, info, trace};

use rhizome_core::connpoint;
use rhizome_core::consts::{
    CURVE_MECHANISM, DEF_DEACTIVATE_INTERVAL, DEF_IDLE_INTERVAL, DEF_LINGER, DEF_PUBLISH_INTERVAL,
    KEY_Z85_LEN, ROUTING_ID_BEACON, ROUTING_ID_PUBSUB, ZAP_DOMAIN,
};
use rhizome_core::error::Result;
use rhizome_core::keys::{cut_pad_key, derive_publickey};
use rhizome_core::time::time_musec;
use rhizome_core::whitelist;
use rhizome_core::zap::ZapResponder;

pub use rhizome_core::error::RhizomeError;

/// One catalogue record: where a peer's publisher was last seen.
///
/// An empty `connpoint` marks a record with no currently active endpoint;
/// the record itself survives so the comment does too.
#[derive(Debug, Clone, Default)]
pub struct BeaconRec {
    /// `tcp://host:port` of the peer's publisher, or empty when masked.
    pub connpoint: String,
    /// When the last beacon arrived, µs since the Unix epoch. -1: never.
    pub t_last_beacon: i64,
    /// Free-form display-only comment from the beacon whitelist file.
    pub comment: String,
}

/// A catalogue service aggregating beacons and republishing endpoint
/// bindings.
///
/// Driven by repeated [`Ecataloguz::tick`] calls, or by [`Ecataloguz::run`]
/// which loops them behind a cooperative stop flag. Single-threaded; each
/// tick blocks at most `idle_interval` µs inside the beacon poll.
pub struct Ecataloguz {
    publickey: String,
    beacon_whitelist: HashSet<String>,
    pubsub_whitelist: HashSet<String>,
    beacon_recs: HashMap<String, BeaconRec>,
    zap: ZapResponder,
    pullsock: zmq::Socket,
    pubsock: zmq::Socket,
    deactivate_interval: i64,
    publish_interval: i64,
    idle_interval: i64,
    t_last_pub: i64,
}

impl Ecataloguz {
    /// Create a catalogue: derive the public key, bind the ZAP responder,
    /// then bind the beacon puller and the publisher.
    ///
    /// The ZAP responder must exist before either socket becomes a CURVE
    /// server; the construction order here is fixed.
    ///
    /// # Errors
    ///
    /// Fails on an invalid secret key or when a bind is refused.
    pub fn new(secretkey: &str, beacon_port: u16, pubsub_port: u16) -> Result<Self> {
        let ctx = zmq::Context::new();
        let secretkey = cut_pad_key(secretkey);
        let publickey = derive_publickey(&secretkey)?;

        let zap = ZapResponder::bind(&ctx)?;

        let pullsock = ctx.socket(zmq::PULL)?;
        pullsock.set_linger(DEF_LINGER)?;
        pullsock.set_ipv6(true)?;
        pullsock.set_curve_server(true)?;
        pullsock.set_curve_secretkey(secretkey.as_bytes())?;
        pullsock.set_zap_domain(ZAP_DOMAIN)?;
        pullsock.set_identity(ROUTING_ID_BEACON)?;
        pullsock.bind(&format!("tcp://*:{beacon_port}"))?;

        let pubsock = ctx.socket(zmq::PUB)?;
        pubsock.set_linger(DEF_LINGER)?;
        pubsock.set_ipv6(true)?;
        pubsock.set_curve_server(true)?;
        pubsock.set_curve_secretkey(secretkey.as_bytes())?;
        pubsock.set_zap_domain(ZAP_DOMAIN)?;
        pubsock.set_identity(ROUTING_ID_PUBSUB)?;
        pubsock.bind(&format!("tcp://*:{pubsub_port}"))?;

        info!(
            "[ECATAL] {} pulling beacons on {}, publishing on {}",
            publickey, beacon_port, pubsub_port
        );

        Ok(Self {
            publickey,
            beacon_whitelist: HashSet::new(),
            pubsub_whitelist: HashSet::new(),
            beacon_recs: HashMap::new(),
            zap,
            pullsock,
            pubsock,
            deactivate_interval: DEF_DEACTIVATE_INTERVAL,
            publish_interval: DEF_PUBLISH_INTERVAL,
            idle_interval: DEF_IDLE_INTERVAL,
            t_last_pub: -1,
        })
    }

    /// This catalogue's public key (Z85).
    #[must_use]
    pub fn publickey(&self) -> &str {
        &self.publickey
    }

    /// Current records: `(peer key, record)`.
    pub fn beacon_recs(&self) -> impl Iterator<Item = (&str, &BeaconRec)> {
        self.beacon_recs.iter().map(|(k, r)| (k.as_str(), r))
    }

    /// How long a silent peer keeps its endpoint published, in µs.
    /// Negative: forever.
    pub fn set_deactivate_interval(&mut self, interval: i64) {
        self.deactivate_interval = interval;
    }

    /// How often the active bindings are republished, in µs.
    pub fn set_publish_interval(&mut self, interval: i64) {
        self.publish_interval = interval;
    }

    /// Upper bound on one tick's beacon poll, in µs.
    pub fn set_idle_interval(&mut self, interval: i64) {
        self.idle_interval = interval;
    }

    /// Allow `publickeys` to beacon. Empty whitelist: permissive.
    pub fn add_beacon_whitelist_publickeys<'a>(
        &mut self,
        publickeys: impl IntoIterator<Item = &'a str>,
    ) {
        for key in publickeys {
            self.beacon_whitelist.insert(cut_pad_key(key));
        }
    }

    /// Allow `publickeys` to subscribe to the bindings. Empty: permissive.
    pub fn add_pubsub_whitelist_publickeys<'a>(
        &mut self,
        publickeys: impl IntoIterator<Item = &'a str>,
    ) {
        for key in publickeys {
            self.pubsub_whitelist.insert(cut_pad_key(key));
        }
    }

    /// Read the beacon whitelist from a file, one key per line with an
    /// optional comment after column 41.
    ///
    /// Each listed key also seeds a masked record carrying its comment, so
    /// the comment shows up before (and survives after) the peer beacons.
    ///
    /// # Errors
    ///
    /// Propagates IO errors.
    pub fn read_beacon_whitelist_publickeys_with_comments(
        &mut self,
        filepath: impl AsRef<std::path::Path>,
    ) -> Result<()> {
        for (key, comment) in whitelist::read_keys_with_comments(filepath)? {
            let key = cut_pad_key(&key);
            self.beacon_whitelist.insert(key.clone());
            let rec = self.beacon_recs.entry(key).or_insert_with(|| BeaconRec {
                connpoint: String::new(),
                t_last_beacon: -1,
                comment: String::new(),
            });
            rec.comment = comment;
        }
        Ok(())
    }

    /// Read the pub/sub whitelist from a file, one key per line.
    ///
    /// # Errors
    ///
    /// Propagates IO errors.
    pub fn read_pubsub_whitelist_publickeys(
        &mut self,
        filepath: impl AsRef<std::path::Path>,
    ) -> Result<()> {
        for key in whitelist::read_keys(filepath)? {
            self.pubsub_whitelist.insert(cut_pad_key(&key));
        }
        Ok(())
    }

    /// One scheduling step: answer ZAP requests, pull beacons, republish.
    ///
    /// Blocks at most `idle_interval` µs waiting for the first beacon;
    /// everything else drains non-blockingly.
    ///
    /// # Errors
    ///
    /// Propagates transport errors; malformed beacons are dropped.
    pub fn tick(&mut self) -> Result<()> {
        let beacon_whitelist = &self.beacon_whitelist;
        let pubsub_whitelist = &self.pubsub_whitelist;
        self.zap.respond_all(|req| {
            if req.mechanism != CURVE_MECHANISM {
                return false;
            }
            if req.identity == ROUTING_ID_BEACON {
                beacon_whitelist.is_empty() || beacon_whitelist.contains(&req.key_z85)
            } else if req.identity == ROUTING_ID_PUBSUB {
                pubsub_whitelist.is_empty() || pubsub_whitelist.contains(&req.key_z85)
            } else {
                false
            }
        })?;

        // First poll may idle briefly; the rest of the drain must not.
        let mut timeout = self.idle_interval / 1000;
        while self.pullsock.poll(zmq::POLLIN, timeout)? > 0 {
            timeout = 0;
            let mut msg = self.pullsock.recv_msg(0)?;
            self.ingest_beacon(&mut msg);
        }

        let now = time_musec();
        if now - self.t_last_pub > self.publish_interval {
            self.deactivate_stale(now);
            for (key, rec) in &self.beacon_recs {
                if !rec.connpoint.is_empty() {
                    self.pubsock
                        .send_multipart([key.as_bytes(), rec.connpoint.as_bytes()], 0)?;
                }
            }
            self.t_last_pub = now;
        }
        Ok(())
    }

    /// Loop [`Ecataloguz::tick`] until `running` goes false.
    ///
    /// With `dashboard`, a plain-text record table goes to stdout about once
    /// a second.
    ///
    /// # Errors
    ///
    /// Returns the first tick error.
    pub fn run(&mut self, running: &AtomicBool, dashboard: bool) -> Result<()> {
        let mut t_last_draw = -1i64;
        while running.load(Ordering::Relaxed) {
            self.tick()?;
            let now = time_musec();
            if dashboard && now - t_last_draw > 1_000_000 {
                self.draw_dashboard(now);
                t_last_draw = now;
            }
        }
        Ok(())
    }

    /// Attribute and record one beacon message.
    ///
    /// The body must be exactly the 2-byte little-endian publisher port;
    /// sender key and address come from the session metadata. Anything else
    /// is dropped.
    fn ingest_beacon(&mut self, msg: &mut zmq::Message) {
        if msg.len() != 2 {
            trace!("[ECATAL] dropped beacon with {} byte body", msg.len());
            return;
        }
        let port = u16::from_le_bytes([msg[0], msg[1]]);
        let Some(key) = msg.gets("User-Id").map(str::to_owned) else {
            trace!("[ECATAL] dropped beacon without User-Id");
            return;
        };
        if key.len() != KEY_Z85_LEN || !key.is_ascii() {
            trace!("[ECATAL] dropped beacon with malformed key");
            return;
        }
        let Some(address) = msg.gets("Peer-Address").map(str::to_owned) else {
            trace!("[ECATAL] dropped beacon without Peer-Address");
            return;
        };
        let endpoint = connpoint::format(&address, port);
        let now = time_musec();
        debug!("[ECATAL] beacon from {} at {}", key, endpoint);
        let rec = self.beacon_recs.entry(key).or_default();
        rec.connpoint = endpoint;
        rec.t_last_beacon = now;
        // comment, if any, is preserved
    }

    /// Mask records whose peers have been silent past the deactivate
    /// interval. The records stay, so comments survive dormancy.
    fn deactivate_stale(&mut self, now: i64) {
        if self.deactivate_interval < 0 {
            return;
        }
        for (key, rec) in &mut self.beacon_recs {
            if !rec.connpoint.is_empty() && now - rec.t_last_beacon > self.deactivate_interval {
                debug!("[ECATAL] {} went silent, masking endpoint", key);
                rec.connpoint.clear();
            }
        }
    }

    fn draw_dashboard(&self, now: i64) {
        let mut keys: Vec<&str> = self.beacon_recs.keys().map(String::as_str).collect();
        keys.sort_unstable();
        let active = self
            .beacon_recs
            .values()
            .filter(|r| !r.connpoint.is_empty())
            .count();
        println!(
            "-- ecataloguz {} -- {} records, {} active --",
            self.publickey,
            keys.len(),
            active
        );
        for key in keys {
            let rec = &self.beacon_recs[key];
            let age = if rec.t_last_beacon >= 0 {
                format!("{:.1}s", (now - rec.t_last_beacon) as f64 / 1e6)
            } else {
                "never".to_owned()
            };
            let endpoint = if rec.connpoint.is_empty() {
                "-"
            } else {
                rec.connpoint.as_str()
            };
            println!("{key}  {endpoint:<28}  {age:>8}  {}", rec.comment);
        }
    }
}

//! The local peer: one CURVE publisher, a ZAP authentication gate, the set
//! of ehyphae, and (on clear TCP) the beacon/catalogue rendezvous plumbing.

use bytes::Bytes;
use hashbrown::hash_map::Entry;
use hashbrown::{HashMap, HashSet};
use rand::RngCore;
use tracing::{debug, trace};

use rhizome_core::connpoint;
use rhizome_core::consts::{
    CURVE_MECHANISM, DEF_BEACON_INTERVAL, DEF_ECATAL_FORGET_INTERVAL, DEF_LINGER,
    DEF_SOCKS_PROXY_HOST, DEF_SOCKS_PROXY_PORT, KEY_Z85_LEN, ROUTING_ID_PUBSUB, ZAP_DOMAIN,
    ZAP_SESSION_ID_LEN,
};
use rhizome_core::error::{Result, RhizomeError};
use rhizome_core::keys::{cut_pad_key, derive_publickey};
use rhizome_core::status::Status;
use rhizome_core::time::time_musec;
use rhizome_core::whitelist;
use rhizome_core::zap::ZapResponder;

use crate::ehypha::Ehypha;
use crate::etale::title_topic;

/// Transport policy of an [`Efunguz`].
#[derive(Debug, Clone)]
pub enum Transport {
    /// Clear TCP. Remote endpoints may be set directly or discovered through
    /// catalogue services by beacon rendezvous.
    Tcp,
    /// TCP tunneled through a SOCKS proxy to onion services. Endpoints come
    /// from configuration; catalogues are unavailable.
    Tor {
        /// SOCKS proxy host, normally a local Tor daemon.
        proxy_host: String,
        /// SOCKS proxy port.
        proxy_port: u16,
    },
}

impl Transport {
    /// The onion transport with the stock local Tor proxy (127.0.0.1:9050).
    #[must_use]
    pub fn tor_default() -> Self {
        Self::Tor {
            proxy_host: DEF_SOCKS_PROXY_HOST.to_owned(),
            proxy_port: DEF_SOCKS_PROXY_PORT,
        }
    }
}

// Rendezvous state, one variant per transport.
enum Rendezvous {
    Catalogue {
        // catalogue key -> SUB socket on the catalogue's publisher
        from: HashMap<String, zmq::Socket>,
        // catalogue key -> PUSH socket on the catalogue's beacon puller
        to: HashMap<String, zmq::Socket>,
        beacon_interval: i64,
        t_last_beacon: i64,
    },
    Socks {
        proxy: String,
    },
}

/// A local peer: one publisher, many ehyphae, an authenticator, and
/// optional catalogue links.
///
/// Driven by repeated [`Efunguz::update`] calls from the embedder's loop;
/// no threads are spawned and nothing blocks beyond what the transport has
/// queued. Owns every socket it creates, including those of its ehyphae,
/// and tears the transport context down last.
pub struct Efunguz {
    ctx: zmq::Context,
    secretkey: String,
    publickey: String,
    whitelist_publickeys: HashSet<String>,
    pubsub_port: u16,
    ehyphae: HashMap<String, Ehypha>,
    zap: ZapResponder,
    zap_identity: Vec<u8>,
    pubsock: zmq::Socket,
    rendezvous: Rendezvous,
    ecatal_forget_interval: i64,
}

impl Efunguz {
    /// Create a peer: derive the public key, bind the ZAP responder, then
    /// bind the CURVE publisher on `pubsub_port`.
    ///
    /// The ZAP responder must exist before the publisher becomes a CURVE
    /// server, otherwise early subscriber handshakes race the authenticator;
    /// the construction order here is fixed.
    ///
    /// # Errors
    ///
    /// Fails on an invalid secret key or when a bind is refused.
    pub fn new(secretkey: &str, pubsub_port: u16, transport: Transport) -> Result<Self> {
        let ctx = zmq::Context::new();
        let secretkey = cut_pad_key(secretkey);
        let publickey = derive_publickey(&secretkey)?;

        let zap = ZapResponder::bind(&ctx)?;

        let (zap_identity, rendezvous) = match transport {
            Transport::Tcp => (
                ROUTING_ID_PUBSUB.to_vec(),
                Rendezvous::Catalogue {
                    from: HashMap::new(),
                    to: HashMap::new(),
                    beacon_interval: DEF_BEACON_INTERVAL,
                    t_last_beacon: -1,
                },
            ),
            Transport::Tor {
                proxy_host,
                proxy_port,
            } => {
                // A random per-instance identity keeps other in-process
                // publishers from passing authentication through our
                // responder.
                let mut id = vec![0u8; ZAP_SESSION_ID_LEN];
                rand::rngs::OsRng.fill_bytes(&mut id);
                (
                    id,
                    Rendezvous::Socks {
                        proxy: format!("{proxy_host}:{proxy_port}"),
                    },
                )
            }
        };

        let pubsock = ctx.socket(zmq::PUB)?;
        pubsock.set_linger(DEF_LINGER)?;
        pubsock.set_ipv6(true)?;
        pubsock.set_curve_server(true)?;
        pubsock.set_curve_secretkey(secretkey.as_bytes())?;
        // Auth only engages with a non-empty domain (RFC 27).
        pubsock.set_zap_domain(ZAP_DOMAIN)?;
        pubsock.set_identity(&zap_identity)?;
        pubsock.bind(&format!("tcp://*:{pubsub_port}"))?;
        debug!("[EFUNGUZ] {} publishing on port {}", publickey, pubsub_port);

        Ok(Self {
            ctx,
            secretkey,
            publickey,
            whitelist_publickeys: HashSet::new(),
            pubsub_port,
            ehyphae: HashMap::new(),
            zap,
            zap_identity,
            pubsock,
            rendezvous,
            ecatal_forget_interval: DEF_ECATAL_FORGET_INTERVAL,
        })
    }

    /// This peer's public key (Z85).
    #[must_use]
    pub fn publickey(&self) -> &str {
        &self.publickey
    }

    /// Port the publisher is bound on.
    #[must_use]
    pub fn pubsub_port(&self) -> u16 {
        self.pubsub_port
    }

    /// How often beacons go out, in µs. No effect on the onion transport.
    pub fn set_beacon_interval(&mut self, interval: i64) {
        if let Rendezvous::Catalogue {
            beacon_interval, ..
        } = &mut self.rendezvous
        {
            *beacon_interval = interval;
        }
    }

    /// Vote lifetime applied to ehyphae created after this call, in µs.
    pub fn set_ecatal_forget_interval(&mut self, interval: i64) {
        self.ecatal_forget_interval = interval;
    }

    /// Allow `publickeys` to subscribe. While the whitelist is empty, any
    /// valid CURVE client is admitted.
    pub fn add_whitelist_publickeys<'a>(&mut self, publickeys: impl IntoIterator<Item = &'a str>) {
        for key in publickeys {
            self.whitelist_publickeys.insert(cut_pad_key(key));
        }
    }

    /// Withdraw subscription permission from `publickeys`.
    pub fn del_whitelist_publickeys<'a>(&mut self, publickeys: impl IntoIterator<Item = &'a str>) {
        for key in publickeys {
            self.whitelist_publickeys.remove(&cut_pad_key(key));
        }
    }

    /// Empty the whitelist, returning to permissive admission.
    pub fn clear_whitelist_publickeys(&mut self) {
        self.whitelist_publickeys.clear();
    }

    /// Add every key listed in the file at `filepath` to the whitelist.
    ///
    /// # Errors
    ///
    /// Propagates IO errors.
    pub fn read_whitelist_publickeys(&mut self, filepath: impl AsRef<std::path::Path>) -> Result<()> {
        for key in whitelist::read_keys(filepath)? {
            self.whitelist_publickeys.insert(cut_pad_key(&key));
        }
        Ok(())
    }

    /// Grow an ehypha towards the peer with `that_publickey`, with no
    /// endpoint yet. On clear TCP the endpoint arrives by catalogue
    /// rendezvous; otherwise set it through [`Ehypha::set_connpoint`].
    ///
    /// Returns the existing ehypha with [`Status::AlreadyPresent`] when one
    /// is already grown towards that key.
    ///
    /// # Errors
    ///
    /// Fails on socket creation or subscription calls.
    pub fn add_ehypha(&mut self, that_publickey: &str) -> Result<(&mut Ehypha, Status)> {
        let serverkey = cut_pad_key(that_publickey);
        let socks_proxy = match &self.rendezvous {
            Rendezvous::Catalogue { .. } => None,
            Rendezvous::Socks { proxy } => Some(proxy.as_str()),
        };
        match self.ehyphae.entry(serverkey) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), Status::AlreadyPresent)),
            Entry::Vacant(entry) => {
                let hypha = Ehypha::new(
                    &self.ctx,
                    &self.secretkey,
                    &self.publickey,
                    entry.key().clone(),
                    socks_proxy,
                    self.ecatal_forget_interval,
                )?;
                if let Rendezvous::Catalogue { from, .. } = &self.rendezvous {
                    for subsock in from.values() {
                        subsock.set_subscribe(entry.key().as_bytes())?;
                    }
                }
                debug!("[EFUNGUZ] ehypha grown towards {}", entry.key());
                Ok((entry.insert(hypha), Status::Ok))
            }
        }
    }

    /// [`Efunguz::add_ehypha`] plus an immediate endpoint: `host` is an IP
    /// or hostname on clear TCP, an `….onion` address on the onion
    /// transport.
    ///
    /// # Errors
    ///
    /// Fails on socket creation, subscription, or connect calls.
    pub fn add_ehypha_at(
        &mut self,
        that_publickey: &str,
        host: &str,
        port: u16,
    ) -> Result<(&mut Ehypha, Status)> {
        let (hypha, status) = self.add_ehypha(that_publickey)?;
        if status.took_effect() {
            hypha.set_connpoint(&connpoint::format(host, port))?;
        }
        Ok((hypha, status))
    }

    /// Look up the ehypha grown towards `publickey`.
    #[must_use]
    pub fn get_ehypha(&mut self, publickey: &str) -> (Option<&mut Ehypha>, Status) {
        match self.ehyphae.get_mut(&cut_pad_key(publickey)) {
            Some(hypha) => (Some(hypha), Status::Ok),
            None => (None, Status::Absent),
        }
    }

    /// Sever the ehypha grown towards `that_publickey`, closing its socket.
    ///
    /// # Errors
    ///
    /// Fails on catalogue unsubscription calls.
    pub fn del_ehypha(&mut self, that_publickey: &str) -> Result<Status> {
        let serverkey = cut_pad_key(that_publickey);
        if self.ehyphae.remove(&serverkey).is_none() {
            return Ok(Status::AlreadyAbsent);
        }
        if let Rendezvous::Catalogue { from, .. } = &self.rendezvous {
            for subsock in from.values() {
                subsock.set_unsubscribe(serverkey.as_bytes())?;
            }
        }
        debug!("[EFUNGUZ] ehypha towards {} severed", serverkey);
        Ok(Status::Ok)
    }

    /// Subscribe to the endpoint bindings a catalogue publishes at
    /// `endpoint`, filtered to the keys of current and future ehyphae.
    ///
    /// # Errors
    ///
    /// [`RhizomeError::NoCatalogues`] on the onion transport; otherwise
    /// endpoint validation and transport errors.
    pub fn add_ecatal_from(&mut self, that_publickey: &str, endpoint: &str) -> Result<Status> {
        connpoint::validate(endpoint)?;
        let key = cut_pad_key(that_publickey);
        let Rendezvous::Catalogue { from, .. } = &mut self.rendezvous else {
            return Err(RhizomeError::NoCatalogues);
        };
        if from.contains_key(&key) {
            return Ok(Status::AlreadyPresent);
        }
        let subsock = self.ctx.socket(zmq::SUB)?;
        subsock.set_linger(DEF_LINGER)?;
        subsock.set_ipv6(true)?;
        subsock.set_curve_secretkey(self.secretkey.as_bytes())?;
        subsock.set_curve_publickey(self.publickey.as_bytes())?;
        subsock.set_curve_serverkey(key.as_bytes())?;
        for serverkey in self.ehyphae.keys() {
            subsock.set_subscribe(serverkey.as_bytes())?;
        }
        subsock.connect(endpoint)?;
        debug!("[EFUNGUZ] listening to catalogue {} at {}", key, endpoint);
        from.insert(key, subsock);
        Ok(Status::Ok)
    }

    /// Stop listening to a catalogue's endpoint bindings.
    ///
    /// # Errors
    ///
    /// [`RhizomeError::NoCatalogues`] on the onion transport.
    pub fn del_ecatal_from(&mut self, that_publickey: &str) -> Result<Status> {
        let key = cut_pad_key(that_publickey);
        let Rendezvous::Catalogue { from, .. } = &mut self.rendezvous else {
            return Err(RhizomeError::NoCatalogues);
        };
        Ok(match from.remove(&key) {
            Some(_) => Status::Ok,
            None => Status::AlreadyAbsent,
        })
    }

    /// Aim beacons at the catalogue pulling at `endpoint`. The push socket
    /// conflates, so at most the latest beacon is ever buffered.
    ///
    /// # Errors
    ///
    /// [`RhizomeError::NoCatalogues`] on the onion transport; otherwise
    /// endpoint validation and transport errors.
    pub fn add_ecatal_to(&mut self, that_publickey: &str, endpoint: &str) -> Result<Status> {
        connpoint::validate(endpoint)?;
        let key = cut_pad_key(that_publickey);
        let Rendezvous::Catalogue { to, .. } = &mut self.rendezvous else {
            return Err(RhizomeError::NoCatalogues);
        };
        if to.contains_key(&key) {
            return Ok(Status::AlreadyPresent);
        }
        let pushsock = self.ctx.socket(zmq::PUSH)?;
        pushsock.set_linger(DEF_LINGER)?;
        pushsock.set_ipv6(true)?;
        pushsock.set_conflate(true)?;
        pushsock.set_curve_secretkey(self.secretkey.as_bytes())?;
        pushsock.set_curve_publickey(self.publickey.as_bytes())?;
        pushsock.set_curve_serverkey(key.as_bytes())?;
        pushsock.connect(endpoint)?;
        debug!("[EFUNGUZ] beaconing to catalogue {} at {}", key, endpoint);
        to.insert(key, pushsock);
        Ok(Status::Ok)
    }

    /// Stop beaconing to a catalogue.
    ///
    /// # Errors
    ///
    /// [`RhizomeError::NoCatalogues`] on the onion transport.
    pub fn del_ecatal_to(&mut self, that_publickey: &str) -> Result<Status> {
        let key = cut_pad_key(that_publickey);
        let Rendezvous::Catalogue { to, .. } = &mut self.rendezvous else {
            return Err(RhizomeError::NoCatalogues);
        };
        Ok(match to.remove(&key) {
            Some(_) => Status::Ok,
            None => Status::AlreadyAbsent,
        })
    }

    /// Publish `parts` under `title`: topic frame, 8-byte little-endian µs
    /// timestamp, then the parts.
    ///
    /// # Errors
    ///
    /// Fails on the transport send call.
    pub fn emit_etale(&self, title: &str, parts: &[Bytes]) -> Result<()> {
        let topic = title_topic(title);
        let t_out = time_musec().to_le_bytes();
        let mut frames: Vec<&[u8]> = Vec::with_capacity(2 + parts.len());
        frames.push(&topic);
        frames.push(&t_out);
        frames.extend(parts.iter().map(|part| part.as_ref()));
        self.pubsock.send_multipart(frames, 0)?;
        trace!("[EFUNGUZ] emitted {:?} ({} parts)", title, parts.len());
        Ok(())
    }

    /// Announce the publisher port to every catalogue now.
    ///
    /// # Errors
    ///
    /// [`RhizomeError::NoCatalogues`] on the onion transport; transport
    /// errors otherwise. A full conflating queue is not an error.
    pub fn emit_beacon(&self) -> Result<()> {
        let Rendezvous::Catalogue { to, .. } = &self.rendezvous else {
            return Err(RhizomeError::NoCatalogues);
        };
        Self::push_beacons(to, self.pubsub_port)
    }

    fn push_beacons(to: &HashMap<String, zmq::Socket>, port: u16) -> Result<()> {
        let body = port.to_le_bytes();
        for pushsock in to.values() {
            match pushsock.send(&body[..], zmq::DONTWAIT) {
                Ok(()) | Err(zmq::Error::EAGAIN) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// One scheduling step:
    /// 1. answer queued ZAP requests,
    /// 2. beacon the catalogues when the interval elapsed (clear TCP),
    /// 3. ingest catalogue endpoint bindings into the ehyphae's vote tables
    ///    (clear TCP),
    /// 4. update every ehypha.
    ///
    /// Never blocks beyond what the sockets had queued at entry.
    ///
    /// # Errors
    ///
    /// Propagates transport errors; malformed inbound messages are dropped.
    pub fn update(&mut self) -> Result<()> {
        let now = time_musec();

        let whitelist = &self.whitelist_publickeys;
        let identity = &self.zap_identity;
        self.zap.respond_all(|req| {
            req.identity == *identity
                && req.mechanism == CURVE_MECHANISM
                && (whitelist.is_empty() || whitelist.contains(&req.key_z85))
        })?;

        if let Rendezvous::Catalogue {
            from,
            to,
            beacon_interval,
            t_last_beacon,
        } = &mut self.rendezvous
        {
            if now - *t_last_beacon >= *beacon_interval {
                Self::push_beacons(to, self.pubsub_port)?;
                *t_last_beacon = now;
            }

            for (catal_key, subsock) in from.iter() {
                while subsock.poll(zmq::POLLIN, 0)? > 0 {
                    let frames = subsock.recv_multipart(0)?;
                    if frames.len() != 2 {
                        trace!("[EFUNGUZ] dropped binding with {} frames", frames.len());
                        continue;
                    }
                    let Ok(key) = std::str::from_utf8(&frames[0]) else {
                        continue;
                    };
                    let Ok(endpoint) = std::str::from_utf8(&frames[1]) else {
                        continue;
                    };
                    if key.len() != KEY_Z85_LEN
                        || !key.is_ascii()
                        || !endpoint.is_ascii()
                        || connpoint::validate(endpoint).is_err()
                    {
                        trace!("[EFUNGUZ] dropped malformed binding from {}", catal_key);
                        continue;
                    }
                    if let Some(hypha) = self.ehyphae.get_mut(key) {
                        hypha
                            .connpoints_via_ecatals
                            .insert(catal_key.clone(), (endpoint.to_owned(), now));
                    }
                }
            }
        }

        for hypha in self.ehyphae.values_mut() {
            hypha.update()?;
        }
        Ok(())
    }
}

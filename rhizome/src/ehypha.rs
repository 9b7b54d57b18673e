//! One remote-peer subscription: a CURVE subscriber socket, the set of
//! subscribed titles, message demultiplexing, and endpoint voting.

use bytes::Bytes;
use hashbrown::HashMap;
use tracing::{debug, trace};

use rhizome_core::connpoint;
use rhizome_core::consts::DEF_LINGER;
use rhizome_core::error::Result;
use rhizome_core::status::Status;
use rhizome_core::time::time_musec;

use crate::etale::{title_topic, Etale};

/// The local object representing a single remote peer subscription.
///
/// Owns exactly one SUB socket, configured as a CURVE client against the
/// remote peer's public key. Created and destroyed only by its
/// [`crate::Efunguz`]; never shared, never transferred.
pub struct Ehypha {
    subsock: zmq::Socket,
    serverkey: String,
    etales: HashMap<String, Etale>,
    connpoint: Option<String>,
    // true while the current connpoint is attested by catalogue votes
    // rather than set by the embedder
    from_ecatals: bool,
    pub(crate) connpoints_via_ecatals: HashMap<String, (String, i64)>,
    ecatal_forget_interval: i64,
}

impl Ehypha {
    pub(crate) fn new(
        ctx: &zmq::Context,
        secretkey: &str,
        publickey: &str,
        serverkey: String,
        socks_proxy: Option<&str>,
        ecatal_forget_interval: i64,
    ) -> Result<Self> {
        let subsock = ctx.socket(zmq::SUB)?;
        subsock.set_linger(DEF_LINGER)?;
        subsock.set_ipv6(true)?;
        subsock.set_curve_secretkey(secretkey.as_bytes())?;
        subsock.set_curve_publickey(publickey.as_bytes())?;
        subsock.set_curve_serverkey(serverkey.as_bytes())?;
        if let Some(proxy) = socks_proxy {
            subsock.set_socks_proxy(Some(proxy))?;
        }
        debug!("[EHYPHA] subscriber ready for {}", serverkey);
        Ok(Self {
            subsock,
            serverkey,
            etales: HashMap::new(),
            connpoint: None,
            from_ecatals: false,
            connpoints_via_ecatals: HashMap::new(),
            ecatal_forget_interval,
        })
    }

    /// Public key of the remote peer this ehypha subscribes to.
    #[must_use]
    pub fn serverkey(&self) -> &str {
        &self.serverkey
    }

    /// Current transport endpoint, if any.
    #[must_use]
    pub fn connpoint(&self) -> Option<&str> {
        self.connpoint.as_deref()
    }

    /// Endpoints currently reported per catalogue: `(catalogue key, endpoint)`.
    pub fn connpoints_via_ecatals(&self) -> impl Iterator<Item = (&str, &str)> {
        self.connpoints_via_ecatals
            .iter()
            .map(|(catal, (cp, _))| (catal.as_str(), cp.as_str()))
    }

    /// How long a catalogue report keeps its vote, in µs. Negative: forever.
    pub fn set_ecatal_forget_interval(&mut self, interval: i64) {
        self.ecatal_forget_interval = interval;
    }

    /// Set the endpoint directly, as the embedder's own decision.
    ///
    /// Disconnects the previous endpoint (if different) and connects the new
    /// one. An endpoint set this way is never cleared by catalogue voting.
    ///
    /// # Errors
    ///
    /// Fails on endpoint validation or on the transport calls.
    pub fn set_connpoint(&mut self, connpoint: &str) -> Result<()> {
        connpoint::validate(connpoint)?;
        self.from_ecatals = false;
        self.reconnect(connpoint)
    }

    /// Disconnect and forget the current endpoint.
    ///
    /// # Errors
    ///
    /// Fails on the transport disconnect call.
    pub fn clear_connpoint(&mut self) -> Result<()> {
        self.from_ecatals = false;
        self.drop_connpoint()
    }

    /// Start receiving updates for `title`.
    ///
    /// Subscribes the underlying socket to the title's topic. Returns the
    /// existing record with [`Status::AlreadyPresent`] when already added.
    ///
    /// # Errors
    ///
    /// Fails on the transport subscribe call.
    pub fn add_etale(&mut self, title: &str) -> Result<(&Etale, Status)> {
        if self.etales.contains_key(title) {
            return Ok((&self.etales[title], Status::AlreadyPresent));
        }
        self.subsock.set_subscribe(&title_topic(title))?;
        trace!("[EHYPHA] {} subscribed to {:?}", self.serverkey, title);
        let etale = self.etales.entry(title.to_owned()).or_insert_with(Etale::new);
        Ok((&*etale, Status::Ok))
    }

    /// Look up the record for `title`.
    #[must_use]
    pub fn get_etale(&self, title: &str) -> (Option<&Etale>, Status) {
        match self.etales.get(title) {
            Some(etale) => (Some(etale), Status::Ok),
            None => (None, Status::Absent),
        }
    }

    /// Stop receiving updates for `title` and drop its record.
    ///
    /// # Errors
    ///
    /// Fails on the transport unsubscribe call.
    pub fn del_etale(&mut self, title: &str) -> Result<Status> {
        match self.etales.remove(title) {
            Some(etale) => {
                // a paused etale has no active topic filter to remove
                if !etale.paused {
                    self.subsock.set_unsubscribe(&title_topic(title))?;
                }
                trace!("[EHYPHA] {} unsubscribed from {:?}", self.serverkey, title);
                Ok(Status::Ok)
            }
            None => Ok(Status::AlreadyAbsent),
        }
    }

    /// Keep the record but ignore further updates for `title`.
    ///
    /// Removes the topic filter, so paused titles cost no bandwidth.
    ///
    /// # Errors
    ///
    /// Fails on the transport unsubscribe call.
    pub fn pause_etale(&mut self, title: &str) -> Result<Status> {
        match self.etales.get_mut(title) {
            Some(etale) if etale.paused => Ok(Status::AlreadyPaused),
            Some(etale) => {
                self.subsock.set_unsubscribe(&title_topic(title))?;
                etale.paused = true;
                Ok(Status::Ok)
            }
            None => Ok(Status::Absent),
        }
    }

    /// Resume updates for a paused `title`.
    ///
    /// # Errors
    ///
    /// Fails on the transport subscribe call.
    pub fn resume_etale(&mut self, title: &str) -> Result<Status> {
        match self.etales.get_mut(title) {
            Some(etale) if !etale.paused => Ok(Status::AlreadyResumed),
            Some(etale) => {
                self.subsock.set_subscribe(&title_topic(title))?;
                etale.paused = false;
                Ok(Status::Ok)
            }
            None => Ok(Status::Absent),
        }
    }

    /// Pause every etale of this ehypha.
    ///
    /// # Errors
    ///
    /// Fails on the first failing transport call.
    pub fn pause_etales(&mut self) -> Result<()> {
        for (title, etale) in &mut self.etales {
            if !etale.paused {
                self.subsock.set_unsubscribe(&title_topic(title))?;
                etale.paused = true;
            }
        }
        Ok(())
    }

    /// Resume every etale of this ehypha.
    ///
    /// # Errors
    ///
    /// Fails on the first failing transport call.
    pub fn resume_etales(&mut self) -> Result<()> {
        for (title, etale) in &mut self.etales {
            if etale.paused {
                self.subsock.set_subscribe(&title_topic(title))?;
                etale.paused = false;
            }
        }
        Ok(())
    }

    /// One scheduling step: refresh the endpoint from catalogue votes, then
    /// drain and demultiplex whatever the subscriber socket has queued.
    pub(crate) fn update(&mut self) -> Result<()> {
        let now = time_musec();
        self.revote_connpoint(now)?;
        while self.subsock.poll(zmq::POLLIN, 0)? > 0 {
            let frames = self.subsock.recv_multipart(0)?;
            self.ingest(now, frames);
        }
        Ok(())
    }

    /// Recompute the majority endpoint over non-stale catalogue reports.
    ///
    /// Stale reports are forgotten first. The winner is the endpoint with
    /// the most votes; ties go to the lexicographically smallest endpoint,
    /// so the choice is stable across ticks with no new input. When the
    /// vote table empties and the current endpoint was itself
    /// catalogue-attested, it is dropped.
    fn revote_connpoint(&mut self, now: i64) -> Result<()> {
        if self.ecatal_forget_interval >= 0 {
            let ttl = self.ecatal_forget_interval;
            self.connpoints_via_ecatals
                .retain(|_, (_, t_upd)| now - *t_upd <= ttl);
        }
        let winner = {
            let mut votes: HashMap<&str, u32> = HashMap::new();
            for (cp, _) in self.connpoints_via_ecatals.values() {
                *votes.entry(cp.as_str()).or_insert(0) += 1;
            }
            votes
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(cp, _)| (*cp).to_owned())
        };
        match winner {
            Some(cp) => {
                self.from_ecatals = true;
                self.reconnect(&cp)
            }
            None if self.from_ecatals => {
                self.from_ecatals = false;
                self.drop_connpoint()
            }
            None => Ok(()),
        }
    }

    // Sole mutators of `connpoint`.

    fn reconnect(&mut self, connpoint: &str) -> Result<()> {
        if self.connpoint.as_deref() == Some(connpoint) {
            return Ok(());
        }
        if let Some(old) = self.connpoint.take() {
            self.subsock.disconnect(&old)?;
        }
        self.subsock.connect(connpoint)?;
        debug!("[EHYPHA] {} -> {}", self.serverkey, connpoint);
        self.connpoint = Some(connpoint.to_owned());
        Ok(())
    }

    fn drop_connpoint(&mut self) -> Result<()> {
        if let Some(old) = self.connpoint.take() {
            self.subsock.disconnect(&old)?;
            debug!("[EHYPHA] {} -> (no connpoint)", self.serverkey);
        }
        Ok(())
    }

    /// Demultiplex one received message into its etale.
    ///
    /// Frame 0 is the topic `title ++ 0x00`, frame 1 the publisher's 8-byte
    /// little-endian µs timestamp, frames 2.. the payload parts. Anything
    /// malformed is dropped without touching cached state.
    fn ingest(&mut self, now: i64, mut frames: Vec<Vec<u8>>) {
        if frames.len() < 2 {
            trace!("[EHYPHA] dropped message with {} frames", frames.len());
            return;
        }
        let topic = &frames[0];
        if topic.is_empty() {
            trace!("[EHYPHA] dropped message with empty topic");
            return;
        }
        let Ok(title) = std::str::from_utf8(&topic[..topic.len() - 1]) else {
            trace!("[EHYPHA] dropped message with non-UTF-8 topic");
            return;
        };
        let Some(etale) = self.etales.get_mut(title) else {
            trace!("[EHYPHA] dropped message for unknown title {:?}", title);
            return;
        };
        if etale.paused {
            return;
        }
        let Ok(t_out) = <[u8; 8]>::try_from(frames[1].as_slice()) else {
            trace!("[EHYPHA] dropped message with bad timestamp length");
            return;
        };
        etale.parts = frames.drain(2..).map(Bytes::from).collect();
        etale.t_out = u64::from_le_bytes(t_out) as i64;
        etale.t_in = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhizome_core::consts::DEF_ECATAL_FORGET_INTERVAL;
    use rhizome_core::keys::generate_keypair;

    fn test_hypha() -> Ehypha {
        let ctx = zmq::Context::new();
        let (publickey, secretkey) = generate_keypair().unwrap();
        let (serverkey, _) = generate_keypair().unwrap();
        Ehypha::new(
            &ctx,
            &secretkey,
            &publickey,
            serverkey,
            None,
            DEF_ECATAL_FORGET_INTERVAL,
        )
        .unwrap()
    }

    fn vote(hypha: &mut Ehypha, catal: &str, cp: &str, t: i64) {
        hypha
            .connpoints_via_ecatals
            .insert(catal.to_owned(), (cp.to_owned(), t));
    }

    #[test]
    fn test_etale_add_get_del_statuses() {
        let mut hypha = test_hypha();
        let (_, status) = hypha.add_etale("zone").unwrap();
        assert_eq!(status, Status::Ok);
        let (_, status) = hypha.add_etale("zone").unwrap();
        assert_eq!(status, Status::AlreadyPresent);
        assert_eq!(hypha.get_etale("zone").1, Status::Ok);
        assert_eq!(hypha.get_etale("nope").1, Status::Absent);
        assert_eq!(hypha.del_etale("zone").unwrap(), Status::Ok);
        assert_eq!(hypha.del_etale("zone").unwrap(), Status::AlreadyAbsent);
    }

    #[test]
    fn test_pause_resume_statuses() {
        let mut hypha = test_hypha();
        hypha.add_etale("zone").unwrap();
        assert_eq!(hypha.pause_etale("zone").unwrap(), Status::Ok);
        assert_eq!(hypha.pause_etale("zone").unwrap(), Status::AlreadyPaused);
        assert_eq!(hypha.resume_etale("zone").unwrap(), Status::Ok);
        assert_eq!(hypha.resume_etale("zone").unwrap(), Status::AlreadyResumed);
        assert_eq!(hypha.pause_etale("nope").unwrap(), Status::Absent);
        assert_eq!(hypha.resume_etale("nope").unwrap(), Status::Absent);
    }

    #[test]
    fn test_unanimous_vote_connects() {
        let mut hypha = test_hypha();
        let now = time_musec();
        vote(&mut hypha, "catal-1", "tcp://10.0.0.1:60847", now);
        vote(&mut hypha, "catal-2", "tcp://10.0.0.1:60847", now);
        hypha.revote_connpoint(now).unwrap();
        assert_eq!(hypha.connpoint(), Some("tcp://10.0.0.1:60847"));
    }

    #[test]
    fn test_majority_beats_minority() {
        let mut hypha = test_hypha();
        let now = time_musec();
        vote(&mut hypha, "catal-1", "tcp://10.0.0.1:60847", now);
        vote(&mut hypha, "catal-2", "tcp://10.0.0.2:60847", now);
        vote(&mut hypha, "catal-3", "tcp://10.0.0.2:60847", now);
        hypha.revote_connpoint(now).unwrap();
        assert_eq!(hypha.connpoint(), Some("tcp://10.0.0.2:60847"));
    }

    #[test]
    fn test_tie_breaks_lexicographically_and_stays_stable() {
        let mut hypha = test_hypha();
        let now = time_musec();
        vote(&mut hypha, "catal-1", "tcp://10.0.0.2:60847", now);
        vote(&mut hypha, "catal-2", "tcp://10.0.0.1:60847", now);
        hypha.revote_connpoint(now).unwrap();
        assert_eq!(hypha.connpoint(), Some("tcp://10.0.0.1:60847"));
        // No new input: repeated revotes must not flap.
        for _ in 0..10 {
            hypha.revote_connpoint(now + 1).unwrap();
            assert_eq!(hypha.connpoint(), Some("tcp://10.0.0.1:60847"));
        }
    }

    #[test]
    fn test_stale_votes_are_forgotten() {
        let mut hypha = test_hypha();
        hypha.set_ecatal_forget_interval(1_000_000);
        let now = time_musec();
        vote(&mut hypha, "catal-1", "tcp://10.0.0.1:60847", now - 2_000_000);
        vote(&mut hypha, "catal-2", "tcp://10.0.0.2:60847", now);
        vote(&mut hypha, "catal-3", "tcp://10.0.0.1:60847", now - 2_000_000);
        hypha.revote_connpoint(now).unwrap();
        assert_eq!(hypha.connpoint(), Some("tcp://10.0.0.2:60847"));
        assert_eq!(hypha.connpoints_via_ecatals().count(), 1);
    }

    #[test]
    fn test_catalogue_endpoint_dropped_when_votes_age_out() {
        let mut hypha = test_hypha();
        hypha.set_ecatal_forget_interval(1_000_000);
        let now = time_musec();
        vote(&mut hypha, "catal-1", "tcp://10.0.0.1:60847", now);
        hypha.revote_connpoint(now).unwrap();
        assert!(hypha.connpoint().is_some());
        hypha.revote_connpoint(now + 2_000_000).unwrap();
        assert_eq!(hypha.connpoint(), None);
        assert_eq!(hypha.connpoints_via_ecatals().count(), 0);
    }

    #[test]
    fn test_user_endpoint_survives_empty_vote_table() {
        let mut hypha = test_hypha();
        hypha.set_ecatal_forget_interval(1_000_000);
        hypha.set_connpoint("tcp://127.0.0.1:60901").unwrap();
        let now = time_musec();
        hypha.revote_connpoint(now).unwrap();
        assert_eq!(hypha.connpoint(), Some("tcp://127.0.0.1:60901"));
    }

    #[test]
    fn test_negative_forget_interval_keeps_votes() {
        let mut hypha = test_hypha();
        hypha.set_ecatal_forget_interval(-1);
        let now = time_musec();
        vote(&mut hypha, "catal-1", "tcp://10.0.0.1:60847", now - 100_000_000);
        hypha.revote_connpoint(now).unwrap();
        assert_eq!(hypha.connpoint(), Some("tcp://10.0.0.1:60847"));
    }

    #[test]
    fn test_ingest_rejects_malformed_frames() {
        let mut hypha = test_hypha();
        hypha.add_etale("zone").unwrap();
        let now = time_musec();

        // Too few frames.
        hypha.ingest(now, vec![b"zone\0".to_vec()]);
        // Empty topic.
        hypha.ingest(now, vec![Vec::new(), 7i64.to_le_bytes().to_vec()]);
        // Non-UTF-8 topic.
        hypha.ingest(now, vec![vec![0xFF, 0xFE, 0x00], 7i64.to_le_bytes().to_vec()]);
        // Unknown title.
        hypha.ingest(now, vec![b"other\0".to_vec(), 7i64.to_le_bytes().to_vec()]);
        // Bad timestamp length.
        hypha.ingest(now, vec![b"zone\0".to_vec(), vec![1, 2, 3]]);

        let (etale, _) = hypha.get_etale("zone");
        let etale = etale.unwrap();
        assert_eq!(etale.t_in(), -1);
        assert_eq!(etale.t_out(), -1);
        assert!(etale.parts().is_empty());
    }

    #[test]
    fn test_ingest_updates_etale_and_pause_blocks_it() {
        let mut hypha = test_hypha();
        hypha.add_etale("zone").unwrap();
        let now = time_musec();

        hypha.ingest(
            now,
            vec![b"zone\0".to_vec(), 42i64.to_le_bytes().to_vec(), b"one".to_vec()],
        );
        {
            let (etale, _) = hypha.get_etale("zone");
            let etale = etale.unwrap();
            assert_eq!(etale.parts(), &[Bytes::from_static(b"one")]);
            assert_eq!(etale.t_out(), 42);
            assert_eq!(etale.t_in(), now);
        }

        hypha.pause_etale("zone").unwrap();
        hypha.ingest(
            now + 1,
            vec![b"zone\0".to_vec(), 43i64.to_le_bytes().to_vec(), b"two".to_vec()],
        );
        {
            let (etale, _) = hypha.get_etale("zone");
            let etale = etale.unwrap();
            assert_eq!(etale.parts(), &[Bytes::from_static(b"one")]);
            assert_eq!(etale.t_out(), 42);
        }

        hypha.resume_etale("zone").unwrap();
        hypha.ingest(
            now + 2,
            vec![b"zone\0".to_vec(), 44i64.to_le_bytes().to_vec(), b"two".to_vec()],
        );
        let (etale, _) = hypha.get_etale("zone");
        let etale = etale.unwrap();
        assert_eq!(etale.parts(), &[Bytes::from_static(b"two")]);
        assert_eq!(etale.t_out(), 44);
        assert_eq!(etale.t_in(), now + 2);
    }
}

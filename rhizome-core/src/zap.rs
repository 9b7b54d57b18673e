//! ZAP (ZeroMQ Authentication Protocol) responder.
//!
//! ZAP is defined in RFC 27: <https://rfc.zeromq.org/spec/27/>
//!
//! The transport routes every inbound CURVE handshake through a REQ-REP
//! exchange over `inproc://zeromq.zap.01`. The component that owns the
//! context binds a [`ZapResponder`] there *before* any of its CURVE server
//! sockets bind, then drains it on every tick with a component-specific
//! admission predicate.
//!
//! **Request** (multipart message):
//! 1. Version ("1.0")
//! 2. Sequence (echoed in the reply)
//! 3. Domain (security domain)
//! 4. Address (peer network address)
//! 5. Identity (routing id of the server socket handling the connection)
//! 6. Mechanism ("NULL", "PLAIN", "CURVE")
//! 7. Credentials: for CURVE, one frame with the client's 32-byte public key
//!
//! **Reply**: `[version, sequence, status, status text, user id, metadata]`.
//! Status "200" admits the connection; the user id becomes the `User-Id`
//! metadata on messages the server receives from that session.

use tracing::{trace, warn};

use crate::consts::{CURVE_MECHANISM, DEF_LINGER, ZAP_ENDPOINT, ZAP_VERSION};
use crate::error::Result;

/// A parsed ZAP authentication request.
#[derive(Debug, Clone)]
pub struct ZapRequest {
    /// Version frame, echoed back verbatim.
    pub version: Vec<u8>,
    /// Sequence frame, echoed back verbatim.
    pub sequence: Vec<u8>,
    /// Security domain of the receiving socket.
    pub domain: String,
    /// Network address of the connecting peer.
    pub address: String,
    /// Routing identity of the server socket handling the connection.
    pub identity: Vec<u8>,
    /// Mechanism name as raw bytes (`b"CURVE"` for every socket here).
    pub mechanism: Vec<u8>,
    /// Z85 encoding of the client's CURVE public key.
    pub key_z85: String,
}

impl ZapRequest {
    /// Parse a request from raw frames.
    ///
    /// Returns `None` for requests this substrate cannot attribute: fewer
    /// than 7 frames, or a CURVE credential that is not 32 bytes.
    #[must_use]
    pub fn parse(frames: &[Vec<u8>]) -> Option<Self> {
        if frames.len() < 7 {
            return None;
        }
        let mechanism = frames[5].clone();
        let key_z85 = if mechanism == CURVE_MECHANISM {
            if frames[6].len() != 32 {
                return None;
            }
            zmq::z85_encode(&frames[6]).ok()?
        } else {
            String::new()
        };
        Some(Self {
            version: frames[0].clone(),
            sequence: frames[1].clone(),
            domain: String::from_utf8_lossy(&frames[2]).into_owned(),
            address: String::from_utf8_lossy(&frames[3]).into_owned(),
            identity: frames[4].clone(),
            mechanism,
            key_z85,
        })
    }

    /// True when the request carries the CURVE mechanism.
    #[must_use]
    pub fn is_curve(&self) -> bool {
        self.mechanism == CURVE_MECHANISM
    }

    /// Encode the admitting reply: the client key becomes the user id.
    #[must_use]
    pub fn accept(&self) -> Vec<Vec<u8>> {
        vec![
            self.version.clone(),
            self.sequence.clone(),
            b"200".to_vec(),
            b"OK".to_vec(),
            self.key_z85.clone().into_bytes(),
            Vec::new(),
        ]
    }

    /// Encode the rejecting reply.
    #[must_use]
    pub fn reject(&self) -> Vec<Vec<u8>> {
        reject_frames(&self.version, &self.sequence)
    }
}

fn reject_frames(version: &[u8], sequence: &[u8]) -> Vec<Vec<u8>> {
    vec![
        version.to_vec(),
        sequence.to_vec(),
        b"400".to_vec(),
        b"FAILED".to_vec(),
        Vec::new(),
        Vec::new(),
    ]
}

/// The REP socket answering ZAP requests for one context.
pub struct ZapResponder {
    sock: zmq::Socket,
}

impl ZapResponder {
    /// Bind the responder inside `ctx`.
    ///
    /// Must happen before any CURVE server socket of the same context binds,
    /// otherwise inbound handshakes race the authenticator and fail.
    ///
    /// # Errors
    ///
    /// Fails when the ZAP endpoint is already bound in this context.
    pub fn bind(ctx: &zmq::Context) -> Result<Self> {
        let sock = ctx.socket(zmq::REP)?;
        sock.set_linger(DEF_LINGER)?;
        sock.bind(ZAP_ENDPOINT)?;
        Ok(Self { sock })
    }

    /// Drain all queued requests, answering each through `allow`.
    ///
    /// Non-blocking: returns as soon as the socket queue is empty. Requests
    /// that cannot be parsed are answered "400" so the REP state machine
    /// stays consistent.
    ///
    /// # Errors
    ///
    /// Propagates transport errors; admission decisions are not errors.
    pub fn respond_all(&self, mut allow: impl FnMut(&ZapRequest) -> bool) -> Result<()> {
        while self.sock.poll(zmq::POLLIN, 0)? > 0 {
            let frames = self.sock.recv_multipart(0)?;
            let reply = match ZapRequest::parse(&frames) {
                Some(req) => {
                    if allow(&req) {
                        trace!("[ZAP] pass: key={} address={}", req.key_z85, req.address);
                        req.accept()
                    } else {
                        trace!("[ZAP] fail: key={} address={}", req.key_z85, req.address);
                        req.reject()
                    }
                }
                None => {
                    warn!("[ZAP] unparseable request ({} frames)", frames.len());
                    let version = frames.first().map(Vec::as_slice).unwrap_or(ZAP_VERSION);
                    let sequence = frames.get(1).map(Vec::as_slice).unwrap_or_default();
                    reject_frames(version, sequence)
                }
            };
            self.sock.send_multipart(reply, 0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve_request(identity: &[u8], key: &[u8; 32]) -> Vec<Vec<u8>> {
        vec![
            b"1.0".to_vec(),
            b"1".to_vec(),
            b"rhizome".to_vec(),
            b"192.0.2.7:49152".to_vec(),
            identity.to_vec(),
            b"CURVE".to_vec(),
            key.to_vec(),
        ]
    }

    #[test]
    fn test_parse_curve_request() {
        let key = [7u8; 32];
        let req = ZapRequest::parse(&curve_request(b"pubsub", &key)).unwrap();
        assert!(req.is_curve());
        assert_eq!(req.identity, b"pubsub");
        assert_eq!(req.key_z85, zmq::z85_encode(&key).unwrap());
        assert_eq!(req.address, "192.0.2.7:49152");
    }

    #[test]
    fn test_parse_rejects_short_request() {
        let frames = vec![b"1.0".to_vec(), b"1".to_vec()];
        assert!(ZapRequest::parse(&frames).is_none());
    }

    #[test]
    fn test_parse_rejects_wrong_key_length() {
        let mut frames = curve_request(b"pubsub", &[0u8; 32]);
        frames[6] = vec![1, 2, 3];
        assert!(ZapRequest::parse(&frames).is_none());
    }

    #[test]
    fn test_accept_reply_frames() {
        let key = [42u8; 32];
        let req = ZapRequest::parse(&curve_request(b"beacon", &key)).unwrap();
        let reply = req.accept();
        assert_eq!(reply[0], b"1.0");
        assert_eq!(reply[1], b"1");
        assert_eq!(reply[2], b"200");
        assert_eq!(reply[3], b"OK");
        assert_eq!(reply[4], zmq::z85_encode(&key).unwrap().into_bytes());
        assert!(reply[5].is_empty());
    }

    #[test]
    fn test_reject_reply_frames() {
        let req = ZapRequest::parse(&curve_request(b"bogus", &[0u8; 32])).unwrap();
        let reply = req.reject();
        assert_eq!(reply[2], b"400");
        assert_eq!(reply[3], b"FAILED");
        assert!(reply[4].is_empty());
    }

    #[test]
    fn test_responder_over_inproc() {
        let ctx = zmq::Context::new();
        let responder = ZapResponder::bind(&ctx).unwrap();

        let req_sock = ctx.socket(zmq::REQ).unwrap();
        req_sock.set_linger(0).unwrap();
        req_sock.connect(crate::consts::ZAP_ENDPOINT).unwrap();

        // Well-formed request, admitted by a permissive predicate.
        req_sock
            .send_multipart(curve_request(b"pubsub", &[9u8; 32]), 0)
            .unwrap();
        responder.respond_all(|req| req.identity == b"pubsub").unwrap();
        let reply = req_sock.recv_multipart(0).unwrap();
        assert_eq!(reply[2], b"200");

        // Malformed request still gets a 400 and the channel keeps working.
        req_sock
            .send_multipart([b"1.0".to_vec(), b"2".to_vec()], 0)
            .unwrap();
        responder.respond_all(|_| true).unwrap();
        let reply = req_sock.recv_multipart(0).unwrap();
        assert_eq!(reply[1], b"2");
        assert_eq!(reply[2], b"400");

        // Rejected identity.
        req_sock
            .send_multipart(curve_request(b"other", &[9u8; 32]), 0)
            .unwrap();
        responder.respond_all(|req| req.identity == b"pubsub").unwrap();
        let reply = req_sock.recv_multipart(0).unwrap();
        assert_eq!(reply[2], b"400");
    }
}

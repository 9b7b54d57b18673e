//! Two peers in one process: direct endpoint, full publish/subscribe path.

use std::thread;
use std::time::{Duration, Instant};

use rhizome::prelude::*;
use rhizome::RhizomeError;

fn free_port() -> u16 {
    portpicker::pick_unused_port().expect("no free port")
}

fn pair(port: u16) -> (Efunguz, Efunguz) {
    let (pub_a, sec_a) = rhizome::keys::generate_keypair().unwrap();
    let (_, sec_b) = rhizome::keys::generate_keypair().unwrap();

    let peer_a = Efunguz::new(&sec_a, port, Transport::Tcp).unwrap();
    let mut peer_b = Efunguz::new(&sec_b, free_port(), Transport::Tcp).unwrap();

    let (hypha, status) = peer_b.add_ehypha_at(&pub_a, "127.0.0.1", port).unwrap();
    assert_eq!(status, Status::Ok);
    hypha.add_etale("x").unwrap();

    (peer_a, peer_b)
}

/// Drive both peers until `done` holds for B's etale, or the deadline hits.
fn drive_until(
    peer_a: &mut Efunguz,
    peer_b: &mut Efunguz,
    pub_a: &str,
    title: &str,
    parts: &[Bytes],
    timeout: Duration,
    done: impl Fn(&Etale) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        peer_a.emit_etale(title, parts).unwrap();
        peer_a.update().unwrap();
        peer_b.update().unwrap();
        {
            let (hypha, _) = peer_b.get_ehypha(pub_a);
            let (etale, _) = hypha.unwrap().get_etale(title);
            if done(etale.unwrap()) {
                return true;
            }
        }
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_direct_pair_delivers_etale() {
    rhizome::dev_tracing::init_tracing();
    let port = free_port();
    let (mut peer_a, mut peer_b) = pair(port);
    let pub_a = peer_a.publickey().to_owned();

    let t_start = rhizome::time::time_musec();
    let parts = [Bytes::from_static(b"hello")];
    assert!(
        drive_until(
            &mut peer_a,
            &mut peer_b,
            &pub_a,
            "x",
            &parts,
            Duration::from_secs(5),
            |etale| etale.t_in() >= 0,
        ),
        "etale never arrived"
    );

    let (hypha, _) = peer_b.get_ehypha(&pub_a);
    let hypha = hypha.unwrap();
    let (etale, _) = hypha.get_etale("x");
    let etale = etale.unwrap();
    assert_eq!(etale.parts(), &[Bytes::from_static(b"hello")]);
    assert!(etale.t_out() >= t_start);
    assert!(etale.t_in() >= etale.t_out());
}

#[test]
fn test_multi_part_and_empty_payloads() {
    let port = free_port();
    let (mut peer_a, mut peer_b) = pair(port);
    let pub_a = peer_a.publickey().to_owned();

    let parts = [
        Bytes::from_static(b"alpha"),
        Bytes::new(),
        Bytes::from_static(&[0, 1, 2, 255]),
    ];
    assert!(drive_until(
        &mut peer_a,
        &mut peer_b,
        &pub_a,
        "x",
        &parts,
        Duration::from_secs(5),
        |etale| etale.t_in() >= 0,
    ));

    let (hypha, _) = peer_b.get_ehypha(&pub_a);
    let (etale, _) = hypha.unwrap().get_etale("x");
    assert_eq!(etale.unwrap().parts(), &parts[..]);
}

#[test]
fn test_pause_blocks_and_resume_restores_delivery() {
    let port = free_port();
    let (mut peer_a, mut peer_b) = pair(port);
    let pub_a = peer_a.publickey().to_owned();

    // Establish the link with an initial payload.
    assert!(drive_until(
        &mut peer_a,
        &mut peer_b,
        &pub_a,
        "x",
        &[Bytes::from_static(b"zero")],
        Duration::from_secs(5),
        |etale| etale.t_in() >= 0,
    ));

    {
        let (hypha, _) = peer_b.get_ehypha(&pub_a);
        assert_eq!(hypha.unwrap().pause_etale("x").unwrap(), Status::Ok);
    }

    // While paused, nothing lands.
    assert!(!drive_until(
        &mut peer_a,
        &mut peer_b,
        &pub_a,
        "x",
        &[Bytes::from_static(b"one")],
        Duration::from_millis(300),
        |etale| etale.parts() == [Bytes::from_static(b"one")],
    ));

    {
        let (hypha, _) = peer_b.get_ehypha(&pub_a);
        assert_eq!(hypha.unwrap().resume_etale("x").unwrap(), Status::Ok);
    }

    // After resume, the next publication mutates all three fields.
    assert!(drive_until(
        &mut peer_a,
        &mut peer_b,
        &pub_a,
        "x",
        &[Bytes::from_static(b"two")],
        Duration::from_secs(5),
        |etale| etale.parts() == [Bytes::from_static(b"two")],
    ));
}

#[test]
fn test_add_del_ehypha_idempotent() {
    let (pub_a, _) = rhizome::keys::generate_keypair().unwrap();
    let (_, sec_b) = rhizome::keys::generate_keypair().unwrap();
    let mut peer_b = Efunguz::new(&sec_b, free_port(), Transport::Tcp).unwrap();

    let (_, status) = peer_b.add_ehypha(&pub_a).unwrap();
    assert_eq!(status, Status::Ok);
    let (_, status) = peer_b.add_ehypha(&pub_a).unwrap();
    assert_eq!(status, Status::AlreadyPresent);

    assert_eq!(peer_b.del_ehypha(&pub_a).unwrap(), Status::Ok);
    assert_eq!(peer_b.del_ehypha(&pub_a).unwrap(), Status::AlreadyAbsent);
}

#[test]
fn test_whitelist_file_roundtrip() {
    use std::io::Write;

    let (pub_a, _) = rhizome::keys::generate_keypair().unwrap();
    let (pub_c, _) = rhizome::keys::generate_keypair().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{pub_a}").unwrap();
    writeln!(file, "tooshort").unwrap();
    writeln!(file, "{pub_c} trailing comment").unwrap();

    let (_, sec) = rhizome::keys::generate_keypair().unwrap();
    let mut peer = Efunguz::new(&sec, free_port(), Transport::Tcp).unwrap();
    peer.read_whitelist_publickeys(file.path()).unwrap();
    // The whitelist is observable through admission; here it is enough that
    // the call parsed without error and later admission tests cover the gate.
    peer.del_whitelist_publickeys([pub_a.as_str(), pub_c.as_str()]);
    peer.clear_whitelist_publickeys();
}

#[test]
fn test_onion_variant_has_no_catalogues() {
    let (pub_a, _) = rhizome::keys::generate_keypair().unwrap();
    let (_, sec) = rhizome::keys::generate_keypair().unwrap();
    let mut peer = Efunguz::new(&sec, free_port(), Transport::tor_default()).unwrap();

    assert!(matches!(
        peer.add_ecatal_from(&pub_a, "tcp://127.0.0.1:53791"),
        Err(RhizomeError::NoCatalogues)
    ));
    assert!(matches!(
        peer.add_ecatal_to(&pub_a, "tcp://127.0.0.1:51947"),
        Err(RhizomeError::NoCatalogues)
    ));
    assert!(matches!(peer.emit_beacon(), Err(RhizomeError::NoCatalogues)));

    // The pub/sub surface itself is identical across transports.
    let (hypha, status) = peer.add_ehypha(&pub_a).unwrap();
    assert_eq!(status, Status::Ok);
    hypha.add_etale("zone").unwrap();
    peer.update().unwrap();
}

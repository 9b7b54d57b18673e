//! Catalogue service binary.
//!
//! ```text
//! rhizome-catal keygen
//! rhizome-catal serve <secretkey> [beacon_whitelist_file] [pubsub_whitelist_file]
//! ```
//!
//! Ports come from the standard constants; logging follows `RUST_LOG`.

use std::env;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use tracing::error;

use rhizome_catal::Ecataloguz;
use rhizome_core::consts::{DEF_ECATAL_BEACON_PORT, DEF_ECATAL_PUBSUB_PORT};
use rhizome_core::keys::generate_keypair;

static RUNNING: AtomicBool = AtomicBool::new(true);

fn usage(prog: &str) -> ExitCode {
    eprintln!("Usage:");
    eprintln!("  {prog} keygen");
    eprintln!("  {prog} serve <secretkey> [beacon_whitelist_file] [pubsub_whitelist_file]");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let prog = args.first().map(String::as_str).unwrap_or("rhizome-catal");

    match args.get(1).map(String::as_str) {
        Some("keygen") => match generate_keypair() {
            Ok((public, secret)) => {
                println!("public: {public}");
                println!("secret: {secret}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("key generation failed: {e}");
                ExitCode::FAILURE
            }
        },
        Some("serve") => {
            let Some(secretkey) = args.get(2) else {
                return usage(prog);
            };
            match serve(secretkey, args.get(3), args.get(4)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("catalogue failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        _ => usage(prog),
    }
}

fn serve(
    secretkey: &str,
    beacon_whitelist: Option<&String>,
    pubsub_whitelist: Option<&String>,
) -> rhizome_core::error::Result<()> {
    let mut catal = Ecataloguz::new(secretkey, DEF_ECATAL_BEACON_PORT, DEF_ECATAL_PUBSUB_PORT)?;
    if let Some(path) = beacon_whitelist {
        catal.read_beacon_whitelist_publickeys_with_comments(path)?;
    }
    if let Some(path) = pubsub_whitelist {
        catal.read_pubsub_whitelist_publickeys(path)?;
    }
    println!("ecataloguz public key: {}", catal.publickey());
    catal.run(&RUNNING, true)
}

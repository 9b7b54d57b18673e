//! Opt-in logging for tests and demos.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber tuned for watching substrate traffic.
///
/// The filter comes from `RUST_LOG` when set; otherwise it defaults to
/// `debug` for the rhizome crates only, so socket lifecycle and
/// dropped-frame traces show up without dependency noise. Output goes
/// through the test writer, so it surfaces only for failing tests (or under
/// `--nocapture`). Installation is best-effort: calling this from every test
/// is fine, later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("rhizome=debug,rhizome_core=debug,rhizome_catal=debug")
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}

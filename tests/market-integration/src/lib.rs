//! End-to-end tests for the marketplace core: full order lifecycles over
//! the listing store and order machine, and conversation flows over the
//! thread engine.

use std::sync::Once;

use farmlink_common::identity::AccountId;


static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Deterministic account handle from a short name.
pub fn account(name: &str) -> AccountId {
    AccountId(format!("0x{name}"))
}

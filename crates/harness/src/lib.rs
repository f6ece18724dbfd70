mod map;
mod rig;

pub use map::{ids_of, line, point, square, FakeMapSession};
pub use rig::{assignment_props, RigResult, TestRig};

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Install a test-writer subscriber once per test binary. Filter with
/// `RUST_LOG`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    });
}

//! Helpers shared by the crate's tests.

pub mod mock;

/// Install a test subscriber. Filter with `TEST_LOG`, e.g.
/// `TEST_LOG=gpu_verify=debug`.
pub fn trace_init() {
    let levels = std::env::var("TEST_LOG").unwrap_or_else(|_| "error".to_owned());
    crate::trace::init(false, false, &levels);
}

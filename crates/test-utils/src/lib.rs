pub mod builders;
pub mod fake_service;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use fleetrun::logging::{build_filter, LOG_ENV};
use tracing_subscriber::fmt;

pub use builders::{ConfigFileBuilder, Harness, WorkflowConfigBuilder};
pub use fake_service::FakeCommandService;

static INIT: Once = Once::new();

/// Tracing for tests, filtered the same way as the binary.
///
/// Reads `FLEETRUN_LOG` (default `warn`) and writes through the test writer,
/// so output only shows for failing tests unless run with `--nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let directives = std::env::var(LOG_ENV).unwrap_or_else(|_| "warn".to_string());
        let Ok(filter) = build_filter(&directives) else {
            return;
        };

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, panicking if it takes longer than `limit`.
///
/// Under a paused clock the limit is virtual, so it only trips when the
/// future is genuinely stuck.
pub async fn within<F, T>(limit: Duration, f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, f).await {
        Ok(value) => value,
        Err(_) => panic!("test step did not finish within {limit:?}"),
    }
}

/// [`within`] with a 5-second limit.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    within(Duration::from_secs(5), f).await
}

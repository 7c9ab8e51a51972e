//! Tracing setup shared by the sispub binary and its integration tests.
//!
//! [`init_tracing`] installs a global subscriber built from an `EnvFilter`
//! and the `fmt` layer. Only the first call in a process has any effect.
//! Without `RUST_LOG` the chosen level applies to the sispub crates only;
//! everything else (tokio, clap) stays at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Tracing targets owned by this workspace.
pub const SISPUB_TARGETS: &[&str] = &["sispub", "sispub_core", "sispub_pipeline"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(SISPUB_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Install the global tracing subscriber.
///
/// * `json` - emit newline-delimited JSON instead of human-readable lines.
/// * `level` - verbosity of the sispub targets when `RUST_LOG` is unset.
///
/// `RUST_LOG` wins over `level` when present, so a single stage can be
/// traced with e.g. `RUST_LOG=sispub_pipeline::runner=debug`.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().ok();
    }
}

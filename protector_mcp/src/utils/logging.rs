//! Logging initialization.
//!
//! One-shot setup of the `tracing` subscriber. Because the wrapper talks
//! MCP over stdout, log output must never touch stdout: the default sink is
//! a daily-rolling file in the user cache directory, with stderr as the
//! explicit (`--log-to-stderr`) or fallback choice. `RUST_LOG` overrides
//! the level selection when set.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, path::Path, sync::Once};
use tracing_subscriber::{fmt::layer, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Initializes the logging system. Safe to call more than once; only the
/// first call takes effect.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},protector_mcp=debug")));

        if log_to_file
            && let Some(proj_dirs) = ProjectDirs::from("com", "McpContextProtector", "mcp-context-protector")
        {
            let log_dir = proj_dirs.cache_dir();

            // tracing-appender 0.2.4+ panics on permission errors, so probe
            // writability first and fall back to stderr when the cache dir
            // is unusable.
            if test_write_permission(log_dir) {
                let file_appender =
                    tracing_appender::rolling::daily(log_dir, "mcp-context-protector.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Leak the guard so logs are flushed for the process lifetime.
                Box::leak(Box::new(guard));
                return;
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(())
}

/// Checks that the log directory exists and is writable.
fn test_write_permission(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let test_file = dir.join(".protector_log_test");
    match std::fs::write(&test_file, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&test_file);
            true
        }
        Err(_) => false,
    }
}

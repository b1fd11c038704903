//! Optional `env_logger` wiring (§10.2), feature-gated the same way the
//! crate's `init_env_logger` feature already implies. Library code never
//! installs a logger on its own outside this opt-in entry point; an
//! embedding application is free to install its own subscriber instead.

/// Install `env_logger` as the global logger, reading `RUST_LOG` the usual
/// way. Idempotent: a second call after a logger is already installed is
/// silently ignored.
#[cfg(feature = "init_env_logger")]
pub fn init() {
    let _ = env_logger::builder().is_test(false).try_init();
}

#[cfg(not(feature = "init_env_logger"))]
pub fn init() {}

// src/logger.rs
use env_logger::{Builder, Env, Target};
use std::io::Write;

const LEVELS: [&str; 5] = ["off", "warn", "info", "debug", "trace"];

/// Default filter for `verbose` repetitions of `-v`. Release builds start at
/// `warn` so dangling dependencies and clean failures are visible.
fn default_filter(verbose: u8) -> &'static str {
    let base = if cfg!(debug_assertions) { 3 } else { 1 };
    LEVELS[(base + usize::from(verbose)).min(LEVELS.len() - 1)]
}

/// Installs the stderr logger. `RUST_LOG` overrides the default filter.
pub fn init(verbose: u8) {
    let env = Env::default().default_filter_or(default_filter(verbose));
    let mut builder = Builder::from_env(env);

    builder.target(Target::Stderr).format(|buf, record| {
        writeln!(
            buf,
            "[{:>5} {}:{}] {}",
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        )
    });

    if builder.try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

/// Re-export logging macros
#[allow(unused_imports)]
pub use log::{debug, error, info, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level_and_saturates() {
        let base = default_filter(0);
        assert!(base == "debug" || base == "warn");
        assert_eq!(default_filter(u8::MAX), "trace");
    }
}

//! Log sink installation

use crate::cli::{LogFormat, ServerConfig};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Level implied by the verbosity flags
pub fn level(config: &ServerConfig) -> Level {
    if config.debug {
        Level::DEBUG
    } else if config.verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

/// Install the global subscriber; `RUST_LOG` wins over the flags when set
pub fn init(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level(config).as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match config.log_format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config(flags: &[&str]) -> ServerConfig {
        let mut argv = vec!["tickrelay"];
        argv.extend_from_slice(flags);
        crate::cli::Args::try_parse_from(argv).unwrap().resolve().unwrap()
    }

    #[test]
    fn test_level_from_flags() {
        assert_eq!(level(&config(&[])), Level::WARN);
        assert_eq!(level(&config(&["--verbose"])), Level::INFO);
        assert_eq!(level(&config(&["--verbose", "--debug"])), Level::DEBUG);
    }
}

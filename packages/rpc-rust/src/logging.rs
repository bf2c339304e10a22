//! Process-wide `tracing` subscriber setup.
//!
//! Libraries never install a subscriber on their own; binaries call [`init`]
//! once. Tap gating inside [`Server`](crate::Server) reads the configured
//! level directly, so tests can run with any subscriber (or none).

use jobwire_core::RpcError;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggerOptions};

/// Install a fmt subscriber honoring `options`. `RUST_LOG` takes precedence
/// over the configured level.
///
/// Returns `Ok(false)` if a global subscriber was already installed.
///
/// # Errors
///
/// `InvalidOptions` if the configured level cannot be parsed.
pub fn init(options: &LoggerOptions) -> Result<bool, RpcError> {
    let level = options.level_filter()?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = match options.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let options = LoggerOptions::with_level("warn");
        let _ = init(&options).unwrap();
        assert!(!init(&options).unwrap());
    }

    #[test]
    fn bad_level_is_rejected() {
        let err = init(&LoggerOptions::with_level("chatty")).unwrap_err();
        assert!(matches!(err, RpcError::InvalidOptions(_)));
    }
}

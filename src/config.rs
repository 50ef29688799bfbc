//! Process-wide defaults, mirroring the teacher's `cfg` module but on a
//! `OnceLock` instead of a `static mut` since this crate targets stable Rust.

use std::sync::OnceLock;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    /// Default size for a freshly allocated recv/send [`Buffer`](crate::buf::Buffer).
    pub default_buf_len: usize,
    /// Default timeout applied to a socket that never called `set_timeout`.
    pub default_timeout: Duration,
    /// Default value of `verify_peer` for sockets that don't set TLS options explicitly.
    pub default_verify_peer: bool,
    /// Default ALPN protocol list applied to a fresh `TlsOptions` unless overridden.
    pub default_alpn: Vec<Vec<u8>>,
}

impl Config {
    pub fn defaults() -> Self {
        Self {
            default_buf_len: 4096,
            default_timeout: Duration::from_secs(30),
            default_verify_peer: true,
            default_alpn: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Returns the active configuration, initializing it to defaults on first use.
pub fn config() -> Config {
    CONFIG.get_or_init(Config::defaults).clone()
}

/// Installs a configuration. Must be called before the first [`config`] read;
/// subsequent calls are ignored, same as `OnceLock::set`'s semantics.
pub fn set_config(cfg: Config) {
    let _ = CONFIG.set(cfg);
}

pub fn default_buf_len() -> usize {
    config().default_buf_len
}

pub fn default_timeout() -> Duration {
    config().default_timeout
}

pub fn default_verify_peer() -> bool {
    config().default_verify_peer
}

pub fn default_alpn() -> Vec<Vec<u8>> {
    config().default_alpn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::defaults();
        assert_eq!(cfg.default_buf_len, 4096);
        assert!(cfg.default_verify_peer);
    }
}

use std::env;

/// Environment-driven configuration, read once at startup.
///
/// | variable              | meaning                                  | default |
/// |-----------------------|------------------------------------------|---------|
/// | `GSM_VALUE_CACHE`     | enable the value cache                   | on      |
/// | `GSM_RESOLVE_CACHE`   | enable the address-resolution cache      | on      |
/// | `GSM_WRITE_BATCH`     | enable the write-aggregation cache       | on      |
/// | `GSM_READAHEAD`       | read-ahead element count, 0 disables     | 0       |
/// | `GSM_READAHEAD_STRIDE`| read-ahead stride in elements            | 1       |
/// | `GSM_WRITE_BATCH_LIMIT`| pending writes per destination before a forced flush | 512 |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub value_cache: bool,
    pub resolve_cache: bool,
    pub write_batch: bool,
    pub readahead: usize,
    pub readahead_stride: usize,
    pub write_batch_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            value_cache: true,
            resolve_cache: true,
            write_batch: true,
            readahead: 0,
            readahead_stride: 1,
            write_batch_limit: 512,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "off"),
        Err(_) => default,
    }
}

fn env_count(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            value_cache: env_flag("GSM_VALUE_CACHE", defaults.value_cache),
            resolve_cache: env_flag("GSM_RESOLVE_CACHE", defaults.resolve_cache),
            write_batch: env_flag("GSM_WRITE_BATCH", defaults.write_batch),
            readahead: env_count("GSM_READAHEAD", defaults.readahead),
            readahead_stride: env_count("GSM_READAHEAD_STRIDE", defaults.readahead_stride).max(1),
            write_batch_limit: env_count("GSM_WRITE_BATCH_LIMIT", defaults.write_batch_limit)
                .max(1),
        }
    }

    /// All three caches off; used for cache-transparency comparisons.
    pub fn uncached() -> Self {
        Self {
            value_cache: false,
            resolve_cache: false,
            write_batch: false,
            ..Self::default()
        }
    }
}

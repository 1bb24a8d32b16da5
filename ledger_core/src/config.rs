//! Splitter configuration.
//!
//! **Parameters must not change once content has been stored**, otherwise the
//! same data produces different chunk boundaries and deduplication breaks.
//!
//! Config files use the store's `key=value` format:
//! ```text
//! version=1
//! # comments are allowed
//! min_chunk_size=4096
//! max_chunk_size=65535
//! blob_bits=13
//! bits_per_level=4
//! window_size=64
//! ```
//! Omitted keys keep their defaults; unknown keys are ignored.

use crate::error::{Error, Result};
use crate::file_index::{FILE_INDEX_HEADER_SIZE, MAX_ENCODED_CHILD_SIZE};

/// Default minimum chunk size in bytes.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Default maximum chunk size in bytes. Also bounds the size of index pieces.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = u16::MAX as usize;

/// Default number of low digest bits that must be set for a cut.
pub const DEFAULT_BLOB_BITS: u32 = 13;

/// Default number of extra set bits needed to climb one index level.
pub const DEFAULT_BITS_PER_LEVEL: u32 = 4;

/// Default rolling hash window length.
pub const DEFAULT_WINDOW_SIZE: usize = 64;

/// Configuration for the splitter and its rolling hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitConfig {
    /// Minimum chunk size in bytes.
    pub min_chunk_size: usize,
    /// Maximum size of any piece, chunk or index, in bytes.
    pub max_chunk_size: usize,
    /// Low digest bits that must all be one to cut.
    pub blob_bits: u32,
    /// Extra trailing one bits per index level.
    pub bits_per_level: u32,
    /// Rolling hash window length (a power of two).
    pub window_size: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            blob_bits: DEFAULT_BLOB_BITS,
            bits_per_level: DEFAULT_BITS_PER_LEVEL,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl SplitConfig {
    /// Check that the parameters describe a working splitter.
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_size == 0 {
            return Err(Error::invalid_config("min_chunk_size must be positive"));
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(Error::invalid_config(format!(
                "min_chunk_size {} exceeds max_chunk_size {}",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        if !self.window_size.is_power_of_two() {
            return Err(Error::invalid_config(format!(
                "window_size {} is not a power of two",
                self.window_size
            )));
        }
        if self.blob_bits == 0 || self.blob_bits >= 64 {
            return Err(Error::invalid_config(format!(
                "blob_bits {} must be in 1..64",
                self.blob_bits
            )));
        }
        if self.bits_per_level == 0 || self.bits_per_level >= 64 {
            return Err(Error::invalid_config(format!(
                "bits_per_level {} must be in 1..64",
                self.bits_per_level
            )));
        }
        if self.max_identifiers_per_index() < 2 {
            return Err(Error::invalid_config(format!(
                "max_chunk_size {} leaves no room for an index of two children",
                self.max_chunk_size
            )));
        }
        Ok(())
    }

    /// Largest fan-out that keeps an encoded index within `max_chunk_size`.
    pub fn max_identifiers_per_index(&self) -> usize {
        self.max_chunk_size.saturating_sub(FILE_INDEX_HEADER_SIZE) / MAX_ENCODED_CHILD_SIZE
    }

    /// Index level that absorbs a cut of the given strength.
    pub fn level_for_cut(&self, cut_strength: u32) -> usize {
        (cut_strength.saturating_sub(self.blob_bits) / self.bits_per_level) as usize
    }

    /// Render as a config file that [`parse`](Self::parse) reads back.
    pub fn to_config_string(&self) -> String {
        format!(
            "version=1\nmin_chunk_size={}\nmax_chunk_size={}\nblob_bits={}\n\
             bits_per_level={}\nwindow_size={}\n",
            self.min_chunk_size,
            self.max_chunk_size,
            self.blob_bits,
            self.bits_per_level,
            self.window_size
        )
    }

    /// Parse a config file, starting from defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut version = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::invalid_config(format!("Malformed line: {}", line)));
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "version" => version = Some(value.to_string()),
                "min_chunk_size" => config.min_chunk_size = parse_value(key, value)?,
                "max_chunk_size" => config.max_chunk_size = parse_value(key, value)?,
                "blob_bits" => config.blob_bits = parse_value(key, value)?,
                "bits_per_level" => config.bits_per_level = parse_value(key, value)?,
                "window_size" => config.window_size = parse_value(key, value)?,
                _ => {}
            }
        }

        if version.as_deref() != Some("1") {
            return Err(Error::invalid_config(format!(
                "Unsupported config version: {:?}",
                version
            )));
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::invalid_config(format!("Invalid value for {}: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SplitConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_identifiers_per_index(), 1074);
    }

    #[test]
    fn test_index_fits_in_max_chunk_size() {
        let config = SplitConfig::default();
        let worst =
            FILE_INDEX_HEADER_SIZE + config.max_identifiers_per_index() * MAX_ENCODED_CHILD_SIZE;
        assert!(worst <= config.max_chunk_size);
    }

    #[test]
    fn test_level_for_cut() {
        let config = SplitConfig::default();
        assert_eq!(config.level_for_cut(0), 0);
        assert_eq!(config.level_for_cut(13), 0);
        assert_eq!(config.level_for_cut(16), 0);
        assert_eq!(config.level_for_cut(17), 1);
        assert_eq!(config.level_for_cut(21), 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            SplitConfig {
                min_chunk_size: 0,
                ..SplitConfig::default()
            },
            SplitConfig {
                min_chunk_size: 100_000,
                ..SplitConfig::default()
            },
            SplitConfig {
                window_size: 48,
                ..SplitConfig::default()
            },
            SplitConfig {
                blob_bits: 0,
                ..SplitConfig::default()
            },
            SplitConfig {
                bits_per_level: 0,
                ..SplitConfig::default()
            },
            SplitConfig {
                min_chunk_size: 16,
                max_chunk_size: 100,
                ..SplitConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }

    #[test]
    fn test_parse_config() {
        let config =
            SplitConfig::parse("version=1\nmin_chunk_size=1024\nwindow_size=32\n").unwrap();
        assert_eq!(config.min_chunk_size, 1024);
        assert_eq!(config.window_size, 32);
        assert_eq!(config.max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_parse_config_with_comments() {
        let content = "# splitter\nversion=1\n\n# tuned\nblob_bits = 10\nfuture_key=1\n";
        let config = SplitConfig::parse(content).unwrap();
        assert_eq!(config.blob_bits, 10);
    }

    #[test]
    fn test_config_string_roundtrip() {
        let config = SplitConfig {
            min_chunk_size: 512,
            max_chunk_size: 8192,
            blob_bits: 9,
            bits_per_level: 3,
            window_size: 32,
        };
        assert_eq!(SplitConfig::parse(&config.to_config_string()).unwrap(), config);
    }

    #[test]
    fn test_parse_config_invalid() {
        assert!(SplitConfig::parse("min_chunk_size=1024\n").is_err());
        assert!(SplitConfig::parse("version=2\n").is_err());
        assert!(SplitConfig::parse("version=1\nblob_bits=many\n").is_err());
        assert!(SplitConfig::parse("version=1\nnonsense\n").is_err());
        assert!(SplitConfig::parse("version=1\nwindow_size=100\n").is_err());
    }
}

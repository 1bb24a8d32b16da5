//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use ledger_core::{
    IterationStatus, KeyPriority, ObjectDigest, ObjectDigestInfo, Piece, SplitConfig, TreeNode,
};
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// The `data` parameter must be a serializable struct that includes
    /// `success: bool` and `result_code: u8` fields.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write raw bytes to stdout, regardless of format.
    pub fn write_raw(&self, data: &[u8]) -> Result<()> {
        let mut handle = self.stdout.lock();
        handle.write_all(data)?;
        handle.flush()?;
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error message with its causes.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Splitter parameters of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigInfo {
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub blob_bits: u32,
    pub bits_per_level: u32,
    pub window_size: usize,
}

impl From<&SplitConfig> for ConfigInfo {
    fn from(config: &SplitConfig) -> Self {
        Self {
            min_chunk_size: config.min_chunk_size,
            max_chunk_size: config.max_chunk_size,
            blob_bits: config.blob_bits,
            bits_per_level: config.bits_per_level,
            window_size: config.window_size,
        }
    }
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub config: ConfigInfo,
}

/// A single piece produced by the splitter.
#[derive(Debug, Clone, Serialize)]
pub struct PieceInfo {
    pub digest: ObjectDigest,
    #[serde(flatten)]
    pub info: ObjectDigestInfo,
    pub size: usize,
}

impl PieceInfo {
    pub fn of(piece: &dyn Piece) -> Self {
        let digest = piece.identifier().digest().clone();
        Self {
            info: digest.info(),
            digest,
            size: piece.data().len(),
        }
    }
}

/// Output for `put` command.
#[derive(Debug, Serialize)]
pub struct PutOutput {
    pub success: bool,
    pub result_code: u8,
    pub path: String,
    pub root: ObjectDigest,
    pub size: u64,
    pub pieces: usize,
    pub stored: usize,
}

/// Output for `split` command.
#[derive(Debug, Serialize)]
pub struct SplitOutput {
    pub success: bool,
    pub result_code: u8,
    pub path: String,
    pub root: ObjectDigest,
    pub size: u64,
    pub pieces: Vec<PieceInfo>,
}

/// A reference held by an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceInfo {
    pub digest: ObjectDigest,
    pub priority: KeyPriority,
}

/// Output for `refs` command.
#[derive(Debug, Serialize)]
pub struct RefsOutput {
    pub success: bool,
    pub result_code: u8,
    pub digest: ObjectDigest,
    pub references: Vec<ReferenceInfo>,
}

/// Output for `collect` command.
#[derive(Debug, Serialize)]
pub struct CollectOutput {
    pub success: bool,
    pub result_code: u8,
    pub digest: ObjectDigest,
    pub status: IterationStatus,
    pub pieces: usize,
    pub chunks: usize,
    pub indices: usize,
    pub bytes: u64,
}

/// Output for `inspect-node` command.
#[derive(Debug, Serialize)]
pub struct InspectNodeOutput {
    pub success: bool,
    pub result_code: u8,
    pub source: String,
    #[serde(flatten)]
    pub node: TreeNode,
}

/// Output for `gc` command.
#[derive(Debug, Serialize)]
pub struct GcOutput {
    pub success: bool,
    pub result_code: u8,
    pub dry_run: bool,
    pub pieces_deleted: usize,
    pub bytes_freed: u64,
}

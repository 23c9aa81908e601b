//! Utility functions for the task orchestration system
//!
//! This module provides common utility functions used across the master and
//! the wire contract, including hashing, validation, timestamps, and the
//! gzip+base64 payload encoding used for log and file chunks.

use base64::{engine::general_purpose::STANDARD as B64_STANDARD, Engine as _};
use blake3::Hasher;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// A helper function to get the current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Calculate BLAKE3 checksum of a string
///
/// Returns the hash as a hex-encoded string (64 characters).
pub fn calculate_string_checksum(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Calculate BLAKE3 checksum of raw bytes
pub fn calculate_bytes_checksum(content: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finalize().to_hex().to_string()
}

/// Validate worker ID format
///
/// Worker IDs must contain only alphanumeric characters, hyphens, and
/// underscores, must not be empty, must not exceed 64 characters, and must
/// not start or end with a hyphen or underscore.
pub fn validate_worker_id(worker_id: &str) -> crate::Result<()> {
    if worker_id.is_empty() {
        return Err(
            crate::OrchestratorError::Validation("Worker ID cannot be empty".to_string()).into(),
        );
    }

    if worker_id.len() > 64 {
        return Err(crate::OrchestratorError::Validation(
            "Worker ID cannot be longer than 64 characters".to_string(),
        )
        .into());
    }

    if !worker_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(crate::OrchestratorError::Validation(
            "Worker ID must contain only alphanumeric characters, hyphens, and underscores"
                .to_string(),
        )
        .into());
    }

    if worker_id.starts_with('-')
        || worker_id.starts_with('_')
        || worker_id.ends_with('-')
        || worker_id.ends_with('_')
    {
        return Err(crate::OrchestratorError::Validation(
            "Worker ID cannot start or end with hyphens or underscores".to_string(),
        )
        .into());
    }

    Ok(())
}

/// Validate a worker's RPC address.
///
/// Addresses must be absolute http/https URLs so the master can POST
/// assignment and cancellation calls to them.
pub fn validate_worker_address(address: &str) -> crate::Result<()> {
    let parsed = url::Url::parse(address).map_err(|e| {
        crate::OrchestratorError::Validation(format!("Invalid worker address '{}': {}", address, e))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(crate::OrchestratorError::Validation(format!(
            "Worker address must be http or https, got '{}'",
            other
        ))
        .into()),
    }
}

/// Gzip-compress and base64-encode a payload for the wire.
pub fn compress_payload(content: &[u8]) -> crate::Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content)?;
    let compressed = encoder.finish()?;
    Ok(B64_STANDARD.encode(compressed))
}

/// Decode and decompress a gzip+base64 payload, enforcing a size cap on the
/// decompressed output to bound memory against hostile payloads.
pub fn decompress_payload(encoded: &str, max_bytes: usize) -> crate::Result<Vec<u8>> {
    let compressed = B64_STANDARD.decode(encoded).map_err(|e| {
        crate::OrchestratorError::Validation(format!("Invalid base64 payload: {}", e))
    })?;

    let mut decoder = GzDecoder::new(&compressed[..]).take(max_bytes as u64 + 1);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| {
        crate::OrchestratorError::Validation(format!("Invalid gzip payload: {}", e))
    })?;

    if out.len() > max_bytes {
        return Err(crate::OrchestratorError::Validation(format!(
            "Decompressed payload exceeds {} byte limit",
            max_bytes
        ))
        .into());
    }
    Ok(out)
}

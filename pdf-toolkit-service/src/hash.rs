//! SHA-256 helpers for file fingerprints and cache keys.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde_json::Value;

fn update_from_reader(hasher: &mut Sha256, path: &Path) -> std::io::Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..bytes_read]);
    }
}

/// Hex SHA-256 of a file, streamed.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    update_from_reader(&mut hasher, path)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn bytes_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Serialize JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }

    sorted(value).to_string()
}

/// Cache key over the input files, the operation name and its parameters.
///
/// Inputs are hashed in order with a separator so `[a, b]` and `[ab]` differ.
pub fn cache_key(inputs: &[&Path], operation: &str, parameters: &Value) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    for input in inputs {
        update_from_reader(&mut hasher, input)?;
        hasher.update([0u8]);
    }
    hasher.update(operation.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(parameters).as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Cache key for operations whose input is inline content rather than a file.
pub fn content_cache_key(content: &[u8], operation: &str, parameters: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.update([0u8]);
    hasher.update(operation.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(parameters).as_bytes());
    format!("{:x}", hasher.finalize())
}

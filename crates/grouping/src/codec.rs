//! Wire format for cached responses (JSON -> deflate)
use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use trafficlight_core::{CachedValue, Error, Response, Result};

/// Encode a response for storage under `key`
pub fn encode(key: &str, response: &Response) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(&CachedValue::from(response))
        .map_err(|e| Error::serialization(key, e))?;

    let mut encoder = DeflateEncoder::new(Vec::with_capacity(json.len() / 2), Compression::fast());
    encoder
        .write_all(&json)
        .map_err(|e| Error::compression("compress", e))?;
    encoder
        .finish()
        .map_err(|e| Error::compression("compress", e))
}

/// Decode bytes previously produced by [`encode`]
pub fn decode(key: &str, bytes: &[u8]) -> Result<CachedValue> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| Error::compression("decompress", e))?;

    serde_json::from_slice(&json).map_err(|e| Error::serialization(key, e))
}

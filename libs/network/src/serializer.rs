//! Argument Serializers
//!
//! Write/read contract used by remote delegates and endpoints. Two
//! backends: `bincode` for compact binary payloads and `serde_json` for
//! payloads a human or a non-Rust peer needs to read.

use crate::error::{NetworkError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode and decode one argument value
pub trait Serializer<A>: Send + Sync {
    /// Append the encoding of `args` to `out`
    fn write(&self, args: &A, out: &mut Vec<u8>) -> Result<()>;

    /// Decode a value from exactly `bytes`
    fn read(&self, bytes: &[u8]) -> Result<A>;

    fn to_vec(&self, args: &A) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(args, &mut out)?;
        Ok(out)
    }
}

/// Compact binary encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl<A> Serializer<A> for BincodeSerializer
where
    A: Serialize + DeserializeOwned,
{
    fn write(&self, args: &A, out: &mut Vec<u8>) -> Result<()> {
        bincode::serialize_into(out, args).map_err(|e| NetworkError::serialization(None, e.to_string()))
    }

    fn read(&self, bytes: &[u8]) -> Result<A> {
        bincode::deserialize(bytes).map_err(|e| NetworkError::serialization(None, e.to_string()))
    }
}

/// JSON text encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<A> Serializer<A> for JsonSerializer
where
    A: Serialize + DeserializeOwned,
{
    fn write(&self, args: &A, out: &mut Vec<u8>) -> Result<()> {
        serde_json::to_writer(out, args).map_err(|e| NetworkError::serialization(None, e.to_string()))
    }

    fn read(&self, bytes: &[u8]) -> Result<A> {
        serde_json::from_slice(bytes).map_err(|e| NetworkError::serialization(None, e.to_string()))
    }
}

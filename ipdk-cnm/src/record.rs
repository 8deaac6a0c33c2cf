//! Ledger record types and their on-disk encoding.
//!
//! Records are stored as a JSON envelope `{"version": N, "record": {...}}` so
//! the ledger stays readable with ordinary tooling.

use ipnet::IpNet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current envelope version written by this build.
pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported record version {found}")]
    UnsupportedVersion { found: u32 },
}

/// Network mapping, keyed by network ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub bridge: String,
    pub gateway: IpNet,
}

/// Endpoint mapping, keyed by endpoint ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Owning network. Absent in records written before it was tracked.
    #[serde(default)]
    pub network_id: String,
    /// Container address in CIDR notation, as requested.
    pub address: String,
    /// Placeholder interface name, also keys the socket directory.
    pub port_name: String,
    pub interface_index: u64,
}

/// Bridge sequence number, keyed by network ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRecord {
    pub sequence: u64,
}

/// Value stored under a `global` counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub next: u64,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    record: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u32,
    record: T,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&EnvelopeRef {
        version: RECORD_VERSION,
        record,
    })?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    // Check the version first so a future layout reports a version error
    // instead of a field mismatch.
    let probe: VersionProbe = serde_json::from_slice(bytes)?;
    if probe.version != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: probe.version,
        });
    }
    let envelope: Envelope<T> = serde_json::from_slice(bytes)?;
    Ok(envelope.record)
}

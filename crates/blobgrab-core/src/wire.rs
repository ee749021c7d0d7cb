// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

// ── Integer-keyed CBOR helpers ──────────────────────────────────────────
//
// High-frequency wire payloads are encoded as CBOR maps with integer keys
// (rather than string field names) to reduce bandwidth.  The
// deserialization helpers accept both integer and string keys for
// backward compatibility.

mod int_cbor {
    use ciborium::Value;

    /// Extract a `Vec<(Value, Value)>` map from a ciborium `Value`.
    pub fn into_map(val: Value) -> Result<Vec<(Value, Value)>, String> {
        match val {
            Value::Map(m) => Ok(m),
            other => Err(format!("expected CBOR map, got {:?}", other)),
        }
    }

    /// Find a field in a CBOR map by integer key, falling back to a string key.
    pub fn find_field<'a>(
        map: &'a [(Value, Value)],
        int_key: i64,
        str_key: &str,
    ) -> Option<&'a Value> {
        map.iter()
            .find(|(k, _)| {
                k.as_integer()
                    .map(|i| i128::from(i) == int_key as i128)
                    .unwrap_or(false)
                    || k.as_text().map(|s| s == str_key).unwrap_or(false)
            })
            .map(|(_, v)| v)
    }

    /// Extract a required byte-array field of exactly `N` bytes.
    pub fn extract_byte_array<const N: usize>(
        map: &[(Value, Value)],
        int_key: i64,
        str_key: &str,
    ) -> Result<[u8; N], String> {
        let val =
            find_field(map, int_key, str_key).ok_or_else(|| format!("missing field {str_key}"))?;
        let bytes = val
            .as_bytes()
            .ok_or_else(|| format!("field {str_key}: expected bytes"))?;
        if bytes.len() != N {
            return Err(format!(
                "field {str_key}: expected {N} bytes, got {}",
                bytes.len()
            ));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Extract a required byte buffer field.
    pub fn extract_bytes(
        map: &[(Value, Value)],
        int_key: i64,
        str_key: &str,
    ) -> Result<Vec<u8>, String> {
        let val =
            find_field(map, int_key, str_key).ok_or_else(|| format!("missing field {str_key}"))?;
        val.as_bytes()
            .cloned()
            .ok_or_else(|| format!("field {str_key}: expected bytes"))
    }

    /// Extract a required unsigned integer field.
    pub fn extract_u64(map: &[(Value, Value)], int_key: i64, str_key: &str) -> Result<u64, String> {
        let val =
            find_field(map, int_key, str_key).ok_or_else(|| format!("missing field {str_key}"))?;
        match val.as_integer() {
            Some(i) => {
                let n: i128 = i.into();
                u64::try_from(n).map_err(|_| format!("field {str_key}: integer out of u64 range"))
            }
            None => Err(format!("field {str_key}: expected integer")),
        }
    }

    /// Encode a byte array as `(integer_key, Value::Bytes)` pair.
    pub fn kv_bytes(key: i64, bytes: &[u8]) -> (Value, Value) {
        (Value::Integer(key.into()), Value::Bytes(bytes.to_vec()))
    }

    /// Encode a u64 as `(integer_key, Value::Integer)` pair.
    pub fn kv_u64(key: i64, n: u64) -> (Value, Value) {
        (Value::Integer(key.into()), Value::Integer(n.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub r#type: u16,
    pub req_id: u32,
    pub flags: u16,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

pub const FLAG_RESPONSE: u16 = 0x0001;
pub const FLAG_ERROR: u16 = 0x0002;

/// Default upper bound for serialized envelope size accepted from the wire.
pub const MAX_ENVELOPE_BYTES: usize = 2 * 1024 * 1024;
/// Default upper bound for decoded payload bytes accepted from the wire.
pub const MAX_ENVELOPE_PAYLOAD_BYTES: usize = 1024 * 1024;
/// Sanity cap on a declared blob length; larger offers are protocol errors.
pub const MAX_BLOB_BYTES: u64 = 64 * 1024 * 1024;

impl Envelope {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(crate::cbor::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Self::decode_with_limits(bytes, MAX_ENVELOPE_BYTES, MAX_ENVELOPE_PAYLOAD_BYTES)
    }

    pub fn decode_with_limits(
        bytes: &[u8],
        max_envelope_bytes: usize,
        max_payload_bytes: usize,
    ) -> anyhow::Result<Self> {
        if bytes.len() > max_envelope_bytes {
            anyhow::bail!(
                "envelope exceeds max size: {} > {}",
                bytes.len(),
                max_envelope_bytes
            );
        }

        let envelope: Self = crate::cbor::from_slice(bytes)?;
        if envelope.payload.len() > max_payload_bytes {
            anyhow::bail!(
                "envelope payload exceeds max size: {} > {}",
                envelope.payload.len(),
                max_payload_bytes
            );
        }
        Ok(envelope)
    }

    /// Decode the envelope payload into a typed protocol message.
    pub fn decode_typed(&self) -> anyhow::Result<WirePayload> {
        WirePayload::decode(self.r#type, &self.payload)
    }

    /// Build an envelope from a typed protocol payload.
    pub fn from_typed(req_id: u32, flags: u16, payload: &WirePayload) -> anyhow::Result<Self> {
        Ok(Self {
            r#type: u16::from(payload.msg_type()),
            req_id,
            flags,
            payload: payload.encode()?,
        })
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Request blob data, carrying the offered price.
    BlobRequest = 100,
    /// Accept or reject the offered price; on accept, declares the blob length.
    OfferResponse = 101,
    /// One segment of blob content; end-of-blob is implicit at declared length.
    DataChunk = 102,
}

impl MsgType {
    /// Stable `u16` registry for protocol envelope types.
    pub const ALL: [Self; 3] = [Self::BlobRequest, Self::OfferResponse, Self::DataChunk];
}

impl From<MsgType> for u16 {
    fn from(value: MsgType) -> Self {
        value as u16
    }
}

impl TryFrom<u16> for MsgType {
    type Error = anyhow::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(Self::BlobRequest),
            101 => Ok(Self::OfferResponse),
            102 => Ok(Self::DataChunk),
            _ => anyhow::bail!("unknown message type {value}"),
        }
    }
}

/// Blob data request.  Wire format: `{0: blob_hash, 1: offered_rate}`.
///
/// `offered_rate` is in millicredits per KiB; the free strategy always
/// offers 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRequest {
    pub blob_hash: [u8; 32],
    pub offered_rate: u64,
}

impl Serialize for BlobRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ciborium::Value::Map(vec![
            int_cbor::kv_bytes(0, &self.blob_hash),
            int_cbor::kv_u64(1, self.offered_rate),
        ])
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlobRequest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let val = ciborium::Value::deserialize(deserializer)?;
        let map = int_cbor::into_map(val).map_err(serde::de::Error::custom)?;
        Ok(BlobRequest {
            blob_hash: int_cbor::extract_byte_array(&map, 0, "blob_hash")
                .map_err(serde::de::Error::custom)?,
            offered_rate: int_cbor::extract_u64(&map, 1, "offered_rate")
                .map_err(serde::de::Error::custom)?,
        })
    }
}

/// Negotiation reply to a `BlobRequest`.  `blob_len` is meaningful only
/// when `accepted` is true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfferResponse {
    pub accepted: bool,
    pub rate: u64,
    pub blob_len: u64,
}

/// One segment of blob content.  Wire format: `{0: blob_hash, 1: offset, 2: bytes}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub blob_hash: [u8; 32],
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl Serialize for DataChunk {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ciborium::Value::Map(vec![
            int_cbor::kv_bytes(0, &self.blob_hash),
            int_cbor::kv_u64(1, self.offset),
            int_cbor::kv_bytes(2, &self.bytes),
        ])
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataChunk {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let val = ciborium::Value::deserialize(deserializer)?;
        let map = int_cbor::into_map(val).map_err(serde::de::Error::custom)?;
        Ok(DataChunk {
            blob_hash: int_cbor::extract_byte_array(&map, 0, "blob_hash")
                .map_err(serde::de::Error::custom)?,
            offset: int_cbor::extract_u64(&map, 1, "offset").map_err(serde::de::Error::custom)?,
            bytes: int_cbor::extract_bytes(&map, 2, "bytes").map_err(serde::de::Error::custom)?,
        })
    }
}

/// Typed envelope payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WirePayload {
    BlobRequest(BlobRequest),
    OfferResponse(OfferResponse),
    DataChunk(DataChunk),
}

impl WirePayload {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::BlobRequest(_) => MsgType::BlobRequest,
            Self::OfferResponse(_) => MsgType::OfferResponse,
            Self::DataChunk(_) => MsgType::DataChunk,
        }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(match self {
            Self::BlobRequest(msg) => crate::cbor::to_vec(msg)?,
            Self::OfferResponse(msg) => crate::cbor::to_vec(msg)?,
            Self::DataChunk(msg) => crate::cbor::to_vec(msg)?,
        })
    }

    pub fn decode(message_type: u16, payload: &[u8]) -> anyhow::Result<Self> {
        let msg_type = MsgType::try_from(message_type)?;
        Ok(match msg_type {
            MsgType::BlobRequest => Self::BlobRequest(crate::cbor::from_slice(payload)?),
            MsgType::OfferResponse => Self::OfferResponse(crate::cbor::from_slice(payload)?),
            MsgType::DataChunk => Self::DataChunk(crate::cbor::from_slice(payload)?),
        })
    }
}

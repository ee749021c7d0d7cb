// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::fmt;

/// Content address of a blob: the BLAKE3 hash of its bytes.
///
/// Two blobs with equal hashes contain byte-identical content once
/// verified; the hash is the blob's sole identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobHash(pub [u8; 32]);

impl BlobHash {
    pub fn from_content(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Parse a 64-character hex string, the CLI boundary format.
    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("blob hash must be exactly 32 bytes of hex"))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix keeps log lines readable.
        write!(f, "BlobHash({}..)", &self.to_hex()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_hash_is_stable() {
        let a = BlobHash::from_content(b"blobgrab");
        let b = BlobHash::from_content(b"blobgrab");
        assert_eq!(a, b);
    }

    #[test]
    fn hex_roundtrip() {
        let hash = BlobHash::from_content(b"payload");
        let parsed = BlobHash::from_hex(&hash.to_hex()).expect("parse hex");
        assert_eq!(parsed, hash);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(BlobHash::from_hex("abcd").is_err());
        assert!(BlobHash::from_hex("zz").is_err());
    }
}

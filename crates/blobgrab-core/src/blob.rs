// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//! Blob lifecycle: created unverified, mutated as bytes arrive, verified
//! exactly once when the received content hashes to its address.

use crate::{error::DownloadError, ids::BlobHash, store::BlobStore};

/// A content-addressed data unit being assembled from the wire.
///
/// The pending buffer is exclusively owned by whichever requester is
/// streaming into it; once verified the content is read-only and the
/// blob never un-verifies.
#[derive(Debug)]
pub struct Blob {
    hash: BlobHash,
    expected_len: Option<u64>,
    pending: Vec<u8>,
    verified: bool,
}

impl Blob {
    pub fn new(hash: BlobHash) -> Self {
        Self {
            hash,
            expected_len: None,
            pending: Vec::new(),
            verified: false,
        }
    }

    /// A blob already known verified, e.g. found in the store before the
    /// session starts.
    pub fn verified(hash: BlobHash, content: Vec<u8>) -> Self {
        Self {
            hash,
            expected_len: Some(content.len() as u64),
            pending: content,
            verified: true,
        }
    }

    pub fn hash(&self) -> BlobHash {
        self.hash
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn needs_download(&self) -> bool {
        !self.verified
    }

    pub fn expected_len(&self) -> Option<u64> {
        self.expected_len
    }

    pub fn received_len(&self) -> u64 {
        self.pending.len() as u64
    }

    /// Verified content, `None` while still streaming.
    pub fn content(&self) -> Option<&[u8]> {
        self.verified.then_some(self.pending.as_slice())
    }

    /// Record the declared length from an accepted offer. Restarting a
    /// stream after a discarded attempt resets the buffer.
    pub fn begin_stream(&mut self, expected_len: u64) -> anyhow::Result<()> {
        if self.verified {
            anyhow::bail!("blob {} is already verified", self.hash);
        }
        self.expected_len = Some(expected_len);
        self.pending.clear();
        Ok(())
    }

    /// Append streamed bytes. Rejects writes past the declared length or
    /// after verification.
    pub fn append(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        if self.verified {
            anyhow::bail!("blob {} is already verified", self.hash);
        }
        let Some(expected) = self.expected_len else {
            anyhow::bail!("blob {} has no declared length", self.hash);
        };
        let new_len = self.pending.len() as u64 + bytes.len() as u64;
        if new_len > expected {
            anyhow::bail!(
                "blob {} overflows declared length: {} > {}",
                self.hash,
                new_len,
                expected
            );
        }
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    /// True once the declared length has been received in full.
    pub fn stream_complete(&self) -> bool {
        matches!(self.expected_len, Some(expected) if self.pending.len() as u64 == expected)
    }

    /// Verify the assembled content through the store and commit it.
    ///
    /// On a hash mismatch the partial content is discarded, the blob
    /// stays unverified and remains eligible for another attempt.
    pub fn finalize(&mut self, store: &dyn BlobStore) -> Result<(), DownloadError> {
        if self.verified {
            return Ok(());
        }
        if !self.stream_complete() {
            return Err(DownloadError::Protocol(anyhow::anyhow!(
                "blob {} finalized before declared length was reached",
                self.hash
            )));
        }
        if !store.verify(&self.hash, &self.pending) {
            self.pending.clear();
            self.expected_len = None;
            return Err(DownloadError::VerificationFailed { hash: self.hash });
        }
        store.commit(&self.hash, &self.pending)?;
        self.verified = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn streams_to_verified_exactly_once() {
        let store = MemoryStore::new();
        let content = b"hello blob".to_vec();
        let mut blob = Blob::new(BlobHash::from_content(&content));

        assert!(blob.needs_download());
        blob.begin_stream(content.len() as u64).expect("begin");
        blob.append(&content[..5]).expect("append");
        assert!(!blob.stream_complete());
        blob.append(&content[5..]).expect("append");
        assert!(blob.stream_complete());

        blob.finalize(&store).expect("finalize");
        assert!(blob.is_verified());
        assert_eq!(blob.content(), Some(content.as_slice()));
        assert!(store.contains(&blob.hash()));

        // Idempotent once verified; never un-verifies.
        blob.finalize(&store).expect("finalize again");
        assert!(blob.is_verified());
    }

    #[test]
    fn corrupt_content_is_discarded() {
        let store = MemoryStore::new();
        let content = b"expected content".to_vec();
        let mut blob = Blob::new(BlobHash::from_content(&content));

        blob.begin_stream(content.len() as u64).expect("begin");
        blob.append(b"unexpected conte").expect("append");
        let err = blob.finalize(&store).expect_err("must fail verification");
        assert!(matches!(err, DownloadError::VerificationFailed { .. }));

        assert!(!blob.is_verified());
        assert_eq!(blob.received_len(), 0);
        assert!(!store.contains(&blob.hash()));

        // Still eligible for a fresh attempt.
        blob.begin_stream(content.len() as u64).expect("restart");
        blob.append(&content).expect("append");
        blob.finalize(&store).expect("finalize");
        assert!(blob.is_verified());
    }

    #[test]
    fn append_rejects_overflow_and_missing_length() {
        let mut blob = Blob::new(BlobHash::from_content(b"x"));
        assert!(blob.append(b"x").is_err());

        blob.begin_stream(2).expect("begin");
        assert!(blob.append(b"abc").is_err());
    }

    #[test]
    fn verified_blob_rejects_mutation() {
        let store = MemoryStore::new();
        let content = b"done".to_vec();
        let mut blob = Blob::verified(BlobHash::from_content(&content), content);
        assert!(blob.begin_stream(4).is_err());
        assert!(blob.append(b"more").is_err());
        blob.finalize(&store).expect("no-op finalize");
    }

    #[test]
    fn empty_blob_verifies() {
        let store = MemoryStore::new();
        let mut blob = Blob::new(BlobHash::from_content(b""));
        blob.begin_stream(0).expect("begin");
        assert!(blob.stream_complete());
        blob.finalize(&store).expect("finalize");
        assert!(blob.is_verified());
    }
}

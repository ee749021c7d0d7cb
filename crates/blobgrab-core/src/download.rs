// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//! Session-level tracking of which blobs are still needed.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use tracing::info;

use crate::{blob::Blob, ids::BlobHash};

/// Final disposition of a download session, delivered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Failed,
    Aborted,
}

/// Notified exactly once per blob, exactly when verification succeeds.
pub trait BlobCompletionSink: Send + Sync {
    fn blob_completed(&self, hash: &BlobHash);
}

/// Completion sink that just reports through the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl BlobCompletionSink for LogSink {
    fn blob_completed(&self, hash: &BlobHash) {
        info!(blob = %hash, "blob downloaded and verified");
    }
}

/// Tracks the blobs a session wants, which are claimed by a streaming
/// requester, and which have completed.
///
/// `needed_blobs` never returns a blob claimed by another requester, so
/// no two requesters can stream into the same blob.
pub struct DownloadSession {
    blobs: Vec<Blob>,
    claimed: HashSet<BlobHash>,
    completed: HashSet<BlobHash>,
    sink: Arc<dyn BlobCompletionSink>,
}

impl DownloadSession {
    pub fn new(sink: Arc<dyn BlobCompletionSink>) -> Self {
        Self {
            blobs: Vec::new(),
            claimed: HashSet::new(),
            completed: HashSet::new(),
            sink,
        }
    }

    /// Session tracking exactly one blob, the common case for this client.
    pub fn single(blob: Blob, sink: Arc<dyn BlobCompletionSink>) -> Self {
        let mut session = Self::new(sink);
        session.add_blob(blob);
        session
    }

    /// Track another blob. Duplicate hashes are ignored.
    pub fn add_blob(&mut self, blob: Blob) {
        if self.blobs.iter().any(|b| b.hash() == blob.hash()) {
            return;
        }
        self.blobs.push(blob);
    }

    /// Unverified, unclaimed blobs in insertion order.
    pub fn needed_blobs(&self) -> Vec<BlobHash> {
        self.blobs
            .iter()
            .filter(|b| b.needs_download() && !self.claimed.contains(&b.hash()))
            .map(|b| b.hash())
            .collect()
    }

    /// Take exclusive streaming access to a blob.  Fails if the blob is
    /// unknown, already verified, or claimed by another requester.
    pub fn claim(&mut self, hash: &BlobHash) -> Option<&mut Blob> {
        if self.claimed.contains(hash) {
            return None;
        }
        let blob = self
            .blobs
            .iter_mut()
            .find(|b| b.hash() == *hash && b.needs_download())?;
        self.claimed.insert(*hash);
        Some(blob)
    }

    /// Release a claim without completing, e.g. after a rejected offer.
    pub fn release(&mut self, hash: &BlobHash) {
        self.claimed.remove(hash);
    }

    pub fn blob_mut(&mut self, hash: &BlobHash) -> Option<&mut Blob> {
        self.blobs.iter_mut().find(|b| b.hash() == *hash)
    }

    pub fn blob(&self, hash: &BlobHash) -> Option<&Blob> {
        self.blobs.iter().find(|b| b.hash() == *hash)
    }

    /// Mark a verified blob complete and notify the sink.  Guards the
    /// exactly-once contract: a second call for the same hash is an error.
    pub fn blob_completed(&mut self, hash: &BlobHash) -> anyhow::Result<()> {
        let blob = self
            .blobs
            .iter()
            .find(|b| b.hash() == *hash)
            .ok_or_else(|| anyhow::anyhow!("unknown blob {hash}"))?;
        if !blob.is_verified() {
            anyhow::bail!("blob {hash} completed before verification");
        }
        if !self.completed.insert(*hash) {
            anyhow::bail!("blob {hash} completed twice");
        }
        self.claimed.remove(hash);
        self.sink.blob_completed(hash);
        Ok(())
    }

    /// True when no unverified blobs remain.
    pub fn is_complete(&self) -> bool {
        self.blobs.iter().all(|b| b.is_verified())
    }
}

/// Shared session handle used across the requester and connection manager.
pub type SharedSession = Arc<Mutex<DownloadSession>>;

pub fn shared(session: DownloadSession) -> SharedSession {
    Arc::new(Mutex::new(session))
}

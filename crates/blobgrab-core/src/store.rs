// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//! Blob storage collaborators.
//!
//! The store is the sole authority on hash verification: the download
//! core never compares hashes itself, it hands received content to
//! `verify` and commits only what the store accepted.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::ids::BlobHash;

pub trait BlobStore: Send + Sync {
    /// Byte-exact content check against the blob's declared hash.
    fn verify(&self, hash: &BlobHash, content: &[u8]) -> bool {
        BlobHash::from_content(content) == *hash
    }

    /// Persist verified content under its hash. Committing the same
    /// hash twice is a no-op (content is immutable once verified).
    fn commit(&self, hash: &BlobHash, content: &[u8]) -> anyhow::Result<()>;

    /// Read back a committed blob, `None` if never committed.
    fn read(&self, hash: &BlobHash) -> anyhow::Result<Option<Vec<u8>>>;

    fn contains(&self, hash: &BlobHash) -> bool;
}

/// In-memory store used by tests and scratch sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<BlobHash, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryStore {
    fn commit(&self, hash: &BlobHash, content: &[u8]) -> anyhow::Result<()> {
        self.blobs
            .lock()
            .expect("store lock poisoned")
            .entry(*hash)
            .or_insert_with(|| content.to_vec());
        Ok(())
    }

    fn read(&self, hash: &BlobHash) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .expect("store lock poisoned")
            .get(hash)
            .cloned())
    }

    fn contains(&self, hash: &BlobHash) -> bool {
        self.blobs
            .lock()
            .expect("store lock poisoned")
            .contains_key(hash)
    }
}

/// Directory-backed store: one file per blob, named by its hex hash.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn blob_path(&self, hash: &BlobHash) -> PathBuf {
        self.root.join(hash.to_hex())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for DiskStore {
    fn commit(&self, hash: &BlobHash, content: &[u8]) -> anyhow::Result<()> {
        let path = self.blob_path(hash);
        if path.exists() {
            return Ok(());
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn read(&self, hash: &BlobHash) -> anyhow::Result<Option<Vec<u8>>> {
        match std::fs::read(self.blob_path(hash)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, hash: &BlobHash) -> bool {
        self.blob_path(hash).exists()
    }
}

// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::{path::PathBuf, sync::Arc, time::Duration};

use blobgrab_core::{
    shared, Blob, BlobHash, BlobStore, ConnectionManager, DiskStore, DownloadSession, FreeStrategy,
    LogSink, NoPaymentRateManager, NoopRateLimiter, Peer, SessionOutcome, SingleBlobRequester,
    TcpConnector,
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blobgrab")]
#[command(about = "Download a single blob from a peer and verify its hash")]
struct Cli {
    /// Peer address as host or host:port.
    peer: String,

    /// Hex hash of the blob to download.
    blob_hash: String,

    /// Port used when the peer address does not carry one.
    #[arg(long, default_value_t = 3333)]
    port: u16,

    /// Directory for downloaded blobs. Defaults to a temporary directory
    /// that is removed on exit.
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("blobgrab=debug,info")),
        )
        .init();

    let cli = Cli::parse();
    let peer = Peer::parse(&cli.peer, cli.port)?;
    let hash = BlobHash::from_hex(&cli.blob_hash)?;

    // A temp dir must outlive the session, so the guard stays in main.
    let mut tmp_guard = None;
    let root = match cli.directory {
        Some(dir) => dir,
        None => {
            let tmp = tempfile::tempdir()?;
            let path = tmp.path().to_path_buf();
            tmp_guard = Some(tmp);
            path
        }
    };
    let store = Arc::new(DiskStore::new(root)?);

    let blob = match store.read(&hash)? {
        Some(content) => {
            info!(blob = %hash, "blob already present in store");
            Blob::verified(hash, content)
        }
        None => Blob::new(hash),
    };

    let session = shared(DownloadSession::single(blob, Arc::new(LogSink)));
    let requester = Arc::new(SingleBlobRequester::new(
        peer,
        session.clone(),
        store.clone(),
        Arc::new(NoPaymentRateManager::new()),
        Arc::new(FreeStrategy),
        Arc::new(NoopRateLimiter::new()),
        Duration::from_secs(cli.timeout),
    ));
    let manager = ConnectionManager::new(Arc::new(TcpConnector::default()), requester, session);

    info!(%peer, blob = %hash, "starting download");
    let outcome = manager
        .start()
        .await
        .unwrap_or(SessionOutcome::Aborted);

    match outcome {
        SessionOutcome::Completed => {
            if tmp_guard.is_some() {
                println!("downloaded and verified {hash}");
            } else {
                println!("downloaded {} to {}", hash, store.blob_path(&hash).display());
            }
            Ok(())
        }
        SessionOutcome::Failed => {
            error!(blob = %hash, "download failed");
            std::process::exit(1);
        }
        SessionOutcome::Aborted => {
            error!(blob = %hash, "download aborted");
            std::process::exit(1);
        }
    }
}

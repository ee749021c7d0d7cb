// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//! Drives connections for a download session until it completes or runs
//! out of peers, then reports the outcome exactly once.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    download::{SessionOutcome, SharedSession},
    error::DownloadError,
    peer::Peer,
    requester::{RequestCreator, RequestOutcome},
    transport::Connector,
};

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    requester: Arc<dyn RequestCreator>,
    session: SharedSession,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        requester: Arc<dyn RequestCreator>,
        session: SharedSession,
    ) -> Self {
        Self {
            connector,
            requester,
            session,
        }
    }

    fn session_complete(&self) -> bool {
        self.session.lock().expect("session lock poisoned").is_complete()
    }

    /// Outcome is a pure function of session state at teardown.
    fn outcome(&self) -> SessionOutcome {
        if self.session_complete() {
            SessionOutcome::Completed
        } else {
            SessionOutcome::Failed
        }
    }

    /// One connection's whole life: dial, then issue requests until the
    /// requester runs out of work or an error tears the connection down.
    async fn run_connection(&self, peer: &Peer) -> Result<(), DownloadError> {
        let mut conn = self
            .connector
            .connect(peer)
            .await
            .map_err(|err| DownloadError::ConnectionFailed {
                peer: *peer,
                reason: err.to_string(),
            })?;
        debug!(%peer, "connected");

        loop {
            match self.requester.send_next_request(peer, &mut conn).await? {
                RequestOutcome::Sent => continue,
                RequestOutcome::NoMoreWork => return Ok(()),
            }
        }
    }

    /// Run the session to its final outcome.
    ///
    /// A session with nothing left to download never dials.
    pub async fn run(&self) -> SessionOutcome {
        loop {
            if self.session_complete() {
                info!("session complete");
                return SessionOutcome::Completed;
            }

            let peers = self.requester.get_new_peers().await;
            if peers.is_empty() {
                let outcome = self.outcome();
                info!(?outcome, "no peers left to try");
                return outcome;
            }

            for peer in peers {
                if self.session_complete() {
                    break;
                }
                if let Err(err) = self.run_connection(&peer).await {
                    warn!(%peer, %err, "connection abandoned");
                }
            }
        }
    }

    /// Spawn the session onto the runtime.  The receiver resolves exactly
    /// once with the outcome; if the driving task dies before reporting,
    /// the receiver errors and the caller should treat the session as
    /// aborted.
    pub fn start(self) -> oneshot::Receiver<SessionOutcome> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.run().await;
            let _ = tx.send(outcome);
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::io::DuplexStream;

    use super::*;
    use crate::{
        blob::Blob,
        download::{shared, DownloadSession, LogSink},
        ids::BlobHash,
        payment::{FreeStrategy, NoPaymentRateManager},
        rate_limiter::NoopRateLimiter,
        requester::SingleBlobRequester,
        store::{BlobStore, MemoryStore},
        transport::{read_envelope, write_envelope, BoxedStream},
        wire::{DataChunk, Envelope, OfferResponse, WirePayload, FLAG_RESPONSE},
    };

    /// Hands out one scripted in-memory stream per dial and counts dials.
    struct MockConnector<F> {
        serve: F,
        dials: AtomicUsize,
    }

    impl<F> MockConnector<F> {
        fn new(serve: F) -> Self {
            Self {
                serve,
                dials: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl<F> Connector for MockConnector<F>
    where
        F: Fn(DuplexStream) + Send + Sync,
    {
        async fn connect(&self, _peer: &Peer) -> anyhow::Result<BoxedStream> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(64 * 1024);
            (self.serve)(server);
            Ok(Box::new(client))
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self, peer: &Peer) -> anyhow::Result<BoxedStream> {
            anyhow::bail!("connection refused by {peer}")
        }
    }

    fn test_peer() -> Peer {
        Peer::parse("10.0.0.1:3333", 3333).expect("parse")
    }

    /// Scripted peer serving exactly the given content for one request.
    async fn serve_blob(mut io: DuplexStream, accept: bool, served: Vec<u8>) {
        let request = read_envelope(&mut io).await.expect("read request");
        let WirePayload::BlobRequest(blob_request) =
            request.decode_typed().expect("typed request")
        else {
            panic!("unexpected request type");
        };

        let response = Envelope::from_typed(
            request.req_id,
            FLAG_RESPONSE,
            &WirePayload::OfferResponse(OfferResponse {
                accepted: accept,
                rate: blob_request.offered_rate,
                blob_len: if accept { served.len() as u64 } else { 0 },
            }),
        )
        .expect("build response");
        write_envelope(&mut io, &response)
            .await
            .expect("write response");
        if !accept {
            return;
        }

        let mut offset = 0u64;
        for chunk in served.chunks(4096) {
            let envelope = Envelope::from_typed(
                request.req_id,
                FLAG_RESPONSE,
                &WirePayload::DataChunk(DataChunk {
                    blob_hash: blob_request.blob_hash,
                    offset,
                    bytes: chunk.to_vec(),
                }),
            )
            .expect("build chunk");
            write_envelope(&mut io, &envelope)
                .await
                .expect("write chunk");
            offset += chunk.len() as u64;
        }
    }

    struct Harness {
        manager: ConnectionManager,
        session: SharedSession,
        store: Arc<MemoryStore>,
    }

    fn harness(blob: Blob, connector: Arc<dyn Connector>) -> Harness {
        let session = shared(DownloadSession::single(blob, Arc::new(LogSink)));
        let store = Arc::new(MemoryStore::new());
        let requester = Arc::new(SingleBlobRequester::new(
            test_peer(),
            session.clone(),
            store.clone(),
            Arc::new(NoPaymentRateManager::new()),
            Arc::new(FreeStrategy),
            Arc::new(NoopRateLimiter::new()),
            Duration::from_millis(500),
        ));
        Harness {
            manager: ConnectionManager::new(connector, requester, session.clone()),
            session,
            store,
        }
    }

    #[tokio::test]
    async fn downloads_blob_end_to_end() {
        let content = vec![7u8; 20_000];
        let hash = BlobHash::from_content(&content);
        let connector = Arc::new(MockConnector::new({
            let content = content.clone();
            move |server| {
                tokio::spawn(serve_blob(server, true, content.clone()));
            }
        }));

        let hx = harness(Blob::new(hash), connector.clone());
        let outcome = hx.manager.run().await;

        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(hx.store.read(&hash).expect("read"), Some(content));
        assert!(hx.session.lock().expect("lock").is_complete());
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn complete_session_never_dials() {
        let content = b"already here".to_vec();
        let hash = BlobHash::from_content(&content);
        let connector = Arc::new(MockConnector::new(|_server: DuplexStream| {
            panic!("no connection expected");
        }));

        let hx = harness(Blob::verified(hash, content), connector.clone());
        let outcome = hx.manager.run().await;

        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(connector.dials.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_offer_ends_in_failure() {
        let content = b"too expensive".to_vec();
        let hash = BlobHash::from_content(&content);
        let connector = Arc::new(MockConnector::new({
            let content = content.clone();
            move |server| {
                tokio::spawn(serve_blob(server, false, content.clone()));
            }
        }));

        let hx = harness(Blob::new(hash), connector);
        let outcome = hx.manager.run().await;

        assert_eq!(outcome, SessionOutcome::Failed);
        assert!(!hx.store.contains(&hash));
    }

    #[tokio::test]
    async fn corrupt_stream_ends_in_failure() {
        let content = b"genuine content".to_vec();
        let hash = BlobHash::from_content(&content);
        let bogus = vec![0u8; content.len()];
        let connector = Arc::new(MockConnector::new(move |server| {
            tokio::spawn(serve_blob(server, true, bogus.clone()));
        }));

        let hx = harness(Blob::new(hash), connector);
        let outcome = hx.manager.run().await;

        assert_eq!(outcome, SessionOutcome::Failed);
        assert!(!hx.store.contains(&hash));
        assert!(!hx.session.lock().expect("lock").is_complete());
    }

    #[tokio::test]
    async fn unreachable_peer_ends_in_failure() {
        let hash = BlobHash::from_content(b"unreachable");
        let hx = harness(Blob::new(hash), Arc::new(FailingConnector));
        let outcome = hx.manager.run().await;
        assert_eq!(outcome, SessionOutcome::Failed);
    }

    #[tokio::test]
    async fn silent_peer_times_out_into_failure() {
        // Connects fine, then never responds to the request.
        let connector = Arc::new(MockConnector::new(|server: DuplexStream| {
            tokio::spawn(async move {
                let _held_open = server;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }));

        let hx = harness(Blob::new(BlobHash::from_content(b"slow")), connector);
        let outcome = hx.manager.run().await;
        assert_eq!(outcome, SessionOutcome::Failed);
    }

    #[tokio::test]
    async fn start_reports_outcome_through_channel() {
        let content = b"channel delivery".to_vec();
        let hash = BlobHash::from_content(&content);
        let connector = Arc::new(MockConnector::new({
            let content = content.clone();
            move |server| {
                tokio::spawn(serve_blob(server, true, content.clone()));
            }
        }));

        let hx = harness(Blob::new(hash), connector);
        let rx = hx.manager.start();
        let outcome = rx.await.expect("outcome delivered");
        assert_eq!(outcome, SessionOutcome::Completed);
    }
}

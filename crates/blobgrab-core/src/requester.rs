// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//! The protocol state machine driving one blob request to completion.
//!
//! A request cycle is: pick the next needed blob, offer a rate, handle
//! the peer's accept/reject, run the pay step, stream chunks, verify.
//! Offer rejections, failed verification and refused payments stay
//! inside the requester (the peer/blob pair is given up); connection
//! and timeout errors escalate to the connection manager.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    download::SharedSession,
    error::DownloadError,
    ids::BlobHash,
    payment::{Offer, OfferReply, PayStrategy, PaymentRateManager},
    peer::Peer,
    rate_limiter::{Direction, RateLimiter},
    store::BlobStore,
    transport::{self, BoxedStream},
    wire::{BlobRequest, Envelope, WirePayload, MAX_BLOB_BYTES},
};

/// How often a throttled I/O re-consults the rate limiter.
const THROTTLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A request was driven to completion; call again for more work.
    Sent,
    /// Nothing left to request on this connection.
    NoMoreWork,
}

/// The interface the connection manager drives.  Distinct concrete
/// requesters (free, metered) differ only in the injected pay strategy.
#[async_trait]
pub trait RequestCreator: Send + Sync {
    /// Candidate peers not yet attempted this session.  Exhaustion is
    /// idempotent, not an error.
    async fn get_new_peers(&self) -> Vec<Peer>;

    /// Drive the next request on an open connection.
    async fn send_next_request(
        &self,
        peer: &Peer,
        conn: &mut BoxedStream,
    ) -> Result<RequestOutcome, DownloadError>;
}

/// Requester scoped to a single fixed peer for its whole life.
pub struct SingleBlobRequester {
    peer: Peer,
    session: SharedSession,
    store: Arc<dyn BlobStore>,
    rates: Arc<dyn PaymentRateManager>,
    strategy: Arc<dyn PayStrategy>,
    limiter: Arc<dyn RateLimiter>,
    request_timeout: Duration,
    peer_offered: AtomicBool,
    given_up: Mutex<HashSet<BlobHash>>,
    next_req_id: AtomicU32,
}

impl SingleBlobRequester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer: Peer,
        session: SharedSession,
        store: Arc<dyn BlobStore>,
        rates: Arc<dyn PaymentRateManager>,
        strategy: Arc<dyn PayStrategy>,
        limiter: Arc<dyn RateLimiter>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            peer,
            session,
            store,
            rates,
            strategy,
            limiter,
            request_timeout,
            peer_offered: AtomicBool::new(false),
            given_up: Mutex::new(HashSet::new()),
            next_req_id: AtomicU32::new(1),
        }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// First needed blob this requester has not given up on.
    fn next_needed_blob(&self) -> Option<BlobHash> {
        let given_up = self.given_up.lock().expect("given-up lock poisoned");
        self.session
            .lock()
            .expect("session lock poisoned")
            .needed_blobs()
            .into_iter()
            .find(|hash| !given_up.contains(hash))
    }

    fn give_up(&self, hash: BlobHash) {
        self.given_up
            .lock()
            .expect("given-up lock poisoned")
            .insert(hash);
    }

    fn release_claim(&self, hash: &BlobHash) {
        self.session
            .lock()
            .expect("session lock poisoned")
            .release(hash);
    }

    /// Sleep until the limiter admits an I/O of `byte_count` bytes.
    async fn admit(&self, direction: Direction, byte_count: usize) {
        while self.limiter.should_throttle(direction, byte_count) {
            tokio::time::sleep(THROTTLE_POLL).await;
        }
    }

    async fn send(
        &self,
        conn: &mut BoxedStream,
        envelope: &Envelope,
    ) -> Result<(), DownloadError> {
        let byte_count = envelope.payload.len();
        self.admit(Direction::Write, byte_count).await;
        tokio::time::timeout(
            self.request_timeout,
            transport::write_envelope(conn, envelope),
        )
        .await
        .map_err(|_| DownloadError::Timeout {
            operation: "request send",
            timeout: self.request_timeout,
        })??;
        self.limiter.record(Direction::Write, byte_count);
        Ok(())
    }

    async fn recv(
        &self,
        conn: &mut BoxedStream,
        operation: &'static str,
    ) -> Result<Envelope, DownloadError> {
        // Frame size is unknown until the prefix arrives; the limiter is
        // consulted for admission and recorded with the actual size.
        self.admit(Direction::Read, 0).await;
        let envelope = tokio::time::timeout(self.request_timeout, transport::read_envelope(conn))
            .await
            .map_err(|_| DownloadError::Timeout {
                operation,
                timeout: self.request_timeout,
            })??;
        self.limiter.record(Direction::Read, envelope.payload.len());
        Ok(envelope)
    }

    /// One full negotiation + streaming cycle for `offer.blob_hash`.
    async fn negotiate_and_stream(
        &self,
        peer: &Peer,
        conn: &mut BoxedStream,
        offer: Offer,
    ) -> Result<(), DownloadError> {
        let hash = offer.blob_hash;
        let req_id = self.next_req_id.fetch_add(1, Ordering::SeqCst);

        let request = Envelope::from_typed(
            req_id,
            0,
            &WirePayload::BlobRequest(BlobRequest {
                blob_hash: hash.0,
                offered_rate: offer.rate,
            }),
        )?;
        self.rates.record_offer_sent(peer, offer);
        debug!(%peer, blob = %hash, rate = offer.rate, "sending blob request");
        self.send(conn, &request).await?;

        let response = self.recv(conn, "offer response").await?;
        if let Err(err) = transport::ensure_not_error(&response) {
            self.rates.record_offer_reply(peer, OfferReply::Rejected);
            return Err(err.into());
        }
        if response.req_id != req_id {
            return Err(DownloadError::Protocol(anyhow::anyhow!(
                "offer response req_id mismatch: got {}, expected {}",
                response.req_id,
                req_id
            )));
        }
        let WirePayload::OfferResponse(offer_response) = response.decode_typed()? else {
            return Err(DownloadError::Protocol(anyhow::anyhow!(
                "unexpected response type for blob request"
            )));
        };

        let reply = if offer_response.accepted {
            OfferReply::Accepted
        } else {
            OfferReply::Rejected
        };
        self.rates.record_offer_reply(peer, reply);

        if !offer_response.accepted {
            return Err(DownloadError::OfferRejected {
                rate: offer_response.rate,
            });
        }
        if offer_response.blob_len > MAX_BLOB_BYTES {
            return Err(DownloadError::Protocol(anyhow::anyhow!(
                "declared blob length {} exceeds cap",
                offer_response.blob_len
            )));
        }

        // Pay before any data flows; a refused payment aborts the blob
        // for this peer, exactly like a rejected offer.
        self.strategy
            .pay_peer(peer, &offer, offer_response.blob_len)
            .await?;

        {
            let mut session = self.session.lock().expect("session lock poisoned");
            let blob = session
                .blob_mut(&hash)
                .ok_or_else(|| anyhow::anyhow!("blob {hash} vanished from session"))?;
            blob.begin_stream(offer_response.blob_len)?;
        }

        loop {
            {
                let session = self.session.lock().expect("session lock poisoned");
                let blob = session
                    .blob(&hash)
                    .ok_or_else(|| anyhow::anyhow!("blob {hash} vanished from session"))?;
                if blob.stream_complete() {
                    break;
                }
            }

            let envelope = self.recv(conn, "data chunk").await?;
            transport::ensure_not_error(&envelope)?;
            if envelope.req_id != req_id {
                return Err(DownloadError::Protocol(anyhow::anyhow!(
                    "data chunk req_id mismatch: got {}, expected {}",
                    envelope.req_id,
                    req_id
                )));
            }
            let WirePayload::DataChunk(chunk) = envelope.decode_typed()? else {
                return Err(DownloadError::Protocol(anyhow::anyhow!(
                    "unexpected response type while streaming blob data"
                )));
            };
            if chunk.blob_hash != hash.0 {
                return Err(DownloadError::Protocol(anyhow::anyhow!(
                    "data chunk for wrong blob"
                )));
            }
            // Every chunk must advance the stream; the declared length is
            // the only end-of-blob signal, so zero-byte chunks could hold
            // the connection open forever.
            if chunk.bytes.is_empty() {
                return Err(DownloadError::Protocol(anyhow::anyhow!(
                    "empty data chunk while blob incomplete"
                )));
            }

            let mut session = self.session.lock().expect("session lock poisoned");
            let blob = session
                .blob_mut(&hash)
                .ok_or_else(|| anyhow::anyhow!("blob {hash} vanished from session"))?;
            if chunk.offset != blob.received_len() {
                return Err(DownloadError::Protocol(anyhow::anyhow!(
                    "data chunk out of order: offset {}, expected {}",
                    chunk.offset,
                    blob.received_len()
                )));
            }
            blob.append(&chunk.bytes)?;
        }

        let mut session = self.session.lock().expect("session lock poisoned");
        let blob = session
            .blob_mut(&hash)
            .ok_or_else(|| anyhow::anyhow!("blob {hash} vanished from session"))?;
        blob.finalize(self.store.as_ref())?;
        Ok(())
    }
}

#[async_trait]
impl RequestCreator for SingleBlobRequester {
    async fn get_new_peers(&self) -> Vec<Peer> {
        if self.peer_offered.swap(true, Ordering::SeqCst) {
            Vec::new()
        } else {
            vec![self.peer]
        }
    }

    async fn send_next_request(
        &self,
        peer: &Peer,
        conn: &mut BoxedStream,
    ) -> Result<RequestOutcome, DownloadError> {
        let Some(hash) = self.next_needed_blob() else {
            return Ok(RequestOutcome::NoMoreWork);
        };
        if self.rates.price_limit_reached(peer) {
            debug!(%peer, "price limit reached, no further requests");
            return Ok(RequestOutcome::NoMoreWork);
        }

        let rate = self.rates.rate_for_blob(peer, &hash);
        let offer = Offer {
            blob_hash: hash,
            rate,
        };

        {
            let mut session = self.session.lock().expect("session lock poisoned");
            if session.claim(&hash).is_none() {
                // Another requester took it between the peek and the claim.
                return Ok(RequestOutcome::NoMoreWork);
            }
        }

        match self.negotiate_and_stream(peer, conn, offer).await {
            Ok(()) => {
                self.session
                    .lock()
                    .expect("session lock poisoned")
                    .blob_completed(&hash)?;
                Ok(RequestOutcome::Sent)
            }
            Err(err) if err.is_recoverable() => {
                warn!(%peer, blob = %hash, %err, "giving up blob for this peer");
                self.give_up(hash);
                self.release_claim(&hash);
                Ok(RequestOutcome::NoMoreWork)
            }
            Err(err) => {
                self.release_claim(&hash);
                Err(err)
            }
        }
    }
}

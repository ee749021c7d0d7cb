// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//! Client for downloading a single content-addressed blob from one peer:
//! dial, negotiate a price, stream chunks, verify the hash, report the
//! session outcome.

pub mod blob;
pub mod cbor;
pub mod connection;
pub mod download;
pub mod error;
pub mod ids;
pub mod payment;
pub mod peer;
pub mod rate_limiter;
pub mod requester;
pub mod store;
pub mod transport;
pub mod wire;

pub use blob::Blob;
pub use connection::ConnectionManager;
pub use download::{
    shared, BlobCompletionSink, DownloadSession, LogSink, SessionOutcome, SharedSession,
};
pub use error::DownloadError;
pub use ids::BlobHash;
pub use payment::{
    FreeStrategy, MeteredStrategy, NoPaymentRateManager, Offer, OfferReply, PayStrategy,
    PaymentOutcome, PaymentRateManager, PaymentReceipt, Wallet,
};
pub use peer::Peer;
pub use rate_limiter::{Direction, NoopRateLimiter, RateLimiter};
pub use requester::{RequestCreator, RequestOutcome, SingleBlobRequester};
pub use store::{BlobStore, DiskStore, MemoryStore};
pub use transport::{
    ensure_not_error, read_envelope, write_envelope, AsyncIo, BoxedStream, Connector, TcpConnector,
};
pub use wire::{
    BlobRequest, DataChunk, Envelope, MsgType, OfferResponse, WirePayload, FLAG_ERROR,
    FLAG_RESPONSE, MAX_BLOB_BYTES, MAX_ENVELOPE_BYTES, MAX_ENVELOPE_PAYLOAD_BYTES,
};

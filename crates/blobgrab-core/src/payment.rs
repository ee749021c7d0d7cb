// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//! Price negotiation policy and the pluggable pay step.
//!
//! Rates are integer millicredits per KiB of blob data; the wallet deals
//! in the same integer unit.  The pay step is a first-class substitution
//! point: the requester holds a `PayStrategy` and never knows whether it
//! is talking to a wallet.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use crate::{error::DownloadError, ids::BlobHash, peer::Peer};

/// A priced proposal for transferring one blob.  Not persisted beyond
/// the negotiation; the outcome is recorded by the rate manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offer {
    pub blob_hash: BlobHash,
    pub rate: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferReply {
    Accepted,
    Rejected,
}

/// Computes the rate to offer per peer and records negotiation outcomes.
///
/// Side effects are confined to the manager's own strategy state; it
/// never touches the network or blob storage.
pub trait PaymentRateManager: Send + Sync {
    /// True if further spending with `peer` should be refused.
    fn price_limit_reached(&self, peer: &Peer) -> bool;

    /// The rate this side is willing to offer for `hash` from `peer`.
    fn rate_for_blob(&self, peer: &Peer, hash: &BlobHash) -> u64;

    /// Track an in-flight offer so the reply can be correlated.
    fn record_offer_sent(&self, peer: &Peer, offer: Offer);

    /// Resolve the pending offer for `peer`; returns it if one was
    /// in flight.
    fn record_offer_reply(&self, peer: &Peer, reply: OfferReply) -> Option<Offer>;
}

/// The no-payment policy: rate 0, no spending limit, bookkeeping only.
#[derive(Debug, Default)]
pub struct NoPaymentRateManager {
    pending_sent_offers: Mutex<HashMap<Peer, Offer>>,
}

impl NoPaymentRateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The offer currently awaiting a reply from `peer`, if any.
    pub fn pending_offer(&self, peer: &Peer) -> Option<Offer> {
        self.pending_sent_offers
            .lock()
            .expect("offer table lock poisoned")
            .get(peer)
            .copied()
    }
}

impl PaymentRateManager for NoPaymentRateManager {
    fn price_limit_reached(&self, _peer: &Peer) -> bool {
        false
    }

    fn rate_for_blob(&self, _peer: &Peer, _hash: &BlobHash) -> u64 {
        0
    }

    fn record_offer_sent(&self, peer: &Peer, offer: Offer) {
        self.pending_sent_offers
            .lock()
            .expect("offer table lock poisoned")
            .insert(*peer, offer);
    }

    fn record_offer_reply(&self, peer: &Peer, _reply: OfferReply) -> Option<Offer> {
        self.pending_sent_offers
            .lock()
            .expect("offer table lock poisoned")
            .remove(peer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub peer: Peer,
    pub amount: u64,
}

/// Payment backend consumed only by the metered strategy.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn get_balance(&self) -> anyhow::Result<u64>;
    async fn send_payment(&self, peer: &Peer, amount: u64) -> anyhow::Result<PaymentReceipt>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub amount_paid: u64,
}

/// The pay step applied after a peer accepts an offer.
#[async_trait]
pub trait PayStrategy: Send + Sync {
    async fn pay_peer(
        &self,
        peer: &Peer,
        offer: &Offer,
        blob_len: u64,
    ) -> Result<PaymentOutcome, DownloadError>;
}

/// Deliberately never pays.  Holds no wallet reference at all, so it
/// cannot query balances or submit transactions.
#[derive(Debug, Default)]
pub struct FreeStrategy;

#[async_trait]
impl PayStrategy for FreeStrategy {
    async fn pay_peer(
        &self,
        _peer: &Peer,
        _offer: &Offer,
        _blob_len: u64,
    ) -> Result<PaymentOutcome, DownloadError> {
        Ok(PaymentOutcome { amount_paid: 0 })
    }
}

/// Pays `rate * ceil(blob_len / 1024)` through the wallet before
/// streaming begins.
pub struct MeteredStrategy {
    wallet: std::sync::Arc<dyn Wallet>,
}

impl MeteredStrategy {
    pub fn new(wallet: std::sync::Arc<dyn Wallet>) -> Self {
        Self { wallet }
    }

    fn amount_due(offer: &Offer, blob_len: u64) -> u64 {
        offer.rate.saturating_mul(blob_len.div_ceil(1024))
    }
}

#[async_trait]
impl PayStrategy for MeteredStrategy {
    async fn pay_peer(
        &self,
        peer: &Peer,
        offer: &Offer,
        blob_len: u64,
    ) -> Result<PaymentOutcome, DownloadError> {
        let required = Self::amount_due(offer, blob_len);
        if required == 0 {
            return Ok(PaymentOutcome { amount_paid: 0 });
        }
        let available = self.wallet.get_balance().await?;
        if available < required {
            return Err(DownloadError::InsufficientFunds {
                required,
                available,
            });
        }
        let receipt = self.wallet.send_payment(peer, required).await?;
        Ok(PaymentOutcome {
            amount_paid: receipt.amount,
        })
    }
}

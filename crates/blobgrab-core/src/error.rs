// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::time::Duration;

use thiserror::Error;

use crate::{ids::BlobHash, peer::Peer};

/// Failure taxonomy for the download core.
///
/// `OfferRejected`, `VerificationFailed` and `InsufficientFunds` are
/// recoverable inside the requester (the peer/blob pair is given up,
/// nothing escalates). `ConnectionFailed`, `Timeout` and `Protocol`
/// escalate to the connection manager, which tears the connection down.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("connection to {peer} failed: {reason}")]
    ConnectionFailed { peer: Peer, reason: String },

    #[error("peer rejected offer at rate {rate}")]
    OfferRejected { rate: u64 },

    #[error("blob {hash} failed hash verification")]
    VerificationFailed { hash: BlobHash },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("wallet balance {available} cannot cover required {required}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error(transparent)]
    Protocol(#[from] anyhow::Error),
}

impl DownloadError {
    /// True when the requester handles this without escalating past
    /// itself; the blob stays eligible for other peers.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::OfferRejected { .. }
                | Self::VerificationFailed { .. }
                | Self::InsufficientFunds { .. }
        )
    }
}

// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//! Length-prefixed envelope framing and the connection primitive.
//!
//! The wire encoding of individual messages lives in [`crate::wire`];
//! this module only moves envelopes across a byte stream and dials peers.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    peer::Peer,
    wire::{Envelope, FLAG_ERROR, MAX_ENVELOPE_BYTES, MAX_ENVELOPE_PAYLOAD_BYTES},
};

pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T> AsyncIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn AsyncIo>;

/// Dials a peer and yields a protocol stream.  Implemented by the real
/// TCP connector and by scripted in-memory connectors in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, peer: &Peer) -> anyhow::Result<BoxedStream>;
}

/// Plain-TCP connector with a bounded dial.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, peer: &Peer) -> anyhow::Result<BoxedStream> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            tokio::net::TcpStream::connect((peer.host, peer.port)),
        )
        .await
        .map_err(|_| anyhow::anyhow!("dial to {peer} timed out"))??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

pub async fn write_envelope<S>(io: &mut S, envelope: &Envelope) -> anyhow::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let encoded = envelope.encode()?;
    if encoded.len() > MAX_ENVELOPE_BYTES {
        anyhow::bail!("envelope exceeds max size");
    }
    write_frame(io, &encoded).await
}

pub async fn read_envelope<S>(io: &mut S) -> anyhow::Result<Envelope>
where
    S: AsyncRead + Unpin,
{
    let encoded = read_frame(io, MAX_ENVELOPE_BYTES).await?;
    Envelope::decode_with_limits(&encoded, MAX_ENVELOPE_BYTES, MAX_ENVELOPE_PAYLOAD_BYTES)
}

/// Surface a peer-signalled protocol error carried in the error flag.
pub fn ensure_not_error(envelope: &Envelope) -> anyhow::Result<()> {
    if envelope.flags & FLAG_ERROR == 0 {
        return Ok(());
    }
    let msg = if envelope.payload.is_empty() {
        "peer returned protocol error".to_string()
    } else if let Ok(text) = String::from_utf8(envelope.payload.clone()) {
        text
    } else {
        format!(
            "peer returned protocol error ({} bytes)",
            envelope.payload.len()
        )
    };
    anyhow::bail!("{msg}")
}

/// Write a length-prefixed frame.  The 4-byte length prefix is big-endian
/// (network byte order), followed by the raw payload bytes.
async fn write_frame<S>(io: &mut S, data: &[u8]) -> anyhow::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len()).context("frame too large for u32 length prefix")?;
    io.write_u32(len).await?; // big-endian by tokio default
    io.write_all(data).await?;
    io.flush().await?;
    Ok(())
}

/// Read a length-prefixed frame.  Rejects frames larger than `max_len`.
async fn read_frame<S>(io: &mut S, max_len: usize) -> anyhow::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let len = io.read_u32().await? as usize; // big-endian by tokio default
    if len > max_len {
        anyhow::bail!("frame exceeds max size");
    }
    let mut data = vec![0u8; len];
    io.read_exact(&mut data).await?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{BlobRequest, MsgType, WirePayload, FLAG_RESPONSE};

    #[tokio::test]
    async fn envelope_roundtrip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let envelope = Envelope::from_typed(
            3,
            0,
            &WirePayload::BlobRequest(BlobRequest {
                blob_hash: [9u8; 32],
                offered_rate: 0,
            }),
        )
        .expect("build envelope");

        write_envelope(&mut client, &envelope)
            .await
            .expect("write envelope");
        let received = read_envelope(&mut server).await.expect("read envelope");
        assert_eq!(received.r#type, MsgType::BlobRequest as u16);
        assert_eq!(received.req_id, 3);
        assert_eq!(received.decode_typed().expect("typed"), envelope.decode_typed().expect("typed"));
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            // Forged length prefix far beyond the envelope cap.
            client.write_u32(u32::MAX).await.expect("write prefix");
        });

        let err = read_envelope(&mut server)
            .await
            .expect_err("oversize frame must be rejected");
        assert!(err.to_string().contains("frame exceeds max size"));
    }

    #[test]
    fn error_flag_surfaces_peer_message() {
        let envelope = Envelope {
            r#type: MsgType::OfferResponse as u16,
            req_id: 1,
            flags: FLAG_RESPONSE | FLAG_ERROR,
            payload: b"blob not found".to_vec(),
        };
        let err = ensure_not_error(&envelope).expect_err("flagged envelope is an error");
        assert!(err.to_string().contains("blob not found"));

        let clean = Envelope {
            flags: FLAG_RESPONSE,
            ..envelope
        };
        ensure_not_error(&clean).expect("clean envelope passes");
    }

    #[tokio::test]
    async fn tcp_connector_dials_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let envelope = read_envelope(&mut socket).await.expect("read");
            assert_eq!(envelope.req_id, 42);
        });

        let connector = TcpConnector::default();
        let peer = Peer::new(addr.ip(), addr.port());
        let mut stream = connector.connect(&peer).await.expect("connect");
        let envelope = Envelope {
            r#type: MsgType::BlobRequest as u16,
            req_id: 42,
            flags: 0,
            payload: vec![],
        };
        write_envelope(&mut stream, &envelope)
            .await
            .expect("write over tcp");
    }
}

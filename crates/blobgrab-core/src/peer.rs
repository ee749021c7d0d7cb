// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// An addressable remote endpoint. Equality is by `(host, port)`; a peer
/// carries no behavior beyond identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Peer {
    pub host: IpAddr,
    pub port: u16,
}

impl Peer {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    /// Parse `host[:port]`, falling back to `default_port` when the port
    /// is omitted.
    pub fn parse(s: &str, default_port: u16) -> anyhow::Result<Self> {
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>()?),
            None => (s, default_port),
        };
        Ok(Self {
            host: host.parse()?,
            port,
        })
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_equality_is_by_host_and_port() {
        let a = Peer::parse("10.0.0.1:3333", 3333).expect("parse");
        let b = Peer::parse("10.0.0.1", 3333).expect("parse");
        let c = Peer::parse("10.0.0.1:4444", 3333).expect("parse");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn peer_cbor_roundtrip() {
        let peer = Peer::parse("127.0.0.1:7000", 3333).expect("parse");
        let encoded = crate::cbor::to_vec(&peer).expect("encode peer");
        let decoded: Peer = crate::cbor::from_slice(&encoded).expect("decode peer");
        assert_eq!(decoded, peer);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Peer::parse("not-an-ip", 3333).is_err());
        assert!(Peer::parse("10.0.0.1:notaport", 3333).is_err());
    }
}

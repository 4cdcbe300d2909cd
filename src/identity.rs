//! Peer identity: how a received request is attributed to a configured peer.
//!
//! Grounded in `original_source/src/tno/mpc/communication/httphandlers.py`'s
//! `_post_handler`: a request is identified either by its TLS client
//! certificate (issuer CN + serial) or, for plaintext deployments, by the
//! remote socket address combined with the `server_port` cookie the sending
//! client attaches to every request. Certificate identity always wins when
//! both are available, matching the Python handler's lookup order.

use std::fmt;
use std::net::IpAddr;

/// How a peer that spoke to our server was identified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerIdentity {
    /// Identified by the remote address and the port the peer claims to
    /// listen on (via the `server_port` cookie).
    Address { ip: IpAddr, advertised_port: u16 },
    /// Identified by the client certificate presented during the TLS
    /// handshake.
    Certificate { issuer_cn: String, serial: String },
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerIdentity::Address { ip, advertised_port } => write!(f, "{ip}:{advertised_port}"),
            PeerIdentity::Certificate { issuer_cn, serial } => write!(f, "{issuer_cn}:{serial}"),
        }
    }
}

impl PeerIdentity {
    /// The string used as a `handlers_lookup` key, matching the Python
    /// source's `f"{address}:{port}"` / `f"{issuer}:{serial}"` convention.
    pub fn lookup_key(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn address_identity_renders_ip_colon_port() {
        let id = PeerIdentity::Address { ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), advertised_port: 8080 };
        assert_eq!(id.lookup_key(), "127.0.0.1:8080");
    }

    #[test]
    fn certificate_identity_renders_cn_colon_serial() {
        let id = PeerIdentity::Certificate { issuer_cn: "alice-ca".into(), serial: "42".into() };
        assert_eq!(id.lookup_key(), "alice-ca:42");
    }
}

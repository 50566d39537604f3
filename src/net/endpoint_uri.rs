//! Endpoint URI parsing.
//!
//! `scheme://host[:port][/path][?query]` where the scheme selects both the
//! transport protocol and the FEC scheme, e.g. `rtp+rs8m://192.168.0.5:5004`
//! for the source stream of an rs8m-protected session. IPv6 literals go in
//! square brackets.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::core::Status;
use crate::fec::FecScheme;

/// Interface types an endpoint can bind within a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// Media source packets.
    AudioSource,
    /// FEC repair packets.
    AudioRepair,
    /// Control feedback (RTCP).
    AudioControl,
}

/// Transport protocol encoded in the URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain RTP media.
    Rtp,
    /// RTP media with rs8m footers.
    RtpRs8m,
    /// rs8m repair stream.
    Rs8m,
    /// RTP media with LDPC footers.
    RtpLdpc,
    /// LDPC repair stream.
    Ldpc,
    /// RTCP control.
    Rtcp,
}

impl Protocol {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "rtp" => Some(Protocol::Rtp),
            "rtp+rs8m" => Some(Protocol::RtpRs8m),
            "rs8m" => Some(Protocol::Rs8m),
            "rtp+ldpc" => Some(Protocol::RtpLdpc),
            "ldpc" => Some(Protocol::Ldpc),
            "rtcp" => Some(Protocol::Rtcp),
            _ => None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Rtp => "rtp",
            Protocol::RtpRs8m => "rtp+rs8m",
            Protocol::Rs8m => "rs8m",
            Protocol::RtpLdpc => "rtp+ldpc",
            Protocol::Ldpc => "ldpc",
            Protocol::Rtcp => "rtcp",
        }
    }

    /// Interface this protocol serves.
    pub fn interface(&self) -> Interface {
        match self {
            Protocol::Rtp | Protocol::RtpRs8m | Protocol::RtpLdpc => Interface::AudioSource,
            Protocol::Rs8m | Protocol::Ldpc => Interface::AudioRepair,
            Protocol::Rtcp => Interface::AudioControl,
        }
    }

    /// FEC scheme this protocol carries, if any.
    pub fn fec_scheme(&self) -> Option<FecScheme> {
        match self {
            Protocol::RtpRs8m | Protocol::Rs8m => Some(FecScheme::Rs8m),
            Protocol::RtpLdpc | Protocol::Ldpc => Some(FecScheme::LdpcStaircase),
            Protocol::Rtp | Protocol::Rtcp => None,
        }
    }
}

/// Parsed endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUri {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl EndpointUri {
    /// Parse an endpoint URI. None of the supported protocols has a
    /// well-known default port, so the port is required.
    pub fn parse(uri: &str) -> Result<Self, Status> {
        let (scheme, rest) = uri.split_once("://").ok_or(Status::BadConfig)?;
        let protocol = Protocol::from_scheme(scheme).ok_or(Status::BadConfig)?;

        // strip path and query
        let authority = rest
            .split(|c| c == '/' || c == '?')
            .next()
            .unwrap_or_default();
        if authority.is_empty() {
            return Err(Status::BadConfig);
        }

        let (host, port_str) = if let Some(closing) = authority.strip_prefix('[') {
            // IPv6 literal in square brackets
            let (host, rest) = closing.split_once(']').ok_or(Status::BadConfig)?;
            let port = rest.strip_prefix(':').ok_or(Status::BadConfig)?;
            (host.to_string(), port)
        } else {
            match authority.rfind(':') {
                Some(pos) => (authority[..pos].to_string(), &authority[pos + 1..]),
                None => return Err(Status::BadConfig),
            }
        };
        if host.is_empty() {
            return Err(Status::BadConfig);
        }

        let port: u16 = port_str.parse().map_err(|_| Status::BadConfig)?;

        Ok(Self {
            protocol,
            host,
            port,
        })
    }

    /// Resolve the host to a socket address (first match).
    pub fn socket_addr(&self) -> Result<SocketAddr, Status> {
        if let Ok(ip) = IpAddr::from_str(&self.host) {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| Status::BadConfig)?
            .next()
            .ok_or(Status::BadConfig)
    }
}

impl std::fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.protocol.scheme(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.protocol.scheme(), self.host, self.port)
        }
    }
}

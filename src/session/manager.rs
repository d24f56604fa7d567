//! Session Manager (§4.7): owns the discovered/active session tables and
//! reacts to [`HbaNotification`]s pushed by the HBA, the same way
//! `client::client::ClientConnection::try_handle_unsolicited_nop_in` reacts to
//! unsolicited NOP-Ins on a single connection, generalized to every
//! asynchronous event the HBA can raise.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    hba::transport::{AsyncEventCode, ConnectionId, HbaNotification, HbaTransport, SessionId},
    session::{
        lifecycle::{logout_connection, logout_session},
        types::{DiscoveryRecord, SessionParameters, Target},
    },
};

/// Bookkeeping the manager keeps per live session, independent of whatever
/// the HBA itself tracks.
#[derive(Debug, Clone)]
struct ManagedSession {
    target: Target,
    params: SessionParameters,
}

/// Owns the set of sessions this initiator instance has logged into and
/// drives the reconnect/logout/shutdown reactions to HBA notifications
/// (§4.7). Generic over the concrete `HbaTransport` so it works equally well
/// against [`crate::hba::tcp::TcpHba`] or a test double.
pub struct SessionManager<H: HbaTransport> {
    hba: Arc<H>,
    sessions: Mutex<HashMap<SessionId, ManagedSession>>,
    discovery: Mutex<DiscoveryRecord>,
}

impl<H: HbaTransport + 'static> SessionManager<H> {
    pub fn new(hba: Arc<H>) -> Self {
        Self {
            hba,
            sessions: Mutex::new(HashMap::new()),
            discovery: Mutex::new(DiscoveryRecord::default()),
        }
    }

    pub async fn track(&self, session: SessionId, target: Target, params: SessionParameters) {
        self.sessions
            .lock()
            .await
            .insert(session, ManagedSession { target, params });
    }

    pub async fn forget(&self, session: SessionId) {
        self.sessions.lock().await.remove(&session);
    }

    pub async fn set_discovery_record(&self, record: DiscoveryRecord) {
        *self.discovery.lock().await = record;
    }

    pub async fn discovery_record(&self) -> DiscoveryRecord {
        self.discovery.lock().await.clone()
    }

    /// IQNs of every session currently tracked (active targets, §4.8
    /// `CreateArrayOfActiveTargets`).
    pub async fn active_targets(&self) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|s| s.target.name.clone())
            .collect()
    }

    pub async fn session_for_target(&self, target_name: &str) -> Option<SessionId> {
        self.sessions
            .lock()
            .await
            .iter()
            .find(|(_, s)| s.target.name == target_name)
            .map(|(sid, _)| *sid)
    }

    /// Runs the notification loop to completion. Returns once a `Terminate`
    /// notification arrives or `cancel` fires, whichever is first.
    pub async fn run(&self, mut notifications: broadcast::Receiver<HbaNotification>, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("session manager shutting down: cancelled");
                    self.drop_all().await;
                    return;
                }
                recv = notifications.recv() => {
                    match recv {
                        Ok(notif) => {
                            if self.handle(notif).await {
                                return;
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("session manager lagged, dropped {skipped} notifications");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("HBA notification channel closed");
                            return;
                        },
                    }
                }
            }
        }
    }

    /// Handles a single notification. Returns `true` if the manager should
    /// stop running (i.e. a `Terminate` was processed).
    async fn handle(&self, notif: HbaNotification) -> bool {
        match notif {
            HbaNotification::AsyncMessage { session, connection, event, lun } => {
                self.handle_async_message(session, connection, event, lun).await;
                false
            },
            HbaNotification::Timeout { session, connection } => {
                self.handle_timeout(session, connection).await;
                false
            },
            HbaNotification::Terminate => {
                info!("HBA requested termination of all sessions");
                self.drop_all().await;
                true
            },
        }
    }

    async fn handle_async_message(
        &self,
        session: SessionId,
        connection: ConnectionId,
        event: AsyncEventCode,
        lun: u64,
    ) {
        match event {
            AsyncEventCode::RequestLogout => {
                info!(?session, ?connection, lun, "target requested logout, closing connection");
                if let Err(e) = logout_connection(self.hba.as_ref(), session, connection).await {
                    warn!("logout_connection after RequestLogout failed: {e}");
                }
            },
            AsyncEventCode::DropConnection => {
                info!(?session, ?connection, "target dropping connection");
                if let Err(e) = self.hba.release_connection(session, connection).await {
                    warn!("release_connection after DropConnection failed: {e}");
                }
            },
            AsyncEventCode::DropAllConnections | AsyncEventCode::CompleteSoon => {
                info!(?session, "target dropping session");
                if let Err(e) = logout_session(self.hba.as_ref(), session).await {
                    warn!("logout_session after DropAllConnections failed: {e}");
                }
                self.forget(session).await;
            },
            AsyncEventCode::RenegotiateParameters => {
                info!(?session, ?connection, "target requested renegotiation, cycling connection");
                if let Err(e) = logout_connection(self.hba.as_ref(), session, connection).await {
                    warn!("logout_connection after RenegotiateParameters failed: {e}");
                }
            },
            AsyncEventCode::VendorSpecific(code) => {
                warn!(?session, ?connection, code, "ignoring vendor-specific async event");
            },
        }
    }

    async fn handle_timeout(&self, session: SessionId, connection: ConnectionId) {
        warn!(?session, ?connection, "connection timed out, releasing");
        if let Err(e) = self.hba.release_connection(session, connection).await {
            warn!("release_connection after timeout failed: {e}");
        }
        if self
            .hba
            .enumerate()
            .into_iter()
            .find(|(sid, _)| *sid == session)
            .map(|(_, conns)| conns.is_empty())
            .unwrap_or(true)
        {
            self.forget(session).await;
        }
    }

    async fn drop_all(&self) {
        let sessions: Vec<SessionId> = self.sessions.lock().await.keys().copied().collect();
        for session in sessions {
            if let Err(e) = logout_session(self.hba.as_ref(), session).await {
                warn!("logout_session during shutdown failed: {e}");
            }
        }
        self.sessions.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_session_carries_target_and_params() {
        let params = SessionParameters {
            max_connections: 1,
            initial_r2t: true,
            immediate_data: false,
            max_burst_length: 262144,
            first_burst_length: 65536,
            max_outstanding_r2t: 1,
            data_pdu_in_order: true,
            data_sequence_in_order: true,
            default_time2wait: 2,
            default_time2retain: 20,
            error_recovery_level: 0,
            tsih: 7,
            tpgt: 1,
        };
        let ms = ManagedSession {
            target: Target { name: "iqn.test:a".to_string(), alias: None },
            params,
        };
        assert_eq!(ms.params.tsih, 7);
    }
}

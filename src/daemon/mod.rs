//! Daemon Supervisor (§4.8): single cooperative dispatcher accepting client
//! IPC commands, authorizing them, serializing preference mutations under a
//! lock, running the periodic SendTargets discovery loop, queuing auto-login
//! on startup, and reacting to sleep/wake.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod authz;
pub mod ipc;
pub mod prefs;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    daemon::{
        authz::Authorizer,
        ipc::{Command, ErrorKind, FuncCode, Response},
        prefs::{ConfigType, PreferencesStore, TargetPrefs},
    },
    hba::transport::{HbaTransport, PortalAddr},
    session::{
        lifecycle::{self, leading_login, logout_session, send_targets_discovery},
        manager::SessionManager,
        types::Target,
    },
};

/// Daemon-level settings (§3 AMBIENT DATA MODEL ADDITIONS **DaemonConfig**).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: std::path::PathBuf,
    pub client_io_timeout: Duration,
    pub discovery_interval: Duration,
    pub max_sessions: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: std::path::PathBuf::from("/tmp/iscsi-initiator-rs.sock"),
            client_io_timeout: Duration::from_millis(250),
            discovery_interval: Duration::from_secs(300),
            max_sessions: 64,
        }
    }
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("bad argument: {0}")]
    BadArgument(String),
    #[error("authorization denied")]
    AuthorizationDenied,
    #[error("target not found: {0}")]
    NotFound(String),
    #[error("target already has an active session")]
    AlreadyExists,
    #[error("resource exhausted: at most {0} sessions are allowed")]
    Busy(usize),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl DaemonError {
    fn kind(&self) -> ErrorKind {
        match self {
            DaemonError::BadArgument(_) => ErrorKind::BadArgument,
            DaemonError::AuthorizationDenied => ErrorKind::AuthorizationDenied,
            DaemonError::NotFound(_) => ErrorKind::NotFound,
            DaemonError::AlreadyExists => ErrorKind::AlreadyExists,
            DaemonError::Busy(_) => ErrorKind::Busy,
            DaemonError::Transport(_) => ErrorKind::TransportError,
        }
    }
}

/// Supervisor process state, generic over the concrete HBA implementation so
/// it can run against [`crate::hba::tcp::TcpHba`] or a test double.
pub struct Daemon<H: HbaTransport> {
    cfg: DaemonConfig,
    hba: Arc<H>,
    sessions: Arc<SessionManager<H>>,
    prefs_store: Arc<dyn PreferencesStore>,
    authorizer: Arc<dyn Authorizer>,
    /// §5 "Preferences: single mutex; all readers/writers acquire it".
    /// `PreferencesIOLockAndSync`/`PreferencesIOUnlockAndSync` hold this
    /// across multiple client requests, so the guard itself (not just the
    /// mutex) is the thing that needs a home.
    prefs_lock: Arc<Mutex<()>>,
    prefs_guard: Mutex<Option<tokio::sync::OwnedMutexGuard<()>>>,
    /// {target -> active portals} snapshot taken on sleep, replayed on wake
    /// (§4.8 "Sleep/wake").
    sleep_snapshot: Mutex<Vec<(String, Vec<PortalAddr>)>>,
}

impl<H: HbaTransport + 'static> Daemon<H> {
    pub fn new(
        cfg: DaemonConfig,
        hba: Arc<H>,
        prefs_store: Arc<dyn PreferencesStore>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            cfg,
            sessions: Arc::new(SessionManager::new(hba.clone())),
            hba,
            prefs_store,
            authorizer,
            prefs_lock: Arc::new(Mutex::new(())),
            prefs_guard: Mutex::new(None),
            sleep_snapshot: Mutex::new(Vec::new()),
        }
    }

    pub fn session_manager(&self) -> &Arc<SessionManager<H>> {
        &self.sessions
    }

    /// Runs the notification loop, auto-login, and periodic discovery until
    /// `cancel` fires. Mirrors the teacher's `tokio::select!`-driven
    /// supervisor loops (`client::client::ClientConnection::read_loop`).
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self.auto_login_on_startup().await {
            warn!("auto-login on startup failed: {e}");
        }

        let notifications = self.hba.subscribe();
        let discovery_cancel = cancel.clone();
        let discovery = self.run_discovery_loop(discovery_cancel);
        let manager_run = self.sessions.run(notifications, &cancel);

        tokio::join!(discovery, manager_run);
        info!("daemon supervisor stopped");
    }

    /// §4.8 "Auto-login on startup": for every target with `auto_login`,
    /// enqueue a login per configured portal.
    async fn auto_login_on_startup(&self) -> Result<()> {
        let doc = self.prefs_store.load()?;
        for (name, prefs) in &doc.targets {
            if !prefs.auto_login {
                continue;
            }
            for (portal, _conn_cfg) in prefs.portals() {
                if let Err(e) = self.login_target(name, prefs, portal).await {
                    warn!(target = name, %portal, "auto-login failed, will re-arm on reachability: {e}");
                }
            }
        }
        Ok(())
    }

    async fn login_target(&self, name: &str, prefs: &TargetPrefs, portal: &PortalAddr) -> Result<()> {
        if self.sessions.session_for_target(name).await.is_some() {
            return Ok(());
        }
        let target = Target { name: name.to_string(), alias: prefs.alias.clone() };
        let result = leading_login(self.hba.as_ref(), &target, portal).await?;
        self.sessions.track(result.session, target, result.session_params).await;
        Ok(())
    }

    /// §5 "One auxiliary OS thread runs SendTargets discovery": here, a
    /// periodic task instead, merging results into the shared discovery
    /// record under `trylock` semantics (skip and warn if busy).
    async fn run_discovery_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.discovery_interval);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Ok(guard) = self.prefs_lock.clone().try_lock_owned() {
                        drop(guard);
                        if let Err(e) = self.run_discovery_pass().await {
                            warn!("discovery pass failed: {e}");
                        }
                    } else {
                        warn!("discovery pass skipped: preferences locked by a client");
                    }
                }
            }
        }
    }

    async fn run_discovery_pass(&self) -> Result<()> {
        let doc = self.prefs_store.load()?;
        for prefs in doc.targets.values() {
            if prefs.config_type != ConfigType::DynamicSendTargets {
                continue;
            }
            let Some(portal) = prefs.discovery_portal() else {
                warn!("DynamicSendTargets target missing discovery_portal, skipping");
                continue;
            };
            let hba = self.hba.clone();
            let record = send_targets_discovery(hba.as_ref(), portal, async |session, connection| {
                Ok(hba.send_targets_text_exchange(session, connection).await?)
            })
            .await?;
            self.sessions.set_discovery_record(record).await;
        }
        Ok(())
    }

    /// §4.8 "Sleep/wake": snapshot {target -> active portals}, request
    /// unmount (left to the OS collaborator, out of scope here), then
    /// session-close logout per target.
    pub async fn handle_will_sleep(&self) {
        let targets = self.sessions.active_targets().await;
        let mut snapshot = Vec::new();
        for name in targets {
            if let Some(session) = self.sessions.session_for_target(&name).await {
                let portals = self
                    .sessions
                    .discovery_record()
                    .await
                    .targets
                    .get(&name)
                    .map(|by_tpgt| by_tpgt.values().flatten().cloned().collect())
                    .unwrap_or_default();
                snapshot.push((name.clone(), portals));
                if let Err(e) = logout_session(self.hba.as_ref(), session).await {
                    warn!(target = name, "session-close logout on sleep failed: {e}");
                }
                self.sessions.forget(session).await;
            }
        }
        *self.sleep_snapshot.lock().await = snapshot;
    }

    /// §4.8 "On system will power on, iterate the snapshot and schedule
    /// logins again"; the snapshot is cleared after wake.
    pub async fn handle_did_wake(&self) {
        let snapshot = std::mem::take(&mut *self.sleep_snapshot.lock().await);
        let doc = match self.prefs_store.load() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("loading preferences on wake failed: {e}");
                return;
            },
        };
        for (name, portals) in snapshot {
            let Some(prefs) = doc.targets.get(&name) else { continue };
            for portal in portals {
                if let Err(e) = self.login_target(&name, prefs, &portal).await {
                    warn!(target = name, %portal, "re-login on wake failed: {e}");
                }
            }
        }
    }

    /// Dispatches a single client IPC command to a [`Response`], enforcing
    /// authorization before any mutation (§4.8, §7 "Client authorization
    /// denied: the per-request reply carries the error; no mutation is
    /// performed").
    pub async fn dispatch(&self, cmd: Command) -> Response {
        let func = cmd.func;
        if let Some(required) = func.required_right() {
            let rights = self.authorizer.rights_for(&cmd.authorization_blob());
            if !rights.contains(required) {
                return Response::error(func, ErrorKind::AuthorizationDenied);
            }
        }

        match self.dispatch_inner(&cmd).await {
            Ok(payload) => Response::ok(func, payload),
            Err(e) => Response::error(func, e.kind()),
        }
    }

    async fn dispatch_inner(&self, cmd: &Command) -> Result<Vec<u8>, DaemonError> {
        match cmd.func {
            FuncCode::Login => self.handle_login(cmd).await,
            FuncCode::Logout => self.handle_logout(cmd).await,
            FuncCode::IsTargetActive => {
                let name = require_target(cmd)?;
                let active = self.sessions.session_for_target(&name).await.is_some();
                Ok(serde_json::to_vec(&active).unwrap_or_default())
            },
            FuncCode::IsPortalActive => {
                let portal = cmd.portal.clone().ok_or_else(|| DaemonError::BadArgument("portal required".into()))?;
                let active = self.hba.find_session_by_portal(&portal).is_some();
                Ok(serde_json::to_vec(&active).unwrap_or_default())
            },
            FuncCode::CreateArrayOfActiveTargets => {
                let targets = self.sessions.active_targets().await;
                Ok(serde_json::to_vec(&targets).unwrap_or_default())
            },
            FuncCode::CreateArrayOfActivePortalsForTarget => {
                let name = require_target(cmd)?;
                let record = self.sessions.discovery_record().await;
                let portals: Vec<&PortalAddr> = record
                    .targets
                    .get(&name)
                    .map(|by_tpgt| by_tpgt.values().flatten().collect())
                    .unwrap_or_default();
                Ok(serde_json::to_vec(&portals).unwrap_or_default())
            },
            FuncCode::QueryTargetForAuthMethod => {
                let name = require_target(cmd)?;
                let doc = self.prefs_store.load().map_err(DaemonError::Transport)?;
                let prefs = doc.targets.get(&name).ok_or_else(|| DaemonError::NotFound(name.clone()))?;
                Ok(serde_json::to_vec(&prefs.auth).unwrap_or_default())
            },
            FuncCode::CreateCfPropertiesForSession => {
                let name = require_target(cmd)?;
                let session = self
                    .sessions
                    .session_for_target(&name)
                    .await
                    .ok_or_else(|| DaemonError::NotFound(name.clone()))?;
                let params = lifecycle::session_params(self.hba.as_ref(), session)
                    .map_err(DaemonError::Transport)?;
                Ok(serde_json::to_vec(&params).unwrap_or_default())
            },
            FuncCode::CreateCfPropertiesForConnection => {
                let name = require_target(cmd)?;
                let session = self
                    .sessions
                    .session_for_target(&name)
                    .await
                    .ok_or_else(|| DaemonError::NotFound(name.clone()))?;
                let connection = self
                    .hba
                    .enumerate()
                    .into_iter()
                    .find(|(sid, _)| *sid == session)
                    .and_then(|(_, conns)| conns.into_iter().next())
                    .ok_or_else(|| DaemonError::NotFound(name.clone()))?;
                let params = lifecycle::connection_params(self.hba.as_ref(), session, connection)
                    .map_err(DaemonError::Transport)?;
                Ok(serde_json::to_vec(&params).unwrap_or_default())
            },
            FuncCode::UpdateDiscovery => {
                self.run_discovery_pass().await.map_err(DaemonError::Transport)?;
                Ok(Vec::new())
            },
            FuncCode::PreferencesIoLockAndSync => {
                let guard = self.prefs_lock.clone().lock_owned().await;
                *self.prefs_guard.lock().await = Some(guard);
                Ok(Vec::new())
            },
            FuncCode::PreferencesIoUnlockAndSync => {
                // §9 Open Question: the source pairs this with a prior lock
                // via trylock; dropping an absent guard is a silent no-op
                // here rather than an error, matching that ambiguity.
                self.prefs_guard.lock().await.take();
                Ok(Vec::new())
            },
            FuncCode::SetSharedSecret => self.handle_set_shared_secret(cmd).await,
            FuncCode::RemoveSharedSecret => self.handle_remove_shared_secret(cmd).await,
        }
    }

    async fn handle_login(&self, cmd: &Command) -> Result<Vec<u8>, DaemonError> {
        let name = require_target(cmd)?;
        let portal = cmd.portal.clone().ok_or_else(|| DaemonError::BadArgument("portal required".into()))?;

        if self.sessions.session_for_target(&name).await.is_some() {
            return Err(DaemonError::AlreadyExists);
        }
        if self.sessions.active_targets().await.len() >= self.cfg.max_sessions {
            return Err(DaemonError::Busy(self.cfg.max_sessions));
        }

        let doc = self.prefs_store.load().map_err(DaemonError::Transport)?;
        let alias = doc.targets.get(&name).and_then(|p| p.alias.clone());
        let target = Target { name: name.clone(), alias };

        let result = leading_login(self.hba.as_ref(), &target, &portal)
            .await
            .map_err(DaemonError::Transport)?;
        self.sessions.track(result.session, target, result.session_params).await;
        Ok(serde_json::to_vec(&result.session_params).unwrap_or_default())
    }

    async fn handle_logout(&self, cmd: &Command) -> Result<Vec<u8>, DaemonError> {
        let name = require_target(cmd)?;
        let session = self
            .sessions
            .session_for_target(&name)
            .await
            .ok_or_else(|| DaemonError::NotFound(name.clone()))?;
        logout_session(self.hba.as_ref(), session).await.map_err(DaemonError::Transport)?;
        self.sessions.forget(session).await;
        Ok(Vec::new())
    }

    async fn handle_set_shared_secret(&self, cmd: &Command) -> Result<Vec<u8>, DaemonError> {
        let name = require_target(cmd)?;
        let secret = cmd
            .auth
            .clone()
            .ok_or_else(|| DaemonError::BadArgument("secret payload required".into()))?;
        let secret = String::from_utf8(secret).map_err(|_| DaemonError::BadArgument("secret must be UTF-8".into()))?;

        let mut doc = self.prefs_store.load().map_err(DaemonError::Transport)?;
        let prefs = doc.targets.get_mut(&name).ok_or_else(|| DaemonError::NotFound(name.clone()))?;
        prefs.auth.initiator = Some(crate::session::types::Auth::Chap { name: doc.initiator_name.clone(), secret });
        self.prefs_store.save(&doc).map_err(DaemonError::Transport)?;
        Ok(Vec::new())
    }

    async fn handle_remove_shared_secret(&self, cmd: &Command) -> Result<Vec<u8>, DaemonError> {
        let name = require_target(cmd)?;
        let mut doc = self.prefs_store.load().map_err(DaemonError::Transport)?;
        let prefs = doc.targets.get_mut(&name).ok_or_else(|| DaemonError::NotFound(name.clone()))?;
        prefs.auth.initiator = None;
        self.prefs_store.save(&doc).map_err(DaemonError::Transport)?;
        Ok(Vec::new())
    }
}

fn require_target(cmd: &Command) -> Result<String, DaemonError> {
    cmd.target_name
        .clone()
        .ok_or_else(|| DaemonError::BadArgument("target_name required".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::authz::{AuthorizationBlob, Rights, SharedTokenAuthorizer};

    #[test]
    fn default_daemon_config_matches_spec_defaults() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.client_io_timeout, Duration::from_millis(250));
    }

    #[test]
    fn daemon_error_kinds_map_to_ipc_error_kinds() {
        assert!(matches!(DaemonError::AlreadyExists.kind(), ErrorKind::AlreadyExists));
        assert!(matches!(DaemonError::AuthorizationDenied.kind(), ErrorKind::AuthorizationDenied));
    }

    #[test]
    fn shared_token_authorizer_is_usable_as_trait_object() {
        let authz: Arc<dyn Authorizer> = Arc::new(SharedTokenAuthorizer::new(b"tok".to_vec()));
        assert!(authz.rights_for(&AuthorizationBlob(b"tok".to_vec())).contains(Rights::LOGIN));
    }
}

//! Reference `HbaTransport` backed by real TCP sockets: one `ClientConnection`
//! per connection, grouped into sessions the same way
//! `client::pool_sessions::Pool` used to, generalized to the multi-session
//! shape `HbaTransport` requires and driven through the transport-agnostic
//! login engine (`login::query::login`) instead of `LoginCtx`.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU16, AtomicU32, Ordering},
};

use anyhow::{Context, Result, anyhow, ensure};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    cfg::config::Config,
    client::client::ClientConnection,
    hba::transport::{
        ConnectionId, ConnectionParam, ConnectionParamKey, HbaError, HbaNotification,
        HbaResult, HbaTransport, PortalAddr, SessionId, SessionParam, SessionParamKey,
    },
    login::{
        exchange::{LoginExchange, LoginStageRequest, LoginStageResponse},
        query::{LoginCounters, login},
    },
    models::{
        common::{BasicHeaderSegment, Builder, HEADER_LEN, SendingData},
        data_fromat::PduRequest,
        login::{
            request::{LoginRequest, LoginRequestBuilder},
            response::LoginResponse,
            status::StatusDetail,
        },
        logout::common::LogoutReason,
        text::{
            codec::{encode_pairs, parse_to_pairs},
            request::{TextRequest, TextRequestBuilder},
            response::TextResponse,
        },
    },
    state_machine::{common::StateMachineCtx, logout_states::LogoutCtx},
    utils::generate_isid,
};

/// Drives one `ClientConnection` through the Login state sequence on behalf
/// of the transport-agnostic `login::query::login` engine. Mirrors
/// `state_machine/login/login_plain.rs`'s PDU-building, but reassembles
/// multi-PDU (continue-bit) responses rather than assuming a single reply.
struct ConnLoginExchange {
    conn: Arc<ClientConnection>,
    /// Every Login Request of a single exchange carries the same ITT; the
    /// target echoes it back on every continuation response.
    itt: u32,
}

impl LoginExchange for ConnLoginExchange {
    async fn send_stage(&self, req: LoginStageRequest) -> Result<LoginStageResponse> {
        let mut buf = [0u8; HEADER_LEN];
        let mut builder = LoginRequestBuilder::new(req.isid, req.tsih)
            .csg(req.csg)
            .nsg(req.nsg)
            .versions(0, 0)
            .initiator_task_tag(self.itt)
            .connection_id(req.cid)
            .cmd_sn(req.cmd_sn)
            .exp_stat_sn(req.exp_stat_sn);
        if req.transit {
            builder = builder.transit();
        }
        builder.header.to_bhs_bytes(buf.as_mut_slice())?;

        let mut pdu = PduRequest::<LoginRequest>::new_request(buf, &self.conn.cfg);
        pdu.append_data(&req.data)?;

        self.conn.send_request(self.itt, pdu).await?;

        let mut data = Vec::new();
        loop {
            let resp = self.conn.read_response::<LoginResponse>(self.itt).await?;
            let header = resp.header_view()?;
            let tsih = header.tsih.get();
            let stat_sn = header.stat_sn.get();
            let exp_cmd_sn = header.exp_cmd_sn.get();
            let max_cmd_sn = header.max_cmd_sn.get();
            let csg = header
                .flags
                .csg()
                .ok_or_else(|| anyhow!("login response carries reserved CSG"))?;
            let nsg = header.flags.nsg();
            let transit = header.flags.transit();
            let more = header.flags.cont();
            let status =
                StatusDetail::try_from((header.status_class.decode(), header.status_detail.raw()))
                    .context("unrecognized login status detail")?;

            if let Ok(segment) = resp.data() {
                data.extend_from_slice(segment);
            }

            if !more {
                return Ok(LoginStageResponse {
                    tsih,
                    csg,
                    nsg,
                    transit,
                    stat_sn,
                    exp_cmd_sn,
                    max_cmd_sn,
                    status,
                    data,
                });
            }
        }
    }
}

/// One TCP connection inside a session, tracked the way
/// `pool_sessions::Connection` used to.
struct ConnEntry {
    conn: Arc<ClientConnection>,
    exp_stat_sn: Arc<AtomicU32>,
    cmd_sn: Arc<AtomicU32>,
    itt_gen: Arc<AtomicU32>,
    active: std::sync::atomic::AtomicBool,
}

/// One iSCSI session: ISID + TSIH plus every connection bound to it.
struct SessionEntry {
    tsih: u16,
    isid: [u8; 6],
    target_name: Arc<str>,
    tpgt: u16,
    conns: DashMap<ConnectionId, Arc<ConnEntry>>,
    next_cid: AtomicU32,
}

/// TCP-backed `HbaTransport`. Owns the session/connection table that
/// `client::pool_sessions::Pool` used to own, plus a broadcast channel for
/// `HbaNotification` delivery (`Pool` had no notification fan-out; NOP-In
/// auto-reply was its only consumer of unsolicited traffic).
pub struct TcpHba {
    cfg_template: Config,
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
    next_session_id: AtomicU16,
    notify: broadcast::Sender<HbaNotification>,
    self_weak: OnceCell<Weak<TcpHba>>,
    cancel: CancellationToken,
}

impl TcpHba {
    pub fn new(cfg_template: Config, cancel: CancellationToken) -> Arc<Self> {
        let (notify, _rx) = broadcast::channel(64);
        let hba = Arc::new(Self {
            cfg_template,
            sessions: DashMap::new(),
            next_session_id: AtomicU16::new(1),
            notify,
            self_weak: OnceCell::new(),
            cancel,
        });
        let _ = hba.self_weak.set(Arc::downgrade(&hba));
        hba
    }

    fn cfg_for_portal(&self, target_name: &str, portal: &PortalAddr) -> Config {
        let mut cfg = self.cfg_template.clone();
        cfg.login.identity.target_name = target_name.to_string();
        cfg.login.transport.target_address = portal.to_string();
        cfg
    }

    async fn dial(&self, cfg: Config) -> Result<Arc<ClientConnection>> {
        ClientConnection::connect(cfg, self.cancel.clone()).await
    }

    async fn run_login(
        &self,
        conn: Arc<ClientConnection>,
        isid: [u8; 6],
        cid: u16,
        tsih_hint: u16,
    ) -> Result<(u16, u32, u32, u32)> {
        let exchange = ConnLoginExchange { conn: conn.clone(), itt: 0 };
        let counters = LoginCounters::new(0, 0);
        let outcome = login(&exchange, &conn.cfg, isid, tsih_hint, cid, &counters).await?;
        ensure!(outcome.tsih != 0, "TSIH=0 in final Login Response");
        Ok((
            outcome.tsih,
            counters.cmd_sn.load(Ordering::SeqCst),
            counters.exp_stat_sn.load(Ordering::SeqCst),
            cid as u32,
        ))
    }

    /// Drives one `SendTargets=All` Text Request/Response exchange over an
    /// already-established connection, reassembling continuation responses
    /// (`C` bit) the same way `ConnLoginExchange::send_stage` reassembles
    /// multi-PDU Login Responses.
    async fn run_text_exchange(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> Result<Vec<(String, String)>> {
        let entry = self.find_conn(session, connection).map_err(|e| anyhow!("{e}"))?;
        let itt = entry.itt_gen.fetch_add(1, Ordering::SeqCst);
        let cmd_sn = entry.cmd_sn.fetch_add(1, Ordering::SeqCst);
        let exp_stat_sn = entry.exp_stat_sn.load(Ordering::SeqCst);

        let header = TextRequestBuilder::new()
            .initiator_task_tag(itt)
            .target_task_tag(TextRequest::DEFAULT_TAG)
            .cmd_sn(cmd_sn)
            .exp_stat_sn(exp_stat_sn);

        let mut buf = [0u8; HEADER_LEN];
        header.header.to_bhs_bytes(buf.as_mut_slice())?;

        let mut pdu = PduRequest::<TextRequest>::new_request(buf, &entry.conn.cfg);
        pdu.append_data(&encode_pairs([("SendTargets", "All")]))?;

        entry.conn.send_request(itt, pdu).await?;

        let mut pairs = Vec::new();
        loop {
            let resp = entry.conn.read_response::<TextResponse>(itt).await?;
            let header = resp.header_view()?;
            entry
                .exp_stat_sn
                .store(header.stat_sn.get().wrapping_add(1), Ordering::SeqCst);
            let more = header.get_continue_bit();
            pairs.extend(parse_to_pairs(resp.data()?)?);
            if !more {
                break;
            }
        }
        Ok(pairs)
    }

    fn find_conn(&self, session: SessionId, connection: ConnectionId) -> HbaResult<Arc<ConnEntry>> {
        let sess = self
            .sessions
            .get(&session)
            .ok_or(HbaError::UnknownSession(session))?;
        sess.conns
            .get(&connection)
            .map(|c| c.clone())
            .ok_or(HbaError::UnknownConnection(session, connection))
    }
}

impl HbaTransport for TcpHba {
    async fn create_session(
        &self,
        target_name: &str,
        portal: &PortalAddr,
    ) -> HbaResult<(SessionId, ConnectionId)> {
        let cfg = self.cfg_for_portal(target_name, portal);
        let (isid, _) = generate_isid();
        let conn = self.dial(cfg).await.map_err(HbaError::Transport)?;

        let (tsih, cmd_sn, exp_stat_sn, _) = self
            .run_login(conn.clone(), isid, 0, 0)
            .await
            .map_err(HbaError::Transport)?;

        let session_id = SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst));
        let cid = ConnectionId(1);

        let entry = Arc::new(SessionEntry {
            tsih,
            isid,
            target_name: Arc::from(target_name),
            tpgt: conn.cfg.login.transport.portal_group_tag,
            conns: DashMap::new(),
            next_cid: AtomicU32::new(2),
        });
        entry.conns.insert(
            cid,
            Arc::new(ConnEntry {
                conn: conn.clone(),
                exp_stat_sn: Arc::new(AtomicU32::new(exp_stat_sn)),
                cmd_sn: Arc::new(AtomicU32::new(cmd_sn)),
                itt_gen: Arc::new(AtomicU32::new(1)),
                active: std::sync::atomic::AtomicBool::new(false),
            }),
        );
        self.sessions.insert(session_id, entry);

        if let Some(w) = self.self_weak.get().cloned() {
            conn.bind_hba_session(w, session_id, cid);
        }

        Ok((session_id, cid))
    }

    async fn release_session(&self, session: SessionId) -> HbaResult<()> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(HbaError::UnknownSession(session))?
            .clone();

        for kv in entry.conns.iter() {
            kv.value().active.store(false, Ordering::SeqCst);
        }

        let first = entry.conns.iter().next().map(|kv| (*kv.key(), kv.value().clone()));
        if let Some((cid, conn_entry)) = first {
            let mut lo = LogoutCtx::new(
                conn_entry.conn.clone(),
                conn_entry.itt_gen.clone(),
                conn_entry.cmd_sn.clone(),
                conn_entry.exp_stat_sn.clone(),
                cid.0 as u16,
                LogoutReason::CloseSession,
            );
            if let Err(e) = lo.execute(&self.cancel).await {
                warn!("session-close logout failed, tearing down anyway: {e}");
            }
        }

        for kv in entry.conns.iter() {
            kv.value().conn.kill_now();
        }
        self.sessions.remove(&session);
        Ok(())
    }

    async fn create_connection(
        &self,
        session: SessionId,
        portal: &PortalAddr,
    ) -> HbaResult<ConnectionId> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(HbaError::UnknownSession(session))?
            .clone();

        let cfg = self.cfg_for_portal(&entry.target_name, portal);
        let conn = self.dial(cfg).await.map_err(HbaError::Transport)?;

        let cid_num = entry.next_cid.fetch_add(1, Ordering::SeqCst);
        let cid = ConnectionId(cid_num);

        let (_, cmd_sn, exp_stat_sn, _) = self
            .run_login(conn.clone(), entry.isid, cid_num as u16, entry.tsih)
            .await
            .map_err(HbaError::Transport)?;

        entry.conns.insert(
            cid,
            Arc::new(ConnEntry {
                conn: conn.clone(),
                exp_stat_sn: Arc::new(AtomicU32::new(exp_stat_sn)),
                cmd_sn: Arc::new(AtomicU32::new(cmd_sn)),
                itt_gen: Arc::new(AtomicU32::new(1)),
                active: std::sync::atomic::AtomicBool::new(false),
            }),
        );

        if let Some(w) = self.self_weak.get().cloned() {
            conn.bind_hba_session(w, session, cid);
        }

        Ok(cid)
    }

    async fn release_connection(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> HbaResult<()> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(HbaError::UnknownSession(session))?
            .clone();
        let conn_entry = entry
            .conns
            .get(&connection)
            .ok_or(HbaError::UnknownConnection(session, connection))?
            .clone();
        conn_entry.active.store(false, Ordering::SeqCst);

        let mut lo = LogoutCtx::new(
            conn_entry.conn.clone(),
            conn_entry.itt_gen.clone(),
            conn_entry.cmd_sn.clone(),
            conn_entry.exp_stat_sn.clone(),
            connection.0 as u16,
            LogoutReason::CloseConnection,
        );
        if let Err(e) = lo.execute(&self.cancel).await {
            warn!("connection-close logout failed, tearing down anyway: {e}");
        }

        conn_entry.conn.kill_now();
        entry.conns.remove(&connection);
        if entry.conns.is_empty() {
            self.sessions.remove(&session);
        }
        Ok(())
    }

    async fn activate_connection(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> HbaResult<()> {
        self.find_conn(session, connection)?
            .active
            .store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn deactivate_connection(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> HbaResult<()> {
        self.find_conn(session, connection)?
            .active
            .store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn activate_all(&self, session: SessionId) -> HbaResult<()> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(HbaError::UnknownSession(session))?;
        for kv in entry.conns.iter() {
            kv.value().active.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn deactivate_all(&self, session: SessionId) -> HbaResult<()> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(HbaError::UnknownSession(session))?;
        for kv in entry.conns.iter() {
            kv.value().active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_session_parameter(&self, session: SessionId, param: SessionParam) -> HbaResult<()> {
        self.sessions
            .get(&session)
            .ok_or(HbaError::UnknownSession(session))?;
        match param {
            SessionParam::TargetPortalGroupTag(_) | SessionParam::TargetSessionId(_) => {
                // Assigned by the target during login; not settable locally.
                Ok(())
            },
            _ => Ok(()),
        }
    }

    fn get_session_parameter(
        &self,
        session: SessionId,
        key: SessionParamKey,
    ) -> HbaResult<SessionParam> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(HbaError::UnknownSession(session))?;
        Ok(match key {
            SessionParamKey::TargetSessionId => SessionParam::TargetSessionId(entry.tsih),
            SessionParamKey::TargetPortalGroupTag => {
                SessionParam::TargetPortalGroupTag(entry.tpgt)
            },
            SessionParamKey::MaxConnections => SessionParam::MaxConnections(
                entry
                    .conns
                    .iter()
                    .next()
                    .map(|c| c.value().conn.cfg.login.limits.max_connections)
                    .unwrap_or(1),
            ),
            SessionParamKey::ErrorRecoveryLevel => SessionParam::ErrorRecoveryLevel(
                entry
                    .conns
                    .iter()
                    .next()
                    .map(|c| c.value().conn.cfg.login.recovery.error_recovery_level)
                    .unwrap_or(0),
            ),
            SessionParamKey::MaxBurstLength => SessionParam::MaxBurstLength(
                entry
                    .conns
                    .iter()
                    .next()
                    .map(|c| c.value().conn.cfg.login.negotiation.max_burst_length)
                    .unwrap_or(0),
            ),
            SessionParamKey::FirstBurstLength => SessionParam::FirstBurstLength(
                entry
                    .conns
                    .iter()
                    .next()
                    .map(|c| c.value().conn.cfg.login.negotiation.first_burst_length)
                    .unwrap_or(0),
            ),
            SessionParamKey::InitialR2T
            | SessionParamKey::ImmediateData
            | SessionParamKey::MaxOutstandingR2T
            | SessionParamKey::DataPduInOrder
            | SessionParamKey::DataSequenceInOrder
            | SessionParamKey::DefaultTime2Wait
            | SessionParamKey::DefaultTime2Retain => {
                return Err(HbaError::Transport(anyhow!(
                    "{key:?} is not cached on the session entry; read it from Config directly"
                )));
            },
        })
    }

    fn set_connection_parameter(
        &self,
        session: SessionId,
        connection: ConnectionId,
        _param: ConnectionParam,
    ) -> HbaResult<()> {
        self.find_conn(session, connection)?;
        Ok(())
    }

    fn get_connection_parameter(
        &self,
        session: SessionId,
        connection: ConnectionId,
        key: ConnectionParamKey,
    ) -> HbaResult<ConnectionParam> {
        let entry = self.find_conn(session, connection)?;
        let cfg = &entry.conn.cfg;
        Ok(match key {
            ConnectionParamKey::UseHeaderDigest => ConnectionParam::UseHeaderDigest(
                cfg.login.negotiation.header_digest == crate::cfg::enums::Digest::CRC32C,
            ),
            ConnectionParamKey::UseDataDigest => ConnectionParam::UseDataDigest(
                cfg.login.negotiation.data_digest == crate::cfg::enums::Digest::CRC32C,
            ),
            ConnectionParamKey::MaxRecvDataSegmentLength => {
                ConnectionParam::MaxRecvDataSegmentLength(
                    cfg.login.negotiation.max_recv_data_segment_length,
                )
            },
            ConnectionParamKey::MaxSendDataSegmentLength => {
                ConnectionParam::MaxSendDataSegmentLength(
                    cfg.login.negotiation.max_recv_data_segment_length,
                )
            },
            ConnectionParamKey::InitialExpStatSn => ConnectionParam::InitialExpStatSn(
                entry.exp_stat_sn.load(Ordering::SeqCst),
            ),
        })
    }

    fn enumerate(&self) -> Vec<(SessionId, Vec<ConnectionId>)> {
        self.sessions
            .iter()
            .map(|kv| {
                let cids = kv.value().conns.iter().map(|c| *c.key()).collect();
                (*kv.key(), cids)
            })
            .collect()
    }

    fn find_session_by_target(&self, target_name: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|kv| kv.value().target_name.as_ref() == target_name)
            .map(|kv| *kv.key())
    }

    fn find_session_by_portal(&self, portal: &PortalAddr) -> Option<SessionId> {
        let addr = portal.to_string();
        self.sessions
            .iter()
            .find(|kv| {
                kv.value()
                    .conns
                    .iter()
                    .any(|c| c.value().conn.cfg.login.transport.target_address == addr)
            })
            .map(|kv| *kv.key())
    }

    fn subscribe(&self) -> broadcast::Receiver<HbaNotification> {
        self.notify.subscribe()
    }

    async fn send_targets_text_exchange(
        &self,
        session: SessionId,
        connection: ConnectionId,
    ) -> HbaResult<Vec<(String, String)>> {
        self.run_text_exchange(session, connection)
            .await
            .map_err(HbaError::Transport)
    }
}

/// Builds a state-machine context for (session, connection), injecting the
/// counters bound to that connection. Mirrors
/// `pool_sessions::Pool::execute_with`.
impl TcpHba {
    pub async fn execute_with<Ctx, Res, Build>(
        &self,
        session: SessionId,
        connection: ConnectionId,
        build: Build,
    ) -> Result<Res>
    where
        Build: for<'a> FnOnce(
            Arc<ClientConnection>,
            Arc<AtomicU32>,
            Arc<AtomicU32>,
            Arc<AtomicU32>,
        ) -> Ctx,
        Ctx: StateMachineCtx<Ctx, Res>,
    {
        let entry = self
            .find_conn(session, connection)
            .map_err(|e| anyhow!("{e}"))?;
        let mut ctx = build(
            entry.conn.clone(),
            entry.itt_gen.clone(),
            entry.cmd_sn.clone(),
            entry.exp_stat_sn.clone(),
        );
        ctx.execute(&self.cancel).await
    }
}

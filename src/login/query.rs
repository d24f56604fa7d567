//! Drives a full Login exchange (Security stage, optional CHAP, Operational
//! negotiation, transition to FullFeaturePhase) against any [`LoginExchange`].
//!
//! Supersedes `state_machine/login/common.rs::LoginCtx`: that engine only
//! drove a single `ClientConnection` and advanced `ExpStatSN` conditionally.
//! Per the corrected behavior, `ExpStatSN` always tracks `StatSN + 1` from the
//! most recent response, whether or not the stage is retried.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU32, Ordering},
};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::{
    auth::chap,
    cfg::config::{
        AuthConfig, Config, login_keys_chap_response, login_keys_operational,
        login_keys_security,
    },
    login::{
        exchange::{LoginExchange, LoginStageRequest, LoginStageResponse},
        negotiate,
    },
    models::{login::common::Stage, text::codec::encode_pairs},
};

/// Maximum number of times a single stage is resent before giving up, should
/// the exchange return a transient failure.
const MAX_STAGE_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tsih: u16,
    pub effective_operational: BTreeMap<String, String>,
}

/// Tracks the sequence counters across an entire Login exchange.
pub struct LoginCounters {
    pub cmd_sn: AtomicU32,
    pub exp_stat_sn: AtomicU32,
}

impl LoginCounters {
    pub fn new(cmd_sn: u32, exp_stat_sn: u32) -> Self {
        Self {
            cmd_sn: AtomicU32::new(cmd_sn),
            exp_stat_sn: AtomicU32::new(exp_stat_sn),
        }
    }
}

async fn send_with_retry<X: LoginExchange>(
    exchange: &X,
    req: &LoginStageRequest,
) -> Result<LoginStageResponse> {
    let mut last_err = None;
    for attempt in 0..MAX_STAGE_RETRIES {
        match exchange.send_stage(req.clone()).await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                debug!(attempt, "login stage failed, retrying: {e}");
                last_err = Some(e);
            },
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("login stage exhausted retries")))
}

async fn run_stage<X: LoginExchange>(
    exchange: &X,
    counters: &LoginCounters,
    isid: [u8; 6],
    tsih: u16,
    cid: u16,
    csg: Stage,
    nsg: Stage,
    transit: bool,
    data: Vec<u8>,
) -> Result<LoginStageResponse> {
    let req = LoginStageRequest {
        isid,
        tsih,
        cid,
        csg,
        nsg,
        transit,
        cmd_sn: counters.cmd_sn.load(Ordering::SeqCst),
        exp_stat_sn: counters.exp_stat_sn.load(Ordering::SeqCst),
        data,
    };
    let resp = send_with_retry(exchange, &req).await?;

    // Mandatory: ExpStatSN always tracks the last StatSN we have seen,
    // regardless of whether the stage is being retried or advancing.
    counters
        .exp_stat_sn
        .store(resp.stat_sn.wrapping_add(1), Ordering::SeqCst);
    // CmdSN only advances once the PDU has actually been accepted
    // (non-immediate commands consume one CmdSN per request).
    counters.cmd_sn.store(resp.exp_cmd_sn.max(req.cmd_sn), Ordering::SeqCst);

    Ok(resp)
}

/// Runs a full Login exchange. `tsih` is `0` for a new session, or the
/// session's existing TSIH when adding a connection.
pub async fn login<X: LoginExchange>(
    exchange: &X,
    cfg: &Config,
    isid: [u8; 6],
    tsih: u16,
    cid: u16,
    counters: &LoginCounters,
) -> Result<LoginOutcome> {
    let chap_creds = match &cfg.login.auth {
        AuthConfig::None => None,
        AuthConfig::Chap(c) => {
            chap::validate_secret(c.secret.as_bytes())?;
            Some(c)
        },
    };

    let security_data = login_keys_security(cfg);
    let wants_chap = chap_creds.is_some();

    let security_resp = run_stage(
        exchange,
        counters,
        isid,
        tsih,
        cid,
        Stage::Security,
        if wants_chap { Stage::Security } else { Stage::Operational },
        !wants_chap,
        security_data,
    )
    .await?;

    let tsih = security_resp.tsih;

    let last_resp = if let Some(creds) = chap_creds {
        // CHAP_A: propose algorithm 5 (MD5), no transit yet.
        let chap_a = encode_pairs([("CHAP_A", chap::CHAP_ALGORITHM_MD5.to_string().as_str())]);
        let chap_a_resp = run_stage(
            exchange,
            counters,
            isid,
            tsih,
            cid,
            Stage::Security,
            Stage::Security,
            false,
            chap_a,
        )
        .await?;

        let (chap_id, challenge) = chap::parse_challenge(&chap_a_resp.data)?;
        let chap_r = chap::compute_response(chap_id, creds.secret.as_bytes(), &challenge);

        let mut answer_pairs = login_keys_chap_response(&creds.username, &chap_r);

        let mutual_challenge = creds
            .mutual_secret
            .as_ref()
            .map(|_| chap::generate_challenge(challenge.len().max(16)));
        if let Some((mutual_id, mutual_chal)) = &mutual_challenge {
            let extra = encode_pairs([
                ("CHAP_I", mutual_id.to_string().as_str()),
                ("CHAP_C", crate::models::text::codec::encode_chap_hex(mutual_chal).as_str()),
            ]);
            answer_pairs.extend_from_slice(&extra);
        }

        let answer_resp = run_stage(
            exchange,
            counters,
            isid,
            tsih,
            cid,
            Stage::Security,
            Stage::Operational,
            true,
            answer_pairs,
        )
        .await?;

        if let Some((mutual_id, mutual_chal)) = &mutual_challenge {
            let mutual_secret = creds
                .mutual_secret
                .as_ref()
                .expect("mutual_challenge is only Some when mutual_secret is set");
            let reply = crate::models::text::codec::parse_to_map(&answer_resp.data)?;
            let (Some(n), Some(r)) = (
                reply.get("CHAP_N").and_then(|v| v.first()),
                reply.get("CHAP_R").and_then(|v| v.first()),
            ) else {
                bail!("mutual CHAP requested but target did not reply with CHAP_N/CHAP_R");
            };
            chap::verify_target_response(
                &creds.username,
                mutual_secret.as_bytes(),
                *mutual_id,
                mutual_chal,
                n,
                r,
            )
            .context("target failed mutual CHAP verification")?;
        }

        run_stage(
            exchange,
            counters,
            isid,
            tsih,
            cid,
            Stage::Operational,
            Stage::FullFeature,
            true,
            login_keys_operational(cfg),
        )
        .await?
    } else {
        run_stage(
            exchange,
            counters,
            isid,
            tsih,
            cid,
            Stage::Operational,
            Stage::FullFeature,
            true,
            login_keys_operational(cfg),
        )
        .await?
    };

    if last_resp.nsg != Some(Stage::FullFeature) || !last_resp.transit {
        bail!("login did not reach FullFeaturePhase: nsg={:?}, transit={}", last_resp.nsg, last_resp.transit);
    }

    let effective_operational = negotiate::reconcile(
        &crate::models::text::codec::parse_to_map(&login_keys_operational(cfg))?,
        &crate::models::text::codec::parse_to_map(&last_resp.data)?,
    )?;

    Ok(LoginOutcome { tsih, effective_operational })
}

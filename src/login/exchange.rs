//! Transport-agnostic seam between the login/authentication engines and
//! whatever carries Login PDUs on the wire.
//!
//! `LoginCtx`/`ClientConnection` coupled every login stage directly to a
//! single TCP-backed connection. `LoginExchange` pulls the "send one stage,
//! get the combined response back" shape out so the same stage-transition and
//! CHAP logic drives a leading login, an additional-connection login, or a
//! test double, without depending on `ClientConnection` directly.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;

use crate::models::login::{common::Stage, status::StatusDetail};

/// One Login PDU's worth of outbound stage data.
#[derive(Debug, Clone)]
pub struct LoginStageRequest {
    pub isid: [u8; 6],
    pub tsih: u16,
    pub cid: u16,
    pub csg: Stage,
    pub nsg: Stage,
    /// Sets the Transit (T) bit, requesting the target move to `nsg`.
    pub transit: bool,
    pub cmd_sn: u32,
    pub exp_stat_sn: u32,
    /// Key/value data segment for this stage (already encoded).
    pub data: Vec<u8>,
}

/// The target's reply to one Login stage, decoded enough for the query
/// engine and authenticator to act on without re-parsing the PDU.
#[derive(Debug, Clone)]
pub struct LoginStageResponse {
    pub tsih: u16,
    pub csg: Stage,
    pub nsg: Option<Stage>,
    pub transit: bool,
    pub stat_sn: u32,
    pub exp_cmd_sn: u32,
    pub max_cmd_sn: u32,
    pub status: StatusDetail,
    pub data: Vec<u8>,
}

/// Drives a single Login stage over whatever transport backs a connection.
///
/// Implementations own the Initiator Task Tag bookkeeping and counter
/// advancement; callers only see stage requests and responses.
pub trait LoginExchange: Send + Sync {
    /// Sends `req` and waits for the corresponding Login Response.
    fn send_stage(
        &self,
        req: LoginStageRequest,
    ) -> impl Future<Output = Result<LoginStageResponse>> + Send;
}

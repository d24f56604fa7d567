//! Client IPC wire protocol (§4.8, §6): length-prefixed commands/responses
//! over a local datagram socket. Grounded on the same `zerocopy`-free
//! length-prefixed framing style the teacher uses for PDU data segments
//! (`models::data_fromat`), but here the payload is `serde`-encoded rather
//! than a fixed BHS, since the IPC surface is this crate's own invention
//! (the daemon protocol isn't part of RFC 3720).

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::{daemon::authz::AuthorizationBlob, hba::transport::PortalAddr};

/// Recognised funcCodes (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum FuncCode {
    Login,
    Logout,
    CreateArrayOfActiveTargets,
    CreateArrayOfActivePortalsForTarget,
    IsTargetActive,
    IsPortalActive,
    QueryTargetForAuthMethod,
    CreateCfPropertiesForSession,
    CreateCfPropertiesForConnection,
    UpdateDiscovery,
    PreferencesIoLockAndSync,
    PreferencesIoUnlockAndSync,
    SetSharedSecret,
    RemoveSharedSecret,
}

impl FuncCode {
    /// Whether this command mutates daemon or target state and therefore
    /// requires an authorization blob carrying the matching right.
    pub fn required_right(self) -> Option<crate::daemon::authz::Rights> {
        use crate::daemon::authz::Rights;
        use FuncCode::*;
        match self {
            Login | Logout => Some(Rights::LOGIN),
            CreateCfPropertiesForSession
            | CreateCfPropertiesForConnection
            | UpdateDiscovery
            | PreferencesIoLockAndSync
            | PreferencesIoUnlockAndSync
            | SetSharedSecret
            | RemoveSharedSecret => Some(Rights::MODIFY),
            CreateArrayOfActiveTargets
            | CreateArrayOfActivePortalsForTarget
            | IsTargetActive
            | IsPortalActive
            | QueryTargetForAuthMethod => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Command {
    pub func: FuncCode,
    pub target_name: Option<String>,
    pub portal: Option<PortalAddr>,
    pub auth: Option<Vec<u8>>,
}

impl Command {
    pub fn authorization_blob(&self) -> AuthorizationBlob {
        AuthorizationBlob(self.auth.clone().unwrap_or_default())
    }
}

/// errno-style error kinds carried on every response (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ErrorKind {
    Ok,
    BadArgument,
    TransportError,
    AuthenticationFailure,
    UnsupportedParameter,
    AlreadyExists,
    NotFound,
    Busy,
    Timeout,
    ProtocolReject,
    AuthorizationDenied,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Response {
    pub func: FuncCode,
    pub error: ErrorKind,
    /// iSCSI login/logout status pair, when the error originated from a PDU
    /// exchange rather than local validation (§7).
    pub iscsi_status: Option<(u8, u8)>,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok(func: FuncCode, payload: Vec<u8>) -> Self {
        Self { func, error: ErrorKind::Ok, iscsi_status: None, payload }
    }

    pub fn error(func: FuncCode, error: ErrorKind) -> Self {
        Self { func, error, iscsi_status: None, payload: Vec::new() }
    }

    pub fn error_with_status(func: FuncCode, error: ErrorKind, status: (u8, u8)) -> Self {
        Self { func, error, iscsi_status: Some(status), payload: Vec::new() }
    }
}

/// Length prefix width for both commands and responses: a u32 byte count
/// followed by a `bincode`-encoded payload, mirroring the BHS's own
/// fixed-width length fields but sized for this protocol's variable blobs.
const LEN_PREFIX_BYTES: usize = 4;

pub fn encode_command(cmd: &Command) -> Result<Vec<u8>> {
    encode_framed(cmd)
}

pub fn decode_command(buf: &[u8]) -> Result<Command> {
    decode_framed(buf)
}

pub fn encode_response(resp: &Response) -> Result<Vec<u8>> {
    encode_framed(resp)
}

pub fn decode_response(buf: &[u8]) -> Result<Response> {
    decode_framed(buf)
}

fn encode_framed<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value).context("encoding IPC message")?;
    let mut out = Vec::with_capacity(LEN_PREFIX_BYTES + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_framed<T: for<'de> Deserialize<'de>>(buf: &[u8]) -> Result<T> {
    if buf.len() < LEN_PREFIX_BYTES {
        bail!("IPC datagram shorter than the length prefix: {} bytes", buf.len());
    }
    let len = u32::from_be_bytes(buf[..LEN_PREFIX_BYTES].try_into().expect("4 bytes")) as usize;
    let body = buf
        .get(LEN_PREFIX_BYTES..LEN_PREFIX_BYTES + len)
        .ok_or_else(|| anyhow::anyhow!("IPC length prefix ({len}) exceeds datagram size"))?;
    serde_json::from_slice(body).context("decoding IPC message")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_roundtrips() {
        let cmd = Command {
            func: FuncCode::Login,
            target_name: Some("iqn.test:disk0".to_string()),
            portal: Some(PortalAddr { address: "10.0.0.1".to_string(), port: 3260, interface: None }),
            auth: Some(b"token".to_vec()),
        };
        let wire = encode_command(&cmd).unwrap();
        let back = decode_command(&wire).unwrap();
        assert_eq!(back.target_name, cmd.target_name);
        assert_eq!(back.func, FuncCode::Login);
    }

    #[test]
    fn response_roundtrips_with_status() {
        let resp = Response::error_with_status(FuncCode::Login, ErrorKind::ProtocolReject, (0x02, 0x03));
        let wire = encode_response(&resp).unwrap();
        let back = decode_response(&wire).unwrap();
        assert_eq!(back.iscsi_status, Some((0x02, 0x03)));
    }

    #[test]
    fn mutating_funccodes_require_rights() {
        assert_eq!(FuncCode::Login.required_right(), Some(crate::daemon::authz::Rights::LOGIN));
        assert_eq!(FuncCode::IsTargetActive.required_right(), None);
    }

    #[test]
    fn truncated_datagram_is_rejected() {
        assert!(decode_command(&[0, 0, 0]).is_err());
    }
}

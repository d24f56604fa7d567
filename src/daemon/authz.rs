//! Authorization of mutating client IPC commands (§4.8, §6): an opaque blob
//! attached to the request is checked against a `Rights` bitset by an
//! `Authorizer`. No real policy is specified upstream; the shared-token
//! implementation below is a documented stand-in (DESIGN.md).

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u8 {
        const LOGIN = 0b01;
        const MODIFY = 0b10;
    }
}

/// Opaque bytes a client attaches to a mutating request (§6 "authorization
/// blob"). The daemon never interprets its contents itself; only an
/// `Authorizer` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationBlob(pub Vec<u8>);

pub trait Authorizer: Send + Sync {
    /// Returns the rights this blob grants, or `Rights::empty()` if it grants
    /// none (including an empty/absent blob).
    fn rights_for(&self, blob: &AuthorizationBlob) -> Rights;
}

/// Grants both rights to any blob equal to a configured shared token;
/// everything else gets no rights. This is a stand-in for whatever real
/// authorization policy a production deployment would plug in (e.g. a
/// per-user token issued by the OS), not a security boundary in itself.
pub struct SharedTokenAuthorizer {
    token: Vec<u8>,
}

impl SharedTokenAuthorizer {
    pub fn new(token: Vec<u8>) -> Self {
        Self { token }
    }
}

impl Authorizer for SharedTokenAuthorizer {
    fn rights_for(&self, blob: &AuthorizationBlob) -> Rights {
        if !self.token.is_empty() && blob.0 == self.token {
            Rights::LOGIN | Rights::MODIFY
        } else {
            Rights::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_grants_both_rights() {
        let authz = SharedTokenAuthorizer::new(b"secret".to_vec());
        let rights = authz.rights_for(&AuthorizationBlob(b"secret".to_vec()));
        assert!(rights.contains(Rights::LOGIN));
        assert!(rights.contains(Rights::MODIFY));
    }

    #[test]
    fn mismatched_token_grants_nothing() {
        let authz = SharedTokenAuthorizer::new(b"secret".to_vec());
        let rights = authz.rights_for(&AuthorizationBlob(b"wrong".to_vec()));
        assert!(rights.is_empty());
    }

    #[test]
    fn empty_configured_token_never_authorizes() {
        let authz = SharedTokenAuthorizer::new(Vec::new());
        let rights = authz.rights_for(&AuthorizationBlob(Vec::new()));
        assert!(rights.is_empty());
    }
}

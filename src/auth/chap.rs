//! CHAP (RFC 1994) challenge/response math used during Login(Security)
//! negotiation, plus the mutual-authentication extension described in RFC
//! 3720 §8. The stage sequencing that drives these calculations lives in
//! `crate::login::query`; this module only holds the algorithm.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result, bail, ensure};
use md5::{Digest, Md5};
use rand::Rng;

use crate::models::text::codec::{decode_chap_hex, encode_chap_hex, parse_to_map};

/// RFC 3720 §8 does not mandate a minimum CHAP secret length; this follows
/// the common conservative reading (at least 12 bytes).
pub const MIN_SECRET_LEN: usize = 12;

/// The default CHAP algorithm this initiator proposes via `CHAP_A` (5 = MD5,
/// the only algorithm value the RFC currently defines).
pub const CHAP_ALGORITHM_MD5: u8 = 5;

/// Rejects secrets shorter than [`MIN_SECRET_LEN`].
pub fn validate_secret(secret: &[u8]) -> Result<()> {
    ensure!(
        secret.len() >= MIN_SECRET_LEN,
        "CHAP secret must be at least {MIN_SECRET_LEN} bytes, got {}",
        secret.len()
    );
    Ok(())
}

/// CHAP_R = MD5(id || secret || challenge), returned as a canonical
/// `0x`-prefixed hex string.
pub fn compute_response(id: u8, secret: &[u8], challenge: &[u8]) -> String {
    let mut h = Md5::new();
    h.update([id]);
    h.update(secret);
    h.update(challenge);
    encode_chap_hex(&h.finalize())
}

/// Generates a fresh CHAP identifier and challenge of `len` bytes, for use
/// when this initiator issues its own challenge during mutual authentication.
pub fn generate_challenge(len: usize) -> (u8, Vec<u8>) {
    let mut rng = rand::rng();
    let id = rng.random::<u8>();
    let mut challenge = vec![0u8; len];
    rng.fill(challenge.as_mut_slice());
    (id, challenge)
}

/// Parses a `CHAP_I=<id>` / `CHAP_C=<hex>` data segment sent by the target.
pub fn parse_challenge(data: &[u8]) -> Result<(u8, Vec<u8>)> {
    let map = parse_to_map(data)?;
    let id: u8 = map
        .get("CHAP_I")
        .and_then(|v| v.first())
        .context("missing CHAP_I")?
        .trim()
        .parse()
        .context("CHAP_I is not a valid u8")?;
    let challenge = map
        .get("CHAP_C")
        .and_then(|v| v.first())
        .context("missing CHAP_C")?;
    let challenge = decode_chap_hex(challenge)?;
    Ok((id, challenge))
}

/// Verifies the target's `CHAP_N`/`CHAP_R` reply against the mutual secret
/// this initiator expects the target to know, for the challenge this
/// initiator issued.
pub fn verify_target_response(
    expected_identity: &str,
    mutual_secret: &[u8],
    id: u8,
    challenge: &[u8],
    chap_n: &str,
    chap_r_hex: &str,
) -> Result<()> {
    if chap_n != expected_identity {
        bail!(
            "mutual CHAP identity mismatch: expected '{expected_identity}', target sent \
             '{chap_n}'"
        );
    }
    let want = compute_response(id, mutual_secret, challenge);
    if !chap_r_hex.eq_ignore_ascii_case(&want) {
        bail!("mutual CHAP response verification failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_matches_known_vector() {
        // id=1, secret="secretpw123", challenge=0x0102030405
        let resp = compute_response(1, b"secretpw123", &[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert!(resp.starts_with("0x"));
        assert_eq!(resp.len(), 2 + 32);
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(validate_secret(b"short").is_err());
        assert!(validate_secret(b"twelve-bytes").is_ok());
    }

    #[test]
    fn mutual_verification_round_trips() {
        let (id, challenge) = generate_challenge(16);
        let secret = b"mutualsecret123".to_vec();
        let resp = compute_response(id, &secret, &challenge);
        assert!(verify_target_response("target-iqn", &secret, id, &challenge, "target-iqn", &resp).is_ok());
        assert!(verify_target_response("target-iqn", &secret, id, &challenge, "wrong", &resp).is_err());
    }

    #[test]
    fn parses_challenge_segment() {
        let data = crate::models::text::codec::encode_pairs([
            ("CHAP_I", "7"),
            ("CHAP_C", "0x0a0b0c"),
        ]);
        let (id, challenge) = parse_challenge(&data).unwrap();
        assert_eq!(id, 7);
        assert_eq!(challenge, vec![0x0a, 0x0b, 0x0c]);
    }
}

//! Key/value codec for iSCSI text PDUs (Login negotiation and Text/SendTargets
//! payloads), per RFC 3720 §5.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};

/// Parses a null-delimited `key=value` data segment into an ordered map.
///
/// A key may repeat (e.g. `TargetName` in a SendTargets response); later
/// occurrences are appended so callers can recover every value in order.
pub fn parse_to_map(data: &[u8]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in parse_to_pairs(data)? {
        map.entry(key).or_default().push(value);
    }
    Ok(map)
}

/// Parses a null-delimited `key=value` data segment preserving wire order.
pub fn parse_to_pairs(data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in data.split(|b| *b == 0) {
        if entry.is_empty() {
            continue;
        }
        let entry_str =
            std::str::from_utf8(entry).context("text segment contains invalid UTF-8")?;
        let (key, value) = entry_str
            .split_once('=')
            .ok_or_else(|| anyhow!("text entry '{entry_str}' is missing '=' separator"))?;
        out.push((key.to_string(), value.to_string()));
    }
    Ok(out)
}

/// Encodes an ordered sequence of key/value pairs into a null-delimited data
/// segment. Callers control ordering; no sorting is applied here (negotiation
/// proposals sort explicitly where the RFC requires a canonical order).
pub fn encode_pairs<'a, I, K, V>(pairs: I) -> Vec<u8>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str> + 'a,
    V: AsRef<str> + 'a,
{
    let mut out = Vec::new();
    for (k, v) in pairs {
        out.extend_from_slice(k.as_ref().as_bytes());
        out.push(b'=');
        out.extend_from_slice(v.as_ref().as_bytes());
        out.push(0);
    }
    out
}

/// Decodes a CHAP hex value (`CHAP_C`/`CHAP_R`/`CHAP_I` style) into raw bytes.
///
/// Tolerates an optional `0x`/`0X`/`x`/`X` prefix (RFC 3720 §5.1) and an odd
/// number of hex digits (a leading zero nibble is implied, matching common
/// initiator behavior).
pub fn decode_chap_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .or_else(|| trimmed.strip_prefix('x'))
        .or_else(|| trimmed.strip_prefix('X'))
        .unwrap_or(trimmed);
    let padded;
    let digits = if digits.len() % 2 != 0 {
        padded = format!("0{digits}");
        padded.as_str()
    } else {
        digits
    };
    hex::decode(digits).context("invalid CHAP hex value")
}

/// Encodes raw bytes as a canonical `0x`-prefixed lowercase hex CHAP value.
pub fn encode_chap_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_pairs() {
        let data = encode_pairs([("HeaderDigest", "None"), ("DataDigest", "CRC32C")]);
        let pairs = parse_to_pairs(&data).unwrap();
        assert_eq!(pairs, vec![
            ("HeaderDigest".to_string(), "None".to_string()),
            ("DataDigest".to_string(), "CRC32C".to_string()),
        ]);
    }

    #[test]
    fn map_collects_repeated_keys() {
        let data = encode_pairs([("TargetName", "iqn.a"), ("TargetName", "iqn.b")]);
        let map = parse_to_map(&data).unwrap();
        assert_eq!(map["TargetName"], vec!["iqn.a".to_string(), "iqn.b".to_string()]);
    }

    #[test]
    fn chap_hex_tolerates_prefix_and_odd_length() {
        assert_eq!(decode_chap_hex("0x1A2B").unwrap(), vec![0x1A, 0x2B]);
        assert_eq!(decode_chap_hex("1A2B").unwrap(), vec![0x1A, 0x2B]);
        assert_eq!(decode_chap_hex("0xA2B").unwrap(), vec![0x0A, 0x2B]);
    }

    #[test]
    fn chap_hex_encode_is_lowercase_prefixed() {
        assert_eq!(encode_chap_hex(&[0xDE, 0xAD]), "0xdead");
    }
}

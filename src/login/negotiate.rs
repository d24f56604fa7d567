//! Operational parameter negotiation (RFC 3720 §11/§12, reconciliation rules
//! per §5.3). The teacher only checked that the target echoed back exactly
//! what was proposed (`verify_operational_negotiation`); real negotiation
//! lets either side offer a different value and reduces the pair down to the
//! effective one per key, which is what this module adds.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};

use crate::cfg::{
    config::{Config, NegotiatedParams, login_keys_operational},
    enums::Digest,
};

/// How a key's final value is derived from what each side proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// The smaller of the two numeric values wins (e.g. `MaxBurstLength`).
    Min,
    /// The larger of the two numeric values wins (none of the currently
    /// negotiated keys use this, kept for Table 13 completeness).
    Max,
    /// Boolean AND (e.g. `ImmediateData`).
    And,
    /// Boolean OR (e.g. `InitialR2T`, `DataPDUInOrder`).
    Or,
    /// Not negotiated; each direction declares its own value independently
    /// (`MaxRecvDataSegmentLength`).
    Declared,
    /// The target must echo exactly one of the values we offered
    /// (`HeaderDigest`/`DataDigest`, which we propose as a comma list).
    ChooseFromOffered,
}

/// Per-key reduction rules, RFC 3720 Table 13.
pub fn reduction_for_key(key: &str) -> Reduction {
    match key {
        "HeaderDigest" | "DataDigest" => Reduction::ChooseFromOffered,
        "MaxConnections" | "MaxOutstandingR2T" | "ErrorRecoveryLevel"
        | "FirstBurstLength" | "MaxBurstLength" | "DefaultTime2Retain"
        | "DefaultTime2Wait" => Reduction::Min,
        "InitialR2T" | "DataPDUInOrder" | "DataSequenceInOrder" => Reduction::Or,
        "ImmediateData" => Reduction::And,
        "MaxRecvDataSegmentLength" => Reduction::Declared,
        _ => Reduction::Declared,
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    Ok(match v {
        "Yes" => true,
        "No" => false,
        other => bail!("not a Yes/No value: {other}"),
    })
}

fn reconcile_numeric(proposed: &str, replied: &str, reduction: Reduction) -> Result<u64> {
    let p: u64 = proposed.parse().context("proposed value is not numeric")?;
    let r: u64 = replied.parse().context("replied value is not numeric")?;
    Ok(match reduction {
        Reduction::Min => p.min(r),
        Reduction::Max => p.max(r),
        _ => unreachable!("reconcile_numeric called with non-numeric reduction"),
    })
}

fn reconcile_bool(proposed: &str, replied: &str, reduction: Reduction) -> Result<bool> {
    let p = parse_bool(proposed)?;
    let r = parse_bool(replied)?;
    Ok(match reduction {
        Reduction::And => p && r,
        Reduction::Or => p || r,
        _ => unreachable!("reconcile_bool called with non-boolean reduction"),
    })
}

/// Reconciles every key the initiator proposed against the target's Login
/// Response negotiation payload, returning the map of effective values.
///
/// `proposed` and `replied` are both `key -> values` maps as produced by
/// [`crate::models::text::codec::parse_to_map`]; repeated keys are only
/// expected for list-valued keys like `HeaderDigest`.
pub fn reconcile(
    proposed: &BTreeMap<String, Vec<String>>,
    replied: &BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<String, String>> {
    let mut effective = BTreeMap::new();

    for (key, prop_values) in proposed {
        let reduction = reduction_for_key(key);
        let prop_value = prop_values
            .first()
            .with_context(|| format!("no proposed value for {key}"))?;

        let Some(reply_values) = replied.get(key) else {
            // The target declining to mention a key it has no opinion on is
            // valid; our own proposal stands.
            effective.insert(key.clone(), prop_value.clone());
            continue;
        };
        let reply_value = reply_values
            .first()
            .with_context(|| format!("empty reply for {key}"))?;

        let value = match reduction {
            Reduction::Min | Reduction::Max => {
                reconcile_numeric(prop_value, reply_value, reduction)?.to_string()
            },
            Reduction::And | Reduction::Or => {
                match reconcile_bool(prop_value, reply_value, reduction)? {
                    true => "Yes".to_string(),
                    false => "No".to_string(),
                }
            },
            Reduction::Declared => prop_value.clone(),
            Reduction::ChooseFromOffered => {
                let offered: Vec<&str> = prop_value.split(',').collect();
                if !offered.contains(&reply_value.as_str()) {
                    bail!(
                        "target chose '{reply_value}' for {key}, which was not among \
                         offered values '{prop_value}'"
                    );
                }
                reply_value.clone()
            },
        };
        effective.insert(key.clone(), value);
    }

    Ok(effective)
}

/// Applies the reconciled key/value map onto a [`NegotiatedParams`], the
/// struct that actually governs wire framing for the rest of the connection.
pub fn apply_effective_params(
    effective: &BTreeMap<String, String>,
    out: &mut NegotiatedParams,
) -> Result<()> {
    if let Some(v) = effective.get("HeaderDigest") {
        out.header_digest = if v == "CRC32C" { Digest::CRC32C } else { Digest::None };
    }
    if let Some(v) = effective.get("DataDigest") {
        out.data_digest = if v == "CRC32C" { Digest::CRC32C } else { Digest::None };
    }
    if let Some(v) = effective.get("MaxRecvDataSegmentLength") {
        out.max_recv_data_segment_length =
            v.parse().context("MaxRecvDataSegmentLength not numeric")?;
    }
    if let Some(v) = effective.get("MaxBurstLength") {
        out.max_burst_length = v.parse().context("MaxBurstLength not numeric")?;
    }
    if let Some(v) = effective.get("FirstBurstLength") {
        out.first_burst_length = v.parse().context("FirstBurstLength not numeric")?;
    }
    Ok(())
}

/// Runs the full reconciliation pass against the proposal this crate would
/// generate for `cfg`, and writes the result into `cfg.login.negotiation`.
pub fn negotiate_operational(
    cfg: &mut Config,
    replied_data: &[u8],
) -> Result<BTreeMap<String, String>> {
    use crate::models::text::codec::parse_to_map;

    let proposed_bytes = login_keys_operational(cfg);
    let proposed = parse_to_map(&proposed_bytes)?;
    let replied = parse_to_map(replied_data)?;

    let effective = reconcile(&proposed, &replied)?;
    apply_effective_params(&effective, &mut cfg.login.negotiation)?;
    Ok(effective)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<String>> {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.entry(k.to_string()).or_insert_with(Vec::new).push(v.to_string());
        }
        m
    }

    #[test]
    fn min_reduction_picks_smaller() {
        let proposed = map_of(&[("MaxBurstLength", "262144")]);
        let replied = map_of(&[("MaxBurstLength", "65536")]);
        let effective = reconcile(&proposed, &replied).unwrap();
        assert_eq!(effective["MaxBurstLength"], "65536");
    }

    #[test]
    fn max_reduction_picks_larger() {
        let proposed = map_of(&[("DefaultTime2Wait", "2")]);
        let replied = map_of(&[("DefaultTime2Wait", "5")]);
        let effective = reconcile(&proposed, &replied).unwrap();
        assert_eq!(effective["DefaultTime2Wait"], "5");
    }

    #[test]
    fn or_reduction_true_if_either_true() {
        let proposed = map_of(&[("InitialR2T", "No")]);
        let replied = map_of(&[("InitialR2T", "Yes")]);
        let effective = reconcile(&proposed, &replied).unwrap();
        assert_eq!(effective["InitialR2T"], "Yes");
    }

    #[test]
    fn and_reduction_false_if_either_false() {
        let proposed = map_of(&[("ImmediateData", "Yes")]);
        let replied = map_of(&[("ImmediateData", "No")]);
        let effective = reconcile(&proposed, &replied).unwrap();
        assert_eq!(effective["ImmediateData"], "No");
    }

    #[test]
    fn choose_from_offered_rejects_unoffered_choice() {
        let proposed = map_of(&[("HeaderDigest", "CRC32C,None")]);
        let replied = map_of(&[("HeaderDigest", "MD5")]);
        assert!(reconcile(&proposed, &replied).is_err());
    }

    #[test]
    fn choose_from_offered_accepts_listed_choice() {
        let proposed = map_of(&[("HeaderDigest", "CRC32C,None")]);
        let replied = map_of(&[("HeaderDigest", "None")]);
        let effective = reconcile(&proposed, &replied).unwrap();
        assert_eq!(effective["HeaderDigest"], "None");
    }
}

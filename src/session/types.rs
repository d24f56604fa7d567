//! Value types shared by the session lifecycle and session manager: targets,
//! portals, negotiated parameter snapshots, and discovery records (§3).

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hba::transport::PortalAddr;

/// Reserved IQN used for discovery-only sessions (RFC 3720 §12.1).
pub const DISCOVERY_TARGET_NAME: &str = "iqn.1900-01.com.iscsi-client-rs:discovery";

/// One side's authentication posture for a target (§3 **Auth**).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Auth {
    None,
    Chap { name: String, secret: String },
}

/// A target identified by its IQN, plus whatever alias it has advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub alias: Option<String>,
}

impl Target {
    pub fn is_discovery(&self) -> bool {
        self.name == DISCOVERY_TARGET_NAME
    }
}

/// Per-session negotiation cap (§3 **SessionConfig**).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_connections: u16,
    pub error_recovery_level: u8,
}

/// Per-connection digest posture (§3 **ConnectionConfig**).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub use_header_digest: bool,
    pub use_data_digest: bool,
}

/// Snapshot of the values actually agreed with the target for a session
/// (§3 **SessionParameters**).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub max_connections: u16,
    pub initial_r2t: bool,
    pub immediate_data: bool,
    pub max_burst_length: u32,
    pub first_burst_length: u32,
    pub max_outstanding_r2t: u16,
    pub data_pdu_in_order: bool,
    pub data_sequence_in_order: bool,
    pub default_time2wait: u16,
    pub default_time2retain: u16,
    pub error_recovery_level: u8,
    pub tsih: u16,
    pub tpgt: u16,
}

/// Snapshot of the values actually agreed with the target for a connection
/// (§3 **ConnectionParameters**).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    pub max_recv_data_segment_length: u32,
    pub max_send_data_segment_length: u32,
    pub use_header_digest: bool,
    pub use_data_digest: bool,
    pub initial_exp_stat_sn: u32,
}

/// TargetName → TPGT → ordered Portals, as produced by SendTargets (§3
/// **DiscoveryRecord**, §4.6 step 3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub targets: BTreeMap<String, BTreeMap<u16, Vec<PortalAddr>>>,
}

impl DiscoveryRecord {
    pub fn insert_portal(&mut self, target_name: &str, tpgt: u16, portal: PortalAddr) {
        self.targets
            .entry(target_name.to_string())
            .or_default()
            .entry(tpgt)
            .or_default()
            .push(portal);
    }

    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }
}

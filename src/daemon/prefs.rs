//! Persistent preferences store (§6 "Environment / persisted state"):
//! targets keyed by IQN, each carrying alias/auto-login/persistence/
//! config-type/session-config/portals/auth. Loaded the same way
//! `cfg::config::Config::load_from_file` loads the wire-negotiation config:
//! `serde_yaml` into a plain struct, normalized on load.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    hba::transport::PortalAddr,
    session::types::{Auth, ConnectionConfig, SessionConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ConfigType {
    Static,
    DynamicSendTargets,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetAuth {
    pub initiator: Option<Auth>,
    pub target: Option<Auth>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetPrefs {
    pub alias: Option<String>,
    #[serde(default)]
    pub auto_login: bool,
    #[serde(default = "default_persistent")]
    pub persistent: bool,
    pub config_type: ConfigType,
    /// Required when `config_type == DynamicSendTargets`.
    #[serde(default)]
    pub discovery_portal: Option<PortalAddr>,
    pub session_config: SessionConfig,
    pub portals: Vec<(PortalAddr, ConnectionConfig)>,
    pub auth: TargetAuth,
}

fn default_persistent() -> bool {
    true
}

impl TargetPrefs {
    pub fn portals(&self) -> impl Iterator<Item = (&PortalAddr, &ConnectionConfig)> {
        self.portals.iter().map(|(p, c)| (p, c))
    }

    pub fn discovery_portal(&self) -> Option<&PortalAddr> {
        self.discovery_portal.as_ref()
    }
}

/// Default initiator identity (§6): `iqn.2015-01.com.localhost` / `default`.
fn default_initiator_name() -> String {
    "iqn.2015-01.com.localhost".to_string()
}

fn default_initiator_alias() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreferencesDocument {
    #[serde(default)]
    pub targets: HashMap<String, TargetPrefs>,
    #[serde(default = "default_initiator_name")]
    pub initiator_name: String,
    #[serde(default = "default_initiator_alias")]
    pub initiator_alias: String,
}

impl Default for PreferencesDocument {
    fn default() -> Self {
        Self {
            targets: HashMap::new(),
            initiator_name: default_initiator_name(),
            initiator_alias: default_initiator_alias(),
        }
    }
}

/// Abstraction over where the preferences document lives, so the daemon's
/// supervisor logic doesn't hard-code a file path. Non-goal per SPEC_FULL.md:
/// no keychain integration, no CLI — the YAML-file implementation below is
/// ambient scaffolding to give the daemon something to run against.
pub trait PreferencesStore: Send + Sync {
    fn load(&self) -> Result<PreferencesDocument>;
    fn save(&self, doc: &PreferencesDocument) -> Result<()>;
}

/// Reads/writes the preferences document as YAML at a fixed path, mirroring
/// `Config::load_from_file`'s `serde_yaml::from_str` + `fs::read_to_string`
/// pattern.
pub struct YamlFilePreferencesStore {
    path: std::path::PathBuf,
}

impl YamlFilePreferencesStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl PreferencesStore for YamlFilePreferencesStore {
    fn load(&self) -> Result<PreferencesDocument> {
        if !self.path.exists() {
            return Ok(PreferencesDocument::default());
        }
        let s = fs::read_to_string(&self.path)
            .with_context(|| format!("reading preferences file {:?}", self.path))?;
        serde_yaml::from_str(&s).context("failed to parse preferences YAML")
    }

    fn save(&self, doc: &PreferencesDocument) -> Result<()> {
        let s = serde_yaml::to_string(doc).context("failed to serialize preferences")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating preferences directory {parent:?}"))?;
        }
        fs::write(&self.path, s).with_context(|| format!("writing preferences file {:?}", self.path))
    }
}

/// Purely in-memory store, for tests and for a daemon run with no durable
/// state requirement.
#[derive(Default)]
pub struct InMemoryPreferencesStore {
    doc: std::sync::Mutex<PreferencesDocument>,
}

impl InMemoryPreferencesStore {
    pub fn new(doc: PreferencesDocument) -> Self {
        Self { doc: std::sync::Mutex::new(doc) }
    }
}

impl PreferencesStore for InMemoryPreferencesStore {
    fn load(&self) -> Result<PreferencesDocument> {
        Ok(self.doc.lock().expect("preferences mutex poisoned").clone())
    }

    fn save(&self, doc: &PreferencesDocument) -> Result<()> {
        *self.doc.lock().expect("preferences mutex poisoned") = doc.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> PreferencesDocument {
        let mut targets = HashMap::new();
        targets.insert(
            "iqn.test:disk0".to_string(),
            TargetPrefs {
                alias: Some("disk0".to_string()),
                auto_login: true,
                persistent: true,
                config_type: ConfigType::Static,
                discovery_portal: None,
                session_config: SessionConfig { max_connections: 1, error_recovery_level: 0 },
                portals: vec![(
                    PortalAddr { address: "10.0.0.1".to_string(), port: 3260, interface: None },
                    ConnectionConfig { use_header_digest: false, use_data_digest: false },
                )],
                auth: TargetAuth { initiator: None, target: None },
            },
        );
        PreferencesDocument {
            targets,
            initiator_name: default_initiator_name(),
            initiator_alias: default_initiator_alias(),
        }
    }

    #[test]
    fn in_memory_store_roundtrips() {
        let store = InMemoryPreferencesStore::new(sample_doc());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.targets.len(), 1);
        assert!(loaded.targets["iqn.test:disk0"].auto_login);
    }

    #[test]
    fn yaml_store_missing_file_yields_default() {
        let store = YamlFilePreferencesStore::new("/nonexistent/path/prefs.yaml");
        let loaded = store.load().unwrap();
        assert!(loaded.targets.is_empty());
        assert_eq!(loaded.initiator_name, default_initiator_name());
    }

    #[test]
    fn yaml_store_roundtrips_through_tempfile() {
        let dir = std::env::temp_dir().join(format!(
            "iscsi-initiator-rs-prefs-test-{}",
            std::process::id()
        ));
        let path = dir.join("prefs.yaml");
        let store = YamlFilePreferencesStore::new(&path);
        store.save(&sample_doc()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.targets.len(), 1);
        let _ = fs::remove_dir_all(&dir);
    }
}

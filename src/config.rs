/**
* Copyright 2019 Comcast Cable Communications Management, LLC
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
* http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*
* SPDX-License-Identifier: Apache-2.0
*/
use std::time::Duration;

use crate::error::*;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Http,
    Https,
}

impl Default for TransportType {
    fn default() -> Self {
        TransportType::Http
    }
}

impl TransportType {
    pub fn scheme(self) -> &'static str {
        match self {
            TransportType::Http => "http",
            TransportType::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            TransportType::Http => 80,
            TransportType::Https => 443,
        }
    }
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq)]
pub enum StorageFamily {
    #[serde(rename = "ontap_cluster")]
    OntapCluster,
    #[serde(rename = "ontap_7mode")]
    Ontap7Mode,
}

impl Default for StorageFamily {
    fn default() -> Self {
        StorageFamily::OntapCluster
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct NetappConfig {
    /// The filer or cluster management endpoint to use
    pub server_hostname: String,
    /// Defaults to 80 for http and 443 for https
    pub server_port: Option<u16>,
    #[serde(default)]
    pub transport_type: TransportType,
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub storage_family: StorageFamily,
    /// Cluster mode only.  Luns are provisioned inside this vserver
    pub vserver: Option<String>,
    /// 7-mode only.  Vfiler to tunnel requests to
    pub vfiler: Option<String>,
    /// 7-mode only.  Comma separated list of volumes luns may live on
    pub volume_list: Option<String>,
    /// Requested sizes are multiplied by this when picking a volume
    #[serde(
        default = "default_size_multiplier",
        deserialize_with = "crate::deserialize_string_or_float"
    )]
    pub size_multiplier: f64,
    pub volume_backend_name: Option<String>,
    /// Optional certificate file to use against the server
    /// der encoded
    pub certificate: Option<String>,
    #[serde(default = "default_clone_poll_interval")]
    pub clone_poll_interval_secs: u64,
    /// Upper bound on clone status queries before giving up.
    /// `None` waits forever.
    #[serde(default = "default_clone_poll_max_attempts")]
    pub clone_poll_max_attempts: Option<u32>,
}

fn default_size_multiplier() -> f64 {
    1.2
}

fn default_clone_poll_interval() -> u64 {
    1
}

fn default_clone_poll_max_attempts() -> Option<u32> {
    Some(3600)
}

impl NetappConfig {
    /// Ensure that the flags we care about are set
    pub fn check_flags(&self) -> StorageResult<()> {
        let required = [
            ("server_hostname", &self.server_hostname),
            ("login", &self.login),
            ("password", &self.password),
        ];
        for (flag, value) in required.iter() {
            if value.trim().is_empty() {
                return Err(StorageError::InvalidConfig(format!("{} is not set", flag)));
            }
        }
        if self.server_port == Some(0) {
            return Err(StorageError::InvalidConfig(
                "server_port is not set".to_string(),
            ));
        }
        if self.size_multiplier <= 0.0 {
            return Err(StorageError::InvalidConfig(format!(
                "size_multiplier must be positive, got {}",
                self.size_multiplier
            )));
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.server_port
            .unwrap_or_else(|| self.transport_type.default_port())
    }

    pub fn volume_list(&self) -> Vec<String> {
        match self.volume_list {
            Some(ref list) => list
                .split(',')
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
                .collect(),
            None => vec![],
        }
    }

    pub fn clone_poll(&self) -> ClonePollConfig {
        ClonePollConfig {
            interval: Duration::from_secs(self.clone_poll_interval_secs),
            max_attempts: self.clone_poll_max_attempts,
        }
    }
}

/// How a running clone job is waited on
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClonePollConfig {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ClonePollConfig {
    fn default() -> Self {
        ClonePollConfig {
            interval: Duration::from_secs(default_clone_poll_interval()),
            max_attempts: default_clone_poll_max_attempts(),
        }
    }
}

#[test]
fn test_config_defaults() {
    let config: NetappConfig = serde_json::from_str(
        r#"{
            "server_hostname": "filer1",
            "login": "admin",
            "password": "secret",
            "volume_list": " vol1, vol2 ,,"
        }"#,
    )
    .unwrap();
    assert_eq!(StorageFamily::OntapCluster, config.storage_family);
    assert_eq!(TransportType::Http, config.transport_type);
    assert_eq!(80, config.port());
    assert_eq!(vec!["vol1".to_string(), "vol2".to_string()], config.volume_list());
    assert_eq!(ClonePollConfig::default(), config.clone_poll());
    assert!(config.check_flags().is_ok());
}

#[test]
fn test_config_seven_mode() {
    let config: NetappConfig = serde_json::from_str(
        r#"{
            "server_hostname": "filer1",
            "server_port": 8443,
            "transport_type": "https",
            "login": "admin",
            "password": "",
            "storage_family": "ontap_7mode",
            "vfiler": "vf1",
            "clone_poll_max_attempts": null
        }"#,
    )
    .unwrap();
    assert_eq!(StorageFamily::Ontap7Mode, config.storage_family);
    assert_eq!(8443, config.port());
    assert_eq!(None, config.clone_poll().max_attempts);
    match config.check_flags() {
        Err(StorageError::InvalidConfig(msg)) => assert!(msg.contains("password")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_size_multiplier_as_string() {
    let config: NetappConfig = serde_json::from_str(
        r#"{
            "server_hostname": "c1",
            "login": "admin",
            "password": "p",
            "size_multiplier": " 1.5"
        }"#,
    )
    .unwrap();
    assert_eq!(1.5, config.size_multiplier);

    let config: NetappConfig = serde_json::from_str(
        r#"{"server_hostname": "c1", "login": "admin", "password": "p", "size_multiplier": 2}"#,
    )
    .unwrap();
    assert_eq!(2.0, config.size_multiplier);
    assert!(serde_json::from_str::<NetappConfig>(
        r#"{"server_hostname": "c1", "login": "a", "password": "p", "size_multiplier": "big"}"#
    )
    .is_err());
}

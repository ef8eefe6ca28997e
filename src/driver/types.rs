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
use std::collections::{BTreeMap, HashMap};

use crate::error::*;

use serde::{Serialize, Serializer};

pub const VENDOR_NAME: &str = "NetApp";
pub const DRIVER_VERSION: &str = "1.0.0";
pub const STORAGE_PROTOCOL: &str = "iSCSI";

/// A volume as the host framework describes it.  `size` is in GiB.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub size: u64,
    /// "method username secret"
    pub provider_auth: Option<String>,
    #[serde(default)]
    pub extra_specs: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub volume_name: String,
    /// GiB
    pub volume_size: u64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Connector {
    pub initiator: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExportInfo {
    pub provider_location: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IscsiProperties {
    pub target_discovered: bool,
    pub target_portal: String,
    pub target_iqn: String,
    pub target_lun: String,
    pub volume_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<String>,
}

impl IscsiProperties {
    pub fn set_auth(&mut self, provider_auth: &str) -> StorageResult<()> {
        let parts: Vec<&str> = provider_auth.split_whitespace().collect();
        match parts.as_slice() {
            [method, username, secret] => {
                self.auth_method = Some(method.to_string());
                self.auth_username = Some(username.to_string());
                self.auth_password = Some(secret.to_string());
                Ok(())
            }
            _ => Err(StorageError::new(format!(
                "provider auth must be \"method username secret\", got {} fields",
                parts.len()
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub driver_volume_type: String,
    pub data: IscsiProperties,
}

impl ConnectionInfo {
    pub fn iscsi(data: IscsiProperties) -> Self {
        ConnectionInfo {
            driver_volume_type: "iscsi".to_string(),
            data,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Capacity {
    Gb(u64),
    /// Not computed yet
    Infinite,
}

impl Serialize for Capacity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match *self {
            Capacity::Gb(gb) => serializer.serialize_u64(gb),
            Capacity::Infinite => serializer.serialize_str("infinite"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VolumeStats {
    pub volume_backend_name: String,
    pub vendor_name: String,
    pub driver_version: String,
    pub storage_protocol: String,
    pub total_capacity_gb: Capacity,
    pub free_capacity_gb: Capacity,
    pub reserved_percentage: u32,
    #[serde(rename = "QoS_support")]
    pub qos_support: bool,
    /// netapp_* capability flags
    #[serde(flatten)]
    pub capabilities: BTreeMap<String, String>,
}

impl VolumeStats {
    pub fn new(backend_name: &str, total: Capacity, free: Capacity) -> Self {
        VolumeStats {
            volume_backend_name: backend_name.to_string(),
            vendor_name: VENDOR_NAME.to_string(),
            driver_version: DRIVER_VERSION.to_string(),
            storage_protocol: STORAGE_PROTOCOL.to_string(),
            total_capacity_gb: total,
            free_capacity_gb: free,
            reserved_percentage: 0,
            qos_support: false,
            capabilities: BTreeMap::new(),
        }
    }
}

#[test]
fn test_provider_auth() {
    let mut props = IscsiProperties::default();
    props.set_auth("CHAP user secret").unwrap();
    assert_eq!(Some("CHAP"), props.auth_method.as_deref());
    assert_eq!(Some("secret"), props.auth_password.as_deref());
    assert!(props.set_auth("CHAP user").is_err());
}

#[test]
fn test_connection_info_json() {
    let props = IscsiProperties {
        target_portal: "10.0.0.1:3260".into(),
        target_iqn: "iqn.1992-08.com.netapp:sn.1".into(),
        target_lun: "0".into(),
        volume_id: "v-1".into(),
        ..Default::default()
    };
    let json = serde_json::to_value(ConnectionInfo::iscsi(props)).unwrap();
    assert_eq!("iscsi", json["driver_volume_type"]);
    assert_eq!(false, json["data"]["target_discovered"]);
    assert_eq!("10.0.0.1:3260", json["data"]["target_portal"]);
    assert!(json["data"].get("auth_method").is_none());
}

#[test]
fn test_stats_json() {
    let mut stats = VolumeStats::new("NetApp_iSCSI_7mode_direct", Capacity::Infinite, Capacity::Gb(12));
    stats
        .capabilities
        .insert("netapp_dedup".to_string(), "true".to_string());
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!("infinite", json["total_capacity_gb"]);
    assert_eq!(12, json["free_capacity_gb"]);
    assert_eq!(false, json["QoS_support"]);
    assert_eq!("true", json["netapp_dedup"]);
    assert_eq!("NetApp", json["vendor_name"]);
}

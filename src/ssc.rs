//! Storage service catalog for clustered arrays: what each flexvol in the
//! vserver offers, used to match volume extra specs to a container.
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
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::client::CmodeClient;
use crate::element::Element;
use crate::error::*;

use log::{debug, warn};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SscVolume {
    pub name: String,
    pub vserver: String,
    pub size_available: u64,
    pub size_total: u64,
    pub space_guarantee: Option<String>,
    pub thin: bool,
    pub dedup: bool,
    pub compression: bool,
    pub mirrored: bool,
}

fn is_true(value: Option<&str>) -> bool {
    value.map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

impl SscVolume {
    /// Build from a volume-attributes record.  Volumes luns can't live on
    /// (offline, vserver root, data protection) come back as `None`.
    pub fn from_attributes(attrs: &Element) -> StorageResult<Option<SscVolume>> {
        let id = match attrs.child("volume-id-attributes") {
            Some(id) => id,
            None => return Ok(None),
        };
        let name = match id.child_content("name") {
            Some(name) => name,
            None => return Ok(None),
        };
        if id.child_content("type").unwrap_or("rw") != "rw" {
            debug!("Skipping non rw volume {}", name);
            return Ok(None);
        }
        if let Some(state) = attrs.child("volume-state-attributes") {
            if state.child_content("state").unwrap_or("online") != "online"
                || is_true(state.child_content("is-vserver-root"))
            {
                debug!("Skipping volume {}", name);
                return Ok(None);
            }
        }

        let mut vol = SscVolume {
            name: name.to_string(),
            vserver: id
                .child_content("owning-vserver-name")
                .unwrap_or_default()
                .to_string(),
            ..Default::default()
        };
        if let Some(space) = attrs.child("volume-space-attributes") {
            vol.size_available = space.child_parse("size-available")?.unwrap_or(0);
            vol.size_total = space.child_parse("size-total")?.unwrap_or(0);
            vol.space_guarantee = space.child_content("space-guarantee").map(String::from);
            vol.thin = vol.space_guarantee.as_deref() == Some("none");
        }
        if let Some(mirror) = attrs.child("volume-mirror-attributes") {
            vol.mirrored = is_true(mirror.child_content("is-snapmirror-source"));
        }
        Ok(Some(vol))
    }
}

/// Extra spec values come in as "true", "false" or "<is> True"
fn spec_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    let value = value.strip_prefix("<is>").unwrap_or(value).trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Unknown keys and non boolean values place no constraint
pub fn volume_matches(vol: &SscVolume, extra_specs: &HashMap<String, String>) -> bool {
    extra_specs.iter().all(|(key, value)| {
        let want = match spec_bool(value) {
            Some(want) => want,
            None => return true,
        };
        match key.as_str() {
            "netapp_mirrored" => vol.mirrored == want,
            "netapp_unmirrored" => vol.mirrored != want,
            "netapp_dedup" => vol.dedup == want,
            "netapp_nodedup" => vol.dedup != want,
            "netapp_compression" => vol.compression == want,
            "netapp_nocompression" => vol.compression != want,
            "netapp_thin_provisioned" => vol.thin == want,
            "netapp_thick_provisioned" => vol.thin != want,
            _ => true,
        }
    })
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SscCatalog {
    volumes: Vec<SscVolume>,
}

impl SscCatalog {
    pub fn new(volumes: Vec<SscVolume>) -> Self {
        SscCatalog { volumes }
    }

    pub fn volumes(&self) -> &[SscVolume] {
        &self.volumes
    }

    pub fn volumes_for_specs(&self, extra_specs: &HashMap<String, String>) -> Vec<SscVolume> {
        self.volumes
            .iter()
            .filter(|v| volume_matches(v, extra_specs))
            .cloned()
            .collect()
    }

    /// Replace the entries for `names` with whatever was found for them
    pub fn merge(&mut self, names: &[String], refreshed: Vec<SscVolume>) {
        self.volumes.retain(|v| !names.contains(&v.name));
        self.volumes.extend(refreshed);
    }

    pub fn largest_available(&self) -> Option<&SscVolume> {
        self.volumes.iter().max_by_key(|v| v.size_available)
    }

    /// The netapp_* capability flags reported with the volume stats
    pub fn capability_flags(&self) -> BTreeMap<String, String> {
        let all = self.volumes.len();
        let count = |f: fn(&SscVolume) -> bool| self.volumes.iter().filter(|v| f(v)).count();
        let mirrored = count(|v| v.mirrored);
        let dedup = count(|v| v.dedup);
        let compression = count(|v| v.compression);
        let thin = count(|v| v.thin);

        let flag = |b: bool| String::from(if b { "true" } else { "false" });
        let mut flags = BTreeMap::new();
        flags.insert("netapp_mirrored".to_string(), flag(mirrored > 0));
        flags.insert("netapp_unmirrored".to_string(), flag(all > mirrored));
        flags.insert("netapp_dedup".to_string(), flag(dedup > 0));
        flags.insert("netapp_nodedup".to_string(), flag(all > dedup));
        flags.insert("netapp_compression".to_string(), flag(compression > 0));
        flags.insert("netapp_nocompression".to_string(), flag(all > compression));
        flags.insert("netapp_thin_provisioned".to_string(), flag(thin > 0));
        flags.insert("netapp_thick_provisioned".to_string(), flag(all > thin));
        flags
    }
}

/// Query the vserver's volumes, all of them or only `names`, along with
/// their dedupe and compression state
pub fn query_cluster_ssc(
    client: &CmodeClient,
    names: Option<&[String]>,
) -> StorageResult<Vec<SscVolume>> {
    let mut volumes = Vec::new();
    for attrs in client.get_volumes(names)? {
        if let Some(vol) = SscVolume::from_attributes(&attrs)? {
            volumes.push(vol);
        }
    }

    // sis state is informational; a failure leaves the flags off
    match client.get_sis_status() {
        Ok(sis) => {
            let by_path: HashMap<&str, &Element> = sis
                .iter()
                .filter_map(|s| s.child_content("path").map(|p| (p, s)))
                .collect();
            for vol in volumes.iter_mut() {
                if let Some(info) = by_path.get(format!("/vol/{}", vol.name).as_str()) {
                    vol.dedup = info.child_content("state") == Some("enabled");
                    vol.compression = is_true(info.child_content("is-compression-enabled"));
                }
            }
        }
        Err(e) => warn!("Error getting sis status for vserver {}: {}", client.vserver(), e),
    }
    debug!("Found {} eligible volumes", volumes.len());
    Ok(volumes)
}

/// Volumes whose catalog entry is out of date
#[derive(Debug, Default)]
pub struct StaleVolumes {
    names: Mutex<HashSet<String>>,
}

impl StaleVolumes {
    pub fn new() -> Self {
        StaleVolumes::default()
    }

    pub fn add(&self, volume: &str) {
        self.names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(volume.to_string());
    }

    /// Take every stale name, leaving the set empty
    pub fn drain(&self) -> Vec<String> {
        let mut names = self
            .names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut drained: Vec<String> = names.drain().collect();
        drained.sort();
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }
}

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
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ArrayMode, Capacity, VolumeStats, GIB, IGROUP_PREFIX};
use crate::client::{CmodeClient, LunClient};
use crate::clone::BlockSpan;
use crate::config::NetappConfig;
use crate::element::Element;
use crate::error::*;
use crate::lun::{LunMapping, LunMetadata, NetAppLun};
use crate::ssc::{query_cluster_ssc, SscCatalog, SscVolume, StaleVolumes};
use crate::transport::Transport;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};

pub const DEFAULT_VSERVER: &str = "openstack";
pub const DEFAULT_BACKEND_NAME: &str = "NetApp_iSCSI_Cluster_direct";
pub const QOS_POLICY_GROUP_SPEC: &str = "netapp:qos_policy_group";
/// Api version assumed until the array tells us
const INITIAL_API_VERSION: (u32, u32) = (1, 15);
/// Seconds between full catalog refreshes
const SSC_REFRESH_INTERVAL: i64 = 1800;

#[derive(Default)]
struct SscState {
    catalog: Option<SscCatalog>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Clustered Data ONTAP.  Luns live in flexvols of one vserver, picked
/// from the storage service catalog.
pub struct ClusterMode {
    client: CmodeClient,
    size_multiplier: f64,
    backend_name: String,
    ssc: Mutex<SscState>,
    stale_vols: StaleVolumes,
}

impl ClusterMode {
    pub fn new(client: CmodeClient, size_multiplier: f64, backend_name: Option<&str>) -> Self {
        ClusterMode {
            client,
            size_multiplier,
            backend_name: backend_name.unwrap_or(DEFAULT_BACKEND_NAME).to_string(),
            ssc: Mutex::new(SscState::default()),
            stale_vols: StaleVolumes::new(),
        }
    }

    /// Negotiate the api version and build the mode
    pub fn setup(
        transport: Arc<dyn Transport>,
        vserver: &str,
        config: &NetappConfig,
    ) -> StorageResult<ClusterMode> {
        transport.set_api_version(INITIAL_API_VERSION.0, INITIAL_API_VERSION.1);
        let client = CmodeClient::new(transport.clone(), vserver);
        let (major, minor) = client.get_ontapi_version()?;
        transport.set_api_version(major, minor);
        debug!("Using ONTAPI {}.{} with vserver {}", major, minor, vserver);
        Ok(ClusterMode::new(
            client,
            config.size_multiplier,
            config.volume_backend_name.as_deref(),
        ))
    }

    pub fn stale_vols(&self) -> &StaleVolumes {
        &self.stale_vols
    }

    fn lock_ssc(&self) -> MutexGuard<'_, SscState> {
        self.ssc.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bring the catalog up to date.  Everything is reloaded when the
    /// catalog is missing or old, otherwise only the stale volumes.
    pub fn refresh_ssc(&self) -> StorageResult<()> {
        let mut guard = self.lock_ssc();
        let state = &mut *guard;
        let now = Utc::now();
        let expired = match state.refreshed_at {
            Some(at) => now - at > Duration::seconds(SSC_REFRESH_INTERVAL),
            None => true,
        };
        match state.catalog {
            Some(ref mut catalog) if !expired => {
                let stale = self.stale_vols.drain();
                if !stale.is_empty() {
                    debug!("Refreshing stale volumes {:?}", stale);
                    match query_cluster_ssc(&self.client, Some(stale.as_slice())) {
                        Ok(refreshed) => catalog.merge(&stale, refreshed),
                        Err(e) => {
                            for vol in &stale {
                                self.stale_vols.add(vol);
                            }
                            return Err(e);
                        }
                    }
                }
            }
            _ => {
                info!("Running cluster ssc refresh for vserver {}", self.client.vserver());
                let volumes = query_cluster_ssc(&self.client, None)?;
                self.stale_vols.drain();
                state.catalog = Some(SscCatalog::new(volumes));
                state.refreshed_at = Some(now);
            }
        }
        Ok(())
    }

    /// Volumes matching the extra specs with room for `size` bytes,
    /// most free space first
    fn get_avl_volumes(
        &self,
        size: f64,
        extra_specs: &HashMap<String, String>,
    ) -> StorageResult<Vec<SscVolume>> {
        if self.lock_ssc().catalog.is_none() {
            self.refresh_ssc()?;
        }
        let state = self.lock_ssc();
        let mut volumes = match state.catalog {
            Some(ref catalog) => catalog.volumes_for_specs(extra_specs),
            None => vec![],
        };
        volumes.sort_by(|a, b| b.size_available.cmp(&a.size_available));
        volumes.retain(|v| v.size_available as f64 >= size);
        Ok(volumes)
    }
}

impl ArrayMode for ClusterMode {
    fn client(&self) -> &dyn LunClient {
        &self.client
    }

    fn create_lun_on_eligible_vol(
        &self,
        name: &str,
        size: u64,
        metadata: &mut LunMetadata,
        extra_specs: &HashMap<String, String>,
    ) -> StorageResult<()> {
        let req_size = size as f64 * self.size_multiplier;
        let mut specs = extra_specs.clone();
        let qos_policy_group = specs.remove(QOS_POLICY_GROUP_SPEC);
        let volumes = self.get_avl_volumes(req_size, &specs)?;
        if volumes.is_empty() {
            return Err(StorageError::BackendCapacity(format!(
                "Failed to get vol with required size and extra specs for volume: {}",
                name
            )));
        }

        let mut last_error = None;
        for vol in volumes {
            let created = self.client.create_lun(
                &vol.name,
                name,
                size,
                metadata,
                qos_policy_group.as_deref(),
            );
            self.stale_vols.add(&vol.name);
            match created {
                Ok(()) => {
                    metadata.path = Some(format!("/vol/{}/{}", vol.name, name));
                    metadata.volume = Some(vol.name.clone());
                    metadata.qtree = None;
                    metadata.vserver = Some(self.client.vserver().to_string());
                    return Ok(());
                }
                Err(e) => {
                    warn!("Error provisioning vol {} on {}. Details: {}", name, vol.name, e);
                    last_error = Some(e);
                }
            }
        }
        Err(StorageError::BackendApi(format!(
            "Failed to provision lun {} on any eligible volume. Last error: {}",
            name,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn create_lun_handle(&self, metadata: &LunMetadata) -> String {
        format!(
            "{}:{}",
            metadata.vserver.as_deref().unwrap_or(self.client.vserver()),
            metadata.path.as_deref().unwrap_or_default()
        )
    }

    fn find_mapped_lun_igroup(
        &self,
        path: &str,
        initiator: &str,
    ) -> StorageResult<Option<LunMapping>> {
        let igroups = self.client.get_igroup_by_initiator(initiator)?;
        if igroups.is_empty() {
            return Ok(None);
        }
        let maps = self.client.get_lun_map(path)?;
        for igroup in igroups.iter().filter(|ig| ig.name.starts_with(IGROUP_PREFIX)) {
            if let Some(mapping) = maps.iter().find(|m| m.initiator_group == igroup.name) {
                return Ok(Some(mapping.clone()));
            }
        }
        Ok(None)
    }

    fn clone_lun(
        &self,
        source: &NetAppLun,
        new_name: &str,
        space_reserved: bool,
        span: BlockSpan,
    ) -> StorageResult<NetAppLun> {
        let volume = source.metadata.require_volume(&source.name)?;
        self.client
            .clone_lun(volume, &source.name, new_name, space_reserved, span)?;
        self.stale_vols.add(volume);

        let new_path = format!("/vol/{}/{}", volume, new_name);
        let luns = self.get_lun_by_args(&[
            ("vserver", self.client.vserver()),
            ("path", new_path.as_str()),
        ])?;
        let record = luns.first().ok_or_else(|| {
            StorageError::BackendApi(format!("No cloned lun named {} found on the filer", new_name))
        })?;
        let metadata = self.create_lun_meta(record);
        let size = record.child_parse("size")?.unwrap_or(0);
        Ok(NetAppLun::new(
            self.create_lun_handle(&metadata),
            new_name,
            size,
            metadata,
        ))
    }

    fn get_lun_by_args(&self, args: &[(&str, &str)]) -> StorageResult<Vec<Element>> {
        self.client.get_lun_by_args(args)
    }

    fn create_lun_meta(&self, lun: &Element) -> LunMetadata {
        LunMetadata {
            vserver: lun.child_content("vserver").map(String::from),
            volume: lun.child_content("volume").map(String::from),
            qtree: lun.child_content("qtree").map(String::from),
            path: lun.child_content("path").map(String::from),
            os_type: lun.child_content("multiprotocol-type").map(String::from),
            space_reserved: lun
                .child_content("is-space-reservation-enabled")
                .map(String::from),
        }
    }

    fn update_volume_stats(&self) -> StorageResult<VolumeStats> {
        if let Err(e) = self.refresh_ssc() {
            error!("Error refreshing the storage service catalog: {}", e);
        }
        let state = self.lock_ssc();
        let catalog = match state.catalog {
            Some(ref catalog) => catalog,
            None => {
                return Ok(VolumeStats::new(
                    &self.backend_name,
                    Capacity::Infinite,
                    Capacity::Infinite,
                ))
            }
        };
        let (total, free) = match catalog.largest_available() {
            Some(vol) => (vol.size_total / GIB, vol.size_available / GIB),
            None => (0, 0),
        };
        let mut stats = VolumeStats::new(&self.backend_name, Capacity::Gb(total), Capacity::Gb(free));
        stats.capabilities = catalog.capability_flags();
        Ok(stats)
    }

    fn lun_destroyed(&self, metadata: &LunMetadata) {
        if let Some(ref volume) = metadata.volume {
            self.stale_vols.add(volume);
        }
    }
}

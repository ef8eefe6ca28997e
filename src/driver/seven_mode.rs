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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ArrayMode, Capacity, VolumeStats, GIB};
use crate::client::{LunClient, SevenModeClient};
use crate::clone::{BlockSpan, CancelToken, ClonePoller};
use crate::config::NetappConfig;
use crate::element::Element;
use crate::error::*;
use crate::lun::{split_lun_path, LunMapping, LunMetadata, NetAppLun};
use crate::transport::Transport;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

pub const DEFAULT_BACKEND_NAME: &str = "NetApp_iSCSI_7mode_direct";
/// Seconds before capacity is recomputed on its own
const CAPACITY_REFRESH_INTERVAL: i64 = 1800;
/// Oldest api version the driver works with
const MIN_API_VERSION: (u32, u32) = (1, 9);

struct CapacityState {
    refreshed_at: Option<DateTime<Utc>>,
    /// Set after luns are created or destroyed
    voluntary: bool,
    total: Capacity,
    free: Capacity,
}

/// Data ONTAP operating in 7-mode, optionally through a vfiler
pub struct SevenMode {
    client: SevenModeClient,
    /// Prefix of every lun handle: `hostname[:vfiler]`
    owner: String,
    size_multiplier: f64,
    backend_name: String,
    capacity: Mutex<CapacityState>,
    refreshing: AtomicBool,
}

impl SevenMode {
    pub fn new(
        client: SevenModeClient,
        hostname: &str,
        vfiler: Option<&str>,
        size_multiplier: f64,
        backend_name: Option<&str>,
    ) -> Self {
        let owner = match vfiler {
            Some(vfiler) => format!("{}:{}", hostname, vfiler),
            None => hostname.to_string(),
        };
        SevenMode {
            client,
            owner,
            size_multiplier,
            backend_name: backend_name.unwrap_or(DEFAULT_BACKEND_NAME).to_string(),
            capacity: Mutex::new(CapacityState {
                refreshed_at: None,
                voluntary: false,
                total: Capacity::Infinite,
                free: Capacity::Infinite,
            }),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Negotiate the api version and build the mode
    pub fn setup(transport: Arc<dyn Transport>, config: &NetappConfig) -> StorageResult<SevenMode> {
        let poller = ClonePoller::new(config.clone_poll());
        let client = SevenModeClient::new(transport.clone(), config.volume_list(), poller);
        let (major, minor) = client.get_ontapi_version()?;
        transport.set_api_version(major, minor);
        debug!("Using ONTAPI {}.{}", major, minor);
        Ok(SevenMode::new(
            client,
            &config.server_hostname,
            config.vfiler.as_deref(),
            config.size_multiplier,
            config.volume_backend_name.as_deref(),
        ))
    }

    fn lock_capacity(&self) -> MutexGuard<'_, CapacityState> {
        self.capacity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request_capacity_refresh(&self) {
        self.lock_capacity().voluntary = true;
    }

    /// A volume the lun fits on: online, enough free space and either in
    /// the volume list or, without one, not the root volume
    fn get_avl_volume_by_size(&self, size: f64) -> StorageResult<Option<String>> {
        let volume_list = self.client.volume_list();
        for vol in self.client.get_filer_volumes(None)? {
            let name = match vol.child_content("name") {
                Some(name) => name,
                None => continue,
            };
            let available: f64 = vol.child_parse("size-available")?.unwrap_or(0.0);
            if vol.child_content("state") != Some("online") || available < size {
                continue;
            }
            if !volume_list.is_empty() {
                if volume_list.iter().any(|v| v == name) {
                    return Ok(Some(name.to_string()));
                }
            } else if self.client.get_vol_option(name, "root")?.as_deref() != Some("true") {
                return Ok(Some(name.to_string()));
            }
        }
        Ok(None)
    }

    /// Capacity in GiB of the usable volumes
    fn compute_capacity(&self) -> StorageResult<(u64, u64)> {
        let volume_list = self.client.volume_list();
        let mut total = 0u64;
        let mut free = 0u64;
        for vol in self.client.get_filer_volumes(None)? {
            let name = vol.child_content("name").unwrap_or_default();
            if !volume_list.is_empty() && !volume_list.iter().any(|v| v == name) {
                continue;
            }
            if vol.child_content("state") != Some("online")
                || vol.child_content("is-inconsistent") != Some("false")
                || vol.child_content("is-invalid") != Some("false")
            {
                continue;
            }
            total += vol.child_parse::<u64>("size-total")?.unwrap_or(0);
            free += vol.child_parse::<u64>("size-available")?.unwrap_or(0);
        }
        Ok((total / GIB, free / GIB))
    }

    /// Current capacity, recomputed when never computed, asked for or
    /// older than the refresh interval.  Only one recompute runs at a time;
    /// other callers get the last known values.
    fn get_capacity_info(&self) -> (Capacity, Capacity) {
        let due = {
            let state = self.lock_capacity();
            match state.refreshed_at {
                None => true,
                Some(at) => {
                    state.voluntary
                        || Utc::now() - at > Duration::seconds(CAPACITY_REFRESH_INTERVAL)
                }
            }
        };
        if due {
            if self
                .refreshing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.lock_capacity().voluntary = false;
                match self.compute_capacity() {
                    Ok((total, free)) => {
                        let mut state = self.lock_capacity();
                        state.total = Capacity::Gb(total);
                        state.free = Capacity::Gb(free);
                        state.refreshed_at = Some(Utc::now());
                    }
                    Err(e) => warn!("Error refreshing vol capacity. Message: {}", e),
                }
                self.refreshing.store(false, Ordering::SeqCst);
            } else {
                warn!("Volume refresh job already running. Returning...");
            }
        }
        let state = self.lock_capacity();
        (state.total, state.free)
    }
}

impl ArrayMode for SevenMode {
    fn client(&self) -> &dyn LunClient {
        &self.client
    }

    fn check_for_setup_error(&self) -> StorageResult<()> {
        match self.client.connection().api_version() {
            Some(version) if version >= MIN_API_VERSION => Ok(()),
            Some((major, minor)) => Err(StorageError::BackendApi(format!(
                "Unsupported ONTAP version {}.{}. ONTAP version 7.3.1 and above is supported.",
                major, minor
            ))),
            None => Err(StorageError::BackendApi(
                "Api version could not be determined.".to_string(),
            )),
        }
    }

    fn create_lun_on_eligible_vol(
        &self,
        name: &str,
        size: u64,
        metadata: &mut LunMetadata,
        _extra_specs: &HashMap<String, String>,
    ) -> StorageResult<()> {
        let req_size = size as f64 * self.size_multiplier;
        let volume = self.get_avl_volume_by_size(req_size)?.ok_or_else(|| {
            StorageError::BackendCapacity(format!(
                "Failed to get vol with required size for volume: {}",
                name
            ))
        })?;
        self.client.create_lun(&volume, name, size, metadata, None)?;
        metadata.path = Some(format!("/vol/{}/{}", volume, name));
        metadata.volume = Some(volume);
        metadata.qtree = None;
        self.request_capacity_refresh();
        Ok(())
    }

    fn create_lun_handle(&self, metadata: &LunMetadata) -> String {
        format!(
            "{}:{}",
            self.owner,
            metadata.path.as_deref().unwrap_or_default()
        )
    }

    fn find_mapped_lun_igroup(
        &self,
        path: &str,
        initiator: &str,
    ) -> StorageResult<Option<LunMapping>> {
        Ok(self
            .client
            .get_lun_map(path)?
            .into_iter()
            .find(|(_, initiators)| initiators.iter().any(|i| i == initiator))
            .map(|(mapping, _)| mapping))
    }

    fn clone_lun(
        &self,
        source: &NetAppLun,
        new_name: &str,
        space_reserved: bool,
        span: BlockSpan,
    ) -> StorageResult<NetAppLun> {
        let path = source.metadata.require_path(&source.name)?;
        let parent = match path.rfind('/') {
            Some(idx) => &path[..idx],
            None => "",
        };
        let clone_path = format!("{}/{}", parent, new_name);
        self.client.clone_lun(path, &clone_path, span)?;
        self.request_capacity_refresh();

        let luns = self.get_lun_by_args(&[("path", clone_path.as_str())])?;
        let record = luns
            .first()
            .ok_or_else(|| StorageError::protocol("ENOLUNENTRY", "No Lun entry found on the filer"))?;
        self.client.set_space_reserve(&clone_path, space_reserved)?;
        let mut metadata = self.create_lun_meta(record);
        metadata.space_reserved = Some(space_reserved.to_string());
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
        let path = lun.child_content("path");
        LunMetadata {
            volume: path
                .and_then(|p| split_lun_path(p).ok())
                .map(|(vol, _)| vol.to_string()),
            path: path.map(String::from),
            os_type: lun.child_content("multiprotocol-type").map(String::from),
            space_reserved: lun
                .child_content("is-space-reservation-enabled")
                .map(String::from),
            qtree: None,
            vserver: None,
        }
    }

    fn update_volume_stats(&self) -> StorageResult<VolumeStats> {
        let (total, free) = self.get_capacity_info();
        Ok(VolumeStats::new(&self.backend_name, total, free))
    }

    /// Filers before ONTAPI 1.15 count one block too many
    fn adjust_block_count(&self, block_count: u64) -> u64 {
        match self.client.connection().api_version() {
            Some((1, minor)) if minor < 15 => block_count.saturating_sub(1),
            _ => block_count,
        }
    }

    fn clone_cancel_token(&self) -> Option<CancelToken> {
        Some(self.client.poller().cancel_token())
    }

    fn lun_destroyed(&self, _metadata: &LunMetadata) {
        self.request_capacity_refresh();
    }
}

//! The iSCSI driver.  Keeps the lun table, handles igroups and mappings
//! and drives the array specific pieces through `ArrayMode`.
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
pub mod cmode;
mod resize;
pub mod seven_mode;
pub mod types;

pub use self::cmode::ClusterMode;
pub use self::seven_mode::SevenMode;
pub use self::types::*;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::client::LunClient;
use crate::clone::{BlockSpan, CancelToken};
use crate::config::{NetappConfig, StorageFamily};
use crate::element::Element;
use crate::error::*;
use crate::lun::{lun_name_from_path, LunMapping, LunMetadata, LunTable, NetAppLun, TargetDetails};
use crate::transport::{build_client, Transport, ZapiServer};

use log::{debug, error, info, warn};
use uuid::Uuid;

pub const IGROUP_PREFIX: &str = "openstack-";
/// Used when a volume is requested with size 0
pub const DEFAULT_LUN_SIZE: u64 = 100 * 1024 * 1024;
pub const GIB: u64 = 1 << 30;

/// OS types an igroup may be created with.  Anything else maps to default.
pub const IGROUP_OS_TYPES: [&str; 10] = [
    "linux", "aix", "hpux", "windows", "solaris", "netware", "vmware", "openvms", "xen",
    "hyper_v",
];

/// What differs between clustered and 7-mode arrays
pub trait ArrayMode: Send + Sync {
    fn client(&self) -> &dyn LunClient;

    fn check_for_setup_error(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Provision the lun on a volume that can hold it and fill in where
    /// it landed
    fn create_lun_on_eligible_vol(
        &self,
        name: &str,
        size: u64,
        metadata: &mut LunMetadata,
        extra_specs: &HashMap<String, String>,
    ) -> StorageResult<()>;

    fn create_lun_handle(&self, metadata: &LunMetadata) -> String;

    /// The igroup holding `initiator` the lun is mapped through, if any
    fn find_mapped_lun_igroup(&self, path: &str, initiator: &str)
        -> StorageResult<Option<LunMapping>>;

    /// Clone `source` to `new_name` next to it and return the new lun
    fn clone_lun(
        &self,
        source: &NetAppLun,
        new_name: &str,
        space_reserved: bool,
        span: BlockSpan,
    ) -> StorageResult<NetAppLun>;

    fn get_lun_by_args(&self, args: &[(&str, &str)]) -> StorageResult<Vec<Element>>;

    fn create_lun_meta(&self, lun: &Element) -> LunMetadata;

    fn update_volume_stats(&self) -> StorageResult<VolumeStats>;

    /// Some arrays count blocks differently when cloning
    fn adjust_block_count(&self, block_count: u64) -> u64 {
        block_count
    }

    /// Called after a lun was destroyed
    fn lun_destroyed(&self, _metadata: &LunMetadata) {}

    /// Token that stops waits on background clones, if clones run in the
    /// background on this array
    fn clone_cancel_token(&self) -> Option<CancelToken> {
        None
    }
}

pub struct IscsiDriver {
    mode: Box<dyn ArrayMode>,
    lun_table: LunTable,
    stats: Mutex<Option<VolumeStats>>,
}

/// First target with its interface enabled, else the first one
pub fn choose_target(targets: &[TargetDetails]) -> Option<&TargetDetails> {
    targets
        .iter()
        .find(|t| t.is_enabled())
        .or_else(|| targets.first())
}

/// Bytes in `gb` GiB
fn gib_to_bytes(gb: u64) -> StorageResult<u64> {
    gb.checked_mul(GIB).ok_or_else(|| {
        StorageError::BackendApi(format!("Requested size of {} GB is too large", gb))
    })
}

/// The igroup os type for a lun os type
pub fn igroup_os_type(lun_os_type: Option<&str>) -> String {
    match lun_os_type {
        Some(os) if IGROUP_OS_TYPES.contains(&os.to_lowercase().as_str()) => os.to_lowercase(),
        _ => "default".to_string(),
    }
}

impl IscsiDriver {
    pub fn new(mode: Box<dyn ArrayMode>) -> Self {
        IscsiDriver {
            mode,
            lun_table: LunTable::new(),
            stats: Mutex::new(None),
        }
    }

    /// Connect to the array described by `config` and negotiate the api
    /// version
    pub fn from_config(config: &NetappConfig) -> StorageResult<IscsiDriver> {
        config.check_flags()?;
        let http = build_client(config)?;
        let mut server = ZapiServer::new(&http, config);
        let mode: Box<dyn ArrayMode> = match config.storage_family {
            StorageFamily::OntapCluster => {
                let vserver = config
                    .vserver
                    .clone()
                    .unwrap_or_else(|| cmode::DEFAULT_VSERVER.to_string());
                server.set_vserver(Some(vserver.clone()));
                let transport: Arc<dyn Transport> = Arc::new(server);
                Box::new(ClusterMode::setup(transport, &vserver, config)?)
            }
            StorageFamily::Ontap7Mode => {
                server.set_vfiler(config.vfiler.clone());
                let transport: Arc<dyn Transport> = Arc::new(server);
                Box::new(SevenMode::setup(transport, config)?)
            }
        };
        info!("Connected to {} as {:?}", config.server_hostname, config.storage_family);
        Ok(IscsiDriver::new(mode))
    }

    pub fn lun_table(&self) -> &LunTable {
        &self.lun_table
    }

    /// Cancelling the token fails the clone wait in progress and every
    /// later one with `Cancelled` until the token is reset.  `None` when
    /// the array clones synchronously.
    pub fn clone_cancel_token(&self) -> Option<CancelToken> {
        self.mode.clone_cancel_token()
    }

    fn client(&self) -> &dyn LunClient {
        self.mode.client()
    }

    /// Check the array is usable and load the lun table
    pub fn check_for_setup_error(&self) -> StorageResult<()> {
        self.mode.check_for_setup_error()?;
        let records = self.client().get_lun_list()?;
        self.lun_table.replace_all(self.luns_from_records(&records)?);
        info!("Success getting LUN list from server");
        Ok(())
    }

    fn luns_from_records(&self, records: &[Element]) -> StorageResult<Vec<NetAppLun>> {
        let mut luns = Vec::with_capacity(records.len());
        for record in records {
            let path = match record.child_content("path") {
                Some(path) => path,
                None => continue,
            };
            let metadata = self.mode.create_lun_meta(record);
            let handle = self.mode.create_lun_handle(&metadata);
            let size = record.child_parse("size")?.unwrap_or(0);
            luns.push(NetAppLun::new(handle, lun_name_from_path(path), size, metadata));
        }
        Ok(luns)
    }

    /// The cached lun, reloading the table from the array on a miss
    pub fn get_lun_from_table(&self, name: &str) -> StorageResult<NetAppLun> {
        self.lun_table.get_or_refresh(name, || {
            let records = self.client().get_lun_list()?;
            self.luns_from_records(&records)
        })
    }

    pub fn create_volume(&self, volume: &Volume) -> StorageResult<()> {
        let name = &volume.name;
        let size = if volume.size == 0 {
            DEFAULT_LUN_SIZE
        } else {
            gib_to_bytes(volume.size)?
        };
        let mut metadata = LunMetadata::new("linux", "true");
        self.mode
            .create_lun_on_eligible_vol(name, size, &mut metadata, &volume.extra_specs)?;
        debug!("Created LUN with name {}", name);
        let handle = self.mode.create_lun_handle(&metadata);
        self.lun_table
            .insert(NetAppLun::new(handle, name, size, metadata));
        Ok(())
    }

    pub fn delete_volume(&self, volume: &Volume) -> StorageResult<()> {
        self.delete_lun(&volume.name)
    }

    /// Deleting a lun the array doesn't know is not an error
    fn delete_lun(&self, name: &str) -> StorageResult<()> {
        let lun = match self.get_lun_from_table(name) {
            Ok(lun) => lun,
            Err(StorageError::RecordNotFound(_)) => {
                warn!("No entry in LUN table for volume/snapshot {}.", name);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let path = lun.metadata.require_path(name)?;
        self.client().destroy_lun(path, true)?;
        self.mode.lun_destroyed(&lun.metadata);
        self.lun_table.remove(name);
        debug!("Destroyed LUN {}", name);
        Ok(())
    }

    pub fn ensure_export(&self, volume: &Volume) -> StorageResult<ExportInfo> {
        let lun = self.get_lun_from_table(&volume.name)?;
        Ok(ExportInfo {
            provider_location: lun.handle,
        })
    }

    pub fn create_export(&self, volume: &Volume) -> StorageResult<ExportInfo> {
        self.ensure_export(volume)
    }

    pub fn remove_export(&self, _volume: &Volume) -> StorageResult<()> {
        Ok(())
    }

    /// Map the lun to the connector's initiator and describe the iSCSI
    /// target it can be reached through
    pub fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> StorageResult<ConnectionInfo> {
        let name = &volume.name;
        let initiator = &connector.initiator;
        let lun_id = self.map_lun(name, initiator, "iscsi", None)?;
        debug!("Mapped LUN {} to the initiator {}", name, initiator);

        let targets = self.client().get_target_details()?;
        let target = choose_target(&targets).ok_or_else(|| {
            StorageError::BackendApi(format!("No iscsi target details were found for LUN {}", name))
        })?;
        let portal = match (target.address.as_deref(), target.port.as_deref()) {
            (Some(address), Some(port)) => format!("{}:{}", address, port),
            _ => {
                return Err(StorageError::BackendApi(format!(
                    "Failed to get target portal for the LUN {}",
                    name
                )))
            }
        };
        let iqn = self.client().get_iscsi_service_details()?.ok_or_else(|| {
            StorageError::BackendApi(format!("Failed to get target IQN for the LUN {}", name))
        })?;

        let mut properties = IscsiProperties {
            target_discovered: false,
            target_portal: portal,
            target_iqn: iqn,
            target_lun: lun_id,
            volume_id: volume.id.clone(),
            ..Default::default()
        };
        if let Some(ref auth) = volume.provider_auth {
            properties.set_auth(auth)?;
        }
        Ok(ConnectionInfo::iscsi(properties))
    }

    pub fn terminate_connection(&self, volume: &Volume, connector: &Connector) -> StorageResult<()> {
        let name = &volume.name;
        let initiator = &connector.initiator;
        let lun = self.get_lun_from_table(name)?;
        let path = lun.metadata.require_path(name)?;
        match self.mode.find_mapped_lun_igroup(path, initiator)? {
            Some(mapping) => {
                self.client().unmap_lun(path, &mapping.initiator_group)?;
                debug!("Unmapped LUN {} from the initiator {}", name, initiator);
            }
            None => warn!("LUN {} is not mapped to initiator {}", name, initiator),
        }
        Ok(())
    }

    /// Map a lun, falling back to an existing mapping for the initiator
    /// when the array refuses
    fn map_lun(
        &self,
        name: &str,
        initiator: &str,
        initiator_type: &str,
        lun_id: Option<&str>,
    ) -> StorageResult<String> {
        let lun = self.get_lun_from_table(name)?;
        let os = igroup_os_type(lun.metadata.os_type.as_deref());
        let path = lun.metadata.require_path(name)?;
        let igroup = self.get_or_create_igroup(initiator, initiator_type, &os)?;
        match self.client().map_lun(path, &igroup, lun_id) {
            Ok(id) => Ok(id),
            Err(e) => match self.mode.find_mapped_lun_igroup(path, initiator) {
                Ok(Some(LunMapping {
                    lun_id: Some(id), ..
                })) => {
                    debug!("LUN {} already mapped with id {}", name, id);
                    Ok(id)
                }
                Ok(_) => Err(e),
                Err(lookup) => {
                    warn!("Error looking up existing mapping of {}: {}", name, lookup);
                    Err(e)
                }
            },
        }
    }

    /// Reuse a driver created igroup that fits or create one
    fn get_or_create_igroup(
        &self,
        initiator: &str,
        initiator_type: &str,
        os: &str,
    ) -> StorageResult<String> {
        let igroups = self.client().get_igroup_by_initiator(initiator)?;
        let existing = igroups.iter().find(|ig| {
            ig.name.starts_with(IGROUP_PREFIX)
                && ig.os_type.as_deref() == Some(os)
                && match ig.igroup_type.as_deref() {
                    Some(t) => t == initiator_type || t == "mixed",
                    None => false,
                }
        });
        if let Some(igroup) = existing {
            return Ok(igroup.name.clone());
        }
        let name = format!("{}{}", IGROUP_PREFIX, Uuid::new_v4());
        self.client().create_igroup(&name, initiator_type, os)?;
        self.client().add_igroup_initiator(&name, initiator)?;
        info!("Created igroup {} for {}", name, initiator);
        Ok(name)
    }

    /// Clone a cached lun and cache the clone
    fn clone_lun(
        &self,
        name: &str,
        new_name: &str,
        space_reserved: bool,
        span: BlockSpan,
    ) -> StorageResult<()> {
        let source = self.get_lun_from_table(name)?;
        let lun = self.mode.clone_lun(&source, new_name, space_reserved, span)?;
        self.lun_table.insert(lun);
        Ok(())
    }

    pub fn create_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let lun = self.get_lun_from_table(&snapshot.volume_name)?;
        self.clone_lun(&lun.name, &snapshot.name, false, BlockSpan::whole())
    }

    pub fn delete_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        self.delete_lun(&snapshot.name)
    }

    pub fn create_volume_from_snapshot(
        &self,
        volume: &Volume,
        snapshot: &Snapshot,
    ) -> StorageResult<()> {
        self.clone_lun(&snapshot.name, &volume.name, true, BlockSpan::whole())?;
        if volume.size != snapshot.volume_size {
            self.extend_or_delete(volume)?;
        }
        Ok(())
    }

    pub fn create_cloned_volume(&self, volume: &Volume, src_vref: &Volume) -> StorageResult<()> {
        let source = self.get_lun_from_table(&src_vref.name)?;
        self.clone_lun(&source.name, &volume.name, true, BlockSpan::whole())?;
        if volume.size != src_vref.size {
            self.extend_or_delete(volume)?;
        }
        Ok(())
    }

    /// Grow a fresh clone to the requested size or get rid of it
    fn extend_or_delete(&self, volume: &Volume) -> StorageResult<()> {
        if let Err(e) = self.extend_volume(volume, volume.size) {
            error!("Resizing {} failed. Cleaning volume.", volume.name);
            if let Err(cleanup) = self.delete_volume(volume) {
                error!("Failure deleting volume {}: {}", volume.name, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn get_volume_stats(&self, refresh: bool) -> StorageResult<VolumeStats> {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *stats {
            Some(ref cached) if !refresh => Ok(cached.clone()),
            _ => {
                debug!("Updating volume stats");
                let fresh = self.mode.update_volume_stats()?;
                *stats = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }
}

#[cfg(test)]
mod tests;

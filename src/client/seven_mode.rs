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
use std::sync::Arc;

use super::LunClient;
use crate::clone::{block_ranges_element, plan_block_ranges, BlockSpan, CloneJob, ClonePoller};
use crate::element::Element;
use crate::error::*;
use crate::lun::{IgroupInfo, LunMapping, TargetDetails};
use crate::transport::Transport;

use log::{debug, warn};

/// Client for Data ONTAP operating in 7-mode
pub struct SevenModeClient {
    connection: Arc<dyn Transport>,
    volume_list: Vec<String>,
    poller: ClonePoller,
}

impl SevenModeClient {
    pub fn new(connection: Arc<dyn Transport>, volume_list: Vec<String>, poller: ClonePoller) -> Self {
        SevenModeClient {
            connection,
            volume_list,
            poller,
        }
    }

    pub fn volume_list(&self) -> &[String] {
        &self.volume_list
    }

    pub fn poller(&self) -> &ClonePoller {
        &self.poller
    }

    /// Luns of one volume, or of the whole filer when `volume` is `None`
    pub fn get_vol_luns(&self, volume: Option<&str>) -> StorageResult<Vec<Element>> {
        let mut request = Element::new("lun-list-info");
        if let Some(vol) = volume {
            request.add_new_child("volume-name", vol);
        }
        let result = self.connection.invoke(&request, true)?;
        Ok(result.children_of("luns").to_vec())
    }

    /// Start a clone and wait for it when the filer runs it in the
    /// background
    pub fn clone_lun(&self, path: &str, clone_path: &str, span: BlockSpan) -> StorageResult<()> {
        debug!("Cloning lun {} to {} with {:?}", path, clone_path, span);
        for ranges in plan_block_ranges(span) {
            let mut request = Element::with_children(
                "clone-start",
                vec![
                    ("source-path", path),
                    ("destination-path", clone_path),
                    ("no-snap", "true"),
                ],
            );
            if let Some(block_ranges) = block_ranges_element(&ranges) {
                request.add_child(block_ranges);
            }
            let result = self.connection.invoke(&request, true)?;
            if let Some(job) = CloneJob::from_start_response(&result) {
                self.poller.wait(&*self.connection, &job)?;
            }
        }
        Ok(())
    }

    /// lun-info records matching every (name, value) pair
    pub fn get_lun_by_args(&self, args: &[(&str, &str)]) -> StorageResult<Vec<Element>> {
        let request = Element::with_children("lun-list-info", args.iter().map(|&(k, v)| (k, v)));
        let result = self.connection.invoke(&request, true)?;
        Ok(result.children_of("luns").to_vec())
    }

    /// volume-info records of the filer, or of one volume
    pub fn get_filer_volumes(&self, volume: Option<&str>) -> StorageResult<Vec<Element>> {
        let mut request = Element::new("volume-list-info");
        if let Some(vol) = volume {
            request.add_new_child("volume", vol);
        }
        let result = self.connection.invoke(&request, true)?;
        Ok(result.children_of("volumes").to_vec())
    }

    /// Every igroup the lun at `path` is mapped to.  Initiators are kept so
    /// callers can match on them.
    pub fn get_lun_map(&self, path: &str) -> StorageResult<Vec<(LunMapping, Vec<String>)>> {
        let request = Element::with_children("lun-map-list-info", vec![("path", path)]);
        let result = self.connection.invoke(&request, true)?;
        Ok(result
            .children_of("initiator-groups")
            .iter()
            .map(|igroup| {
                let mapping = LunMapping {
                    initiator_group: igroup
                        .child_content("initiator-group-name")
                        .unwrap_or_default()
                        .to_string(),
                    lun_id: igroup.child_content("lun-id").map(String::from),
                    vserver: None,
                };
                let initiators = igroup
                    .children_of("initiators")
                    .iter()
                    .filter_map(|i| i.child_content("initiator-name"))
                    .map(String::from)
                    .collect();
                (mapping, initiators)
            })
            .collect())
    }

    pub fn set_space_reserve(&self, path: &str, enable: bool) -> StorageResult<()> {
        let enable = if enable { "true" } else { "false" };
        let request = Element::with_children(
            "lun-set-space-reservation-info",
            vec![("path", path), ("enable", enable)],
        );
        self.connection.invoke(&request, true)?;
        Ok(())
    }
}

impl LunClient for SevenModeClient {
    fn connection(&self) -> &dyn Transport {
        &*self.connection
    }

    fn get_target_details(&self) -> StorageResult<Vec<TargetDetails>> {
        let request = Element::new("iscsi-portal-list-info");
        let result = self.connection.invoke(&request, true)?;
        Ok(result
            .children_of("iscsi-portal-list-entries")
            .iter()
            .map(|portal| TargetDetails {
                address: portal.child_content("ip-address").map(String::from),
                port: portal.child_content("ip-port").map(String::from),
                tpgroup_tag: portal.child_content("tpgroup-tag").map(String::from),
                interface_enabled: None,
            })
            .collect())
    }

    fn get_iscsi_service_details(&self) -> StorageResult<Option<String>> {
        let request = Element::new("iscsi-node-get-name");
        let result = self.connection.invoke(&request, true)?;
        Ok(result.child_content("node-name").map(String::from))
    }

    /// Luns of the configured volumes, or of the whole filer without a
    /// volume list.  A volume that cannot be listed is skipped.
    fn get_lun_list(&self) -> StorageResult<Vec<Element>> {
        if self.volume_list.is_empty() {
            return self.get_vol_luns(None);
        }
        let mut luns = Vec::new();
        for vol in &self.volume_list {
            match self.get_vol_luns(Some(vol)) {
                Ok(vol_luns) => luns.extend(vol_luns),
                Err(e) => warn!("Error getting luns for vol {}. Message: {}", vol, e),
            }
        }
        Ok(luns)
    }

    fn get_igroup_by_initiator(&self, initiator: &str) -> StorageResult<Vec<IgroupInfo>> {
        let request = Element::new("igroup-list-info");
        let result = self.connection.invoke(&request, true)?;
        Ok(result
            .children_of("initiator-groups")
            .iter()
            .filter(|igroup| {
                igroup
                    .children_of("initiators")
                    .iter()
                    .any(|i| i.child_content("initiator-name") == Some(initiator))
            })
            .map(IgroupInfo::from_element)
            .collect())
    }
}

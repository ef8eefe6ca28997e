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

use super::iter::IterQuery;
use super::LunClient;
use crate::clone::{block_ranges_element, plan_block_ranges, BlockSpan};
use crate::element::Element;
use crate::error::*;
use crate::lun::{IgroupInfo, LunMapping, TargetDetails};
use crate::transport::Transport;

use log::debug;

/// Client for clustered Data ONTAP.  Requests that touch luns are tunneled
/// to the configured vserver.
pub struct CmodeClient {
    connection: Arc<dyn Transport>,
    vserver: String,
}

impl CmodeClient {
    pub fn new(connection: Arc<dyn Transport>, vserver: &str) -> Self {
        CmodeClient {
            connection,
            vserver: vserver.to_string(),
        }
    }

    pub fn vserver(&self) -> &str {
        &self.vserver
    }

    /// Every mapping of the lun at `path`
    pub fn get_lun_map(&self, path: &str) -> StorageResult<Vec<LunMapping>> {
        let records = IterQuery::new("lun-map-get-iter")
            .query(Element::with_children("lun-map-info", vec![("path", path)]))
            .fetch_all(&*self.connection, true)?;
        Ok(records
            .iter()
            .map(|info| LunMapping {
                initiator_group: info
                    .child_content("initiator-group")
                    .unwrap_or_default()
                    .to_string(),
                lun_id: info.child_content("lun-id").map(String::from),
                vserver: info.child_content("vserver").map(String::from),
            })
            .collect())
    }

    /// Clone within `volume`.  The array finishes each request before
    /// replying so large spans simply take several requests.
    pub fn clone_lun(
        &self,
        volume: &str,
        name: &str,
        new_name: &str,
        space_reserved: bool,
        span: BlockSpan,
    ) -> StorageResult<()> {
        debug!(
            "Cloning lun {} to {} in volume {} with {:?}",
            name, new_name, volume, span
        );
        let space_reserve = if space_reserved { "true" } else { "false" };
        for ranges in plan_block_ranges(span) {
            let mut request = Element::with_children(
                "clone-create",
                vec![
                    ("volume", volume),
                    ("source-path", name),
                    ("destination-path", new_name),
                    ("space-reserve", space_reserve),
                ],
            );
            if let Some(block_ranges) = block_ranges_element(&ranges) {
                request.add_child(block_ranges);
            }
            self.connection.invoke(&request, true)?;
        }
        Ok(())
    }

    /// lun-info records matching every (name, value) pair
    pub fn get_lun_by_args(&self, args: &[(&str, &str)]) -> StorageResult<Vec<Element>> {
        let query = IterQuery::new("lun-get-iter").query(Element::with_children(
            "lun-info",
            args.iter().map(|&(k, v)| (k, v)),
        ));
        let request = query.build(None);
        let result = self.connection.invoke(&request, false)?;
        Ok(result.children_of("attributes-list").to_vec())
    }

    /// volume-attributes records of this vserver, optionally narrowed to
    /// the named volumes
    pub fn get_volumes(&self, names: Option<&[String]>) -> StorageResult<Vec<Element>> {
        let query = |name: Option<&str>| {
            let mut id_attrs = Element::with_children(
                "volume-id-attributes",
                vec![("owning-vserver-name", self.vserver.as_str())],
            );
            if let Some(name) = name {
                id_attrs.add_new_child("name", name);
            }
            let mut attrs = Element::new("volume-attributes");
            attrs.add_child(id_attrs);
            IterQuery::new("volume-get-iter").query(attrs)
        };
        match names {
            None => query(None).fetch_all(&*self.connection, false),
            Some(names) => {
                let mut volumes = Vec::new();
                for name in names {
                    volumes.extend(query(Some(name)).fetch_all(&*self.connection, false)?);
                }
                Ok(volumes)
            }
        }
    }

    /// Dedupe and compression state of the vserver's volumes
    pub fn get_sis_status(&self) -> StorageResult<Vec<Element>> {
        IterQuery::new("sis-get-iter")
            .query(Element::with_children(
                "sis-status-info",
                vec![("vserver", self.vserver.as_str())],
            ))
            .fetch_all(&*self.connection, false)
    }
}

impl LunClient for CmodeClient {
    fn connection(&self) -> &dyn Transport {
        &*self.connection
    }

    fn get_target_details(&self) -> StorageResult<Vec<TargetDetails>> {
        let page = IterQuery::new("iscsi-interface-get-iter").fetch_page(
            &*self.connection,
            None,
            true,
        )?;
        Ok(page.records.iter().map(TargetDetails::from_element).collect())
    }

    fn get_iscsi_service_details(&self) -> StorageResult<Option<String>> {
        let page = IterQuery::new("iscsi-service-get-iter").fetch_page(
            &*self.connection,
            None,
            true,
        )?;
        match page
            .records
            .first()
            .and_then(|info| info.child_content("node-name"))
        {
            Some(iqn) => Ok(Some(iqn.to_string())),
            None => {
                debug!("No iscsi service found for vserver {}", self.vserver);
                Ok(None)
            }
        }
    }

    fn get_lun_list(&self) -> StorageResult<Vec<Element>> {
        IterQuery::new("lun-get-iter")
            .query(Element::with_children(
                "lun-info",
                vec![("vserver", self.vserver.as_str())],
            ))
            .fetch_all(&*self.connection, false)
    }

    fn get_igroup_by_initiator(&self, initiator: &str) -> StorageResult<Vec<IgroupInfo>> {
        let mut query = Element::with_children(
            "initiator-group-info",
            vec![("vserver", self.vserver.as_str())],
        );
        let mut initiators = Element::new("initiators");
        initiators.add_node_with_children("initiator-info", vec![("initiator-name", initiator)]);
        query.add_child(initiators);

        let mut desired = Element::new("initiator-group-info");
        desired.add_node_with_children("initiators", vec![("initiator-info", None::<&str>)]);
        for attr in &[
            "vserver",
            "initiator-group-name",
            "initiator-group-type",
            "initiator-group-os-type",
        ] {
            desired.add_empty_child(attr);
        }

        let records = IterQuery::new("igroup-get-iter")
            .query(query)
            .desired_attributes(desired)
            .fetch_all(&*self.connection, false)?;
        Ok(records.iter().map(IgroupInfo::from_element).collect())
    }
}

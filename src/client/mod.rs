//! Typed calls against the ONTAP API.  The calls both array families share
//! live on `LunClient` and each family fills in the ones that differ.
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
pub mod iter;
pub mod seven_mode;

pub use self::cmode::CmodeClient;
pub use self::iter::{IterPage, IterQuery};
pub use self::seven_mode::SevenModeClient;

use crate::element::Element;
use crate::error::*;
use crate::lun::{IgroupInfo, LunGeometry, LunMetadata, TargetDetails};
use crate::transport::Transport;

use log::{debug, warn};

pub trait LunClient: Send + Sync {
    fn connection(&self) -> &dyn Transport;

    /// Portals the array serves iSCSI on
    fn get_target_details(&self) -> StorageResult<Vec<TargetDetails>>;

    /// The target iqn, if the iSCSI service is configured
    fn get_iscsi_service_details(&self) -> StorageResult<Option<String>>;

    /// Every lun visible to the driver, as raw lun-info records
    fn get_lun_list(&self) -> StorageResult<Vec<Element>>;

    /// Igroups containing this initiator
    fn get_igroup_by_initiator(&self, initiator: &str) -> StorageResult<Vec<IgroupInfo>>;

    fn get_ontapi_version(&self) -> StorageResult<(u32, u32)> {
        let request = Element::new("system-get-ontapi-version");
        let result = self.connection().invoke(&request, false)?;
        match (
            result.child_parse::<u32>("major-version")?,
            result.child_parse::<u32>("minor-version")?,
        ) {
            (Some(major), Some(minor)) => Ok((major, minor)),
            _ => Err(StorageError::new(
                "system-get-ontapi-version returned no version".to_string(),
            )),
        }
    }

    fn create_lun(
        &self,
        volume: &str,
        lun: &str,
        size: u64,
        metadata: &LunMetadata,
        qos_policy_group: Option<&str>,
    ) -> StorageResult<()> {
        let path = format!("/vol/{}/{}", volume, lun);
        let size = size.to_string();
        let mut request = Element::with_children(
            "lun-create-by-size",
            vec![
                ("path", path.as_str()),
                ("size", size.as_str()),
                ("ostype", metadata.require_os_type(lun)?),
                (
                    "space-reservation-enabled",
                    metadata.require_space_reserved(lun)?,
                ),
            ],
        );
        if let Some(qos) = qos_policy_group {
            request.add_new_child("qos-policy-group", qos);
        }
        if let Err(e) = self.connection().invoke(&request, true) {
            warn!(
                "Error provisioning volume {} on {}. Details: {}",
                lun, volume, e
            );
            return Err(e);
        }
        Ok(())
    }

    fn destroy_lun(&self, path: &str, force: bool) -> StorageResult<()> {
        let mut request = Element::with_children("lun-destroy", vec![("path", path)]);
        if force {
            request.add_new_child("force", "true");
        }
        self.connection().invoke(&request, true)?;
        debug!("Destroyed LUN {}", crate::lun::lun_name_from_path(path));
        Ok(())
    }

    /// Map a lun and return the lun id the array settled on
    fn map_lun(&self, path: &str, igroup_name: &str, lun_id: Option<&str>) -> StorageResult<String> {
        let mut request = Element::with_children(
            "lun-map",
            vec![("path", path), ("initiator-group", igroup_name)],
        );
        if let Some(id) = lun_id {
            request.add_new_child("lun-id", id);
        }
        match self.connection().invoke(&request, true) {
            Ok(result) => result
                .child_content("lun-id-assigned")
                .map(String::from)
                .ok_or_else(|| {
                    StorageError::new(format!("lun-map of {} returned no lun id", path))
                }),
            Err(e) => {
                warn!(
                    "Error mapping lun. Code :{}, Message:{}",
                    e.code().unwrap_or_default(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Unmapping a lun that is no longer mapped succeeds
    fn unmap_lun(&self, path: &str, igroup_name: &str) -> StorageResult<()> {
        let request = Element::with_children(
            "lun-unmap",
            vec![("path", path), ("initiator-group", igroup_name)],
        );
        match self.connection().invoke(&request, true) {
            Ok(_) => Ok(()),
            Err(ref e) if e.is_already_unmapped() => {
                debug!("Lun {} already unmapped from {}", path, igroup_name);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Error unmapping lun. Code :{}, Message:{}",
                    e.code().unwrap_or_default(),
                    e
                );
                Err(e)
            }
        }
    }

    fn create_igroup(&self, igroup: &str, igroup_type: &str, os_type: &str) -> StorageResult<()> {
        let request = Element::with_children(
            "igroup-create",
            vec![
                ("initiator-group-name", igroup),
                ("initiator-group-type", igroup_type),
                ("os-type", os_type),
            ],
        );
        self.connection().invoke(&request, true)?;
        Ok(())
    }

    fn add_igroup_initiator(&self, igroup: &str, initiator: &str) -> StorageResult<()> {
        let request = Element::with_children(
            "igroup-add",
            vec![("initiator-group-name", igroup), ("initiator", initiator)],
        );
        self.connection().invoke(&request, true)?;
        Ok(())
    }

    fn do_direct_resize(&self, path: &str, new_size_bytes: u64, force: bool) -> StorageResult<()> {
        let size = new_size_bytes.to_string();
        debug!("Resizing lun {} directly to new size {}", path, size);
        let mut request = Element::with_children(
            "lun-resize",
            vec![("path", path), ("size", size.as_str())],
        );
        if force {
            request.add_new_child("force", "true");
        }
        self.connection().invoke(&request, true)?;
        Ok(())
    }

    /// Geometry is informational.  A failed query yields empty geometry.
    fn get_lun_geometry(&self, path: &str) -> LunGeometry {
        let request = Element::with_children("lun-get-geometry", vec![("path", path)]);
        let parse = |result: &Element| -> StorageResult<LunGeometry> {
            Ok(LunGeometry {
                size: result.child_parse("size")?,
                bytes_per_sector: result.child_parse("bytes-per-sector")?,
                sectors_per_track: result.child_parse("sectors-per-track")?,
                tracks_per_cylinder: result.child_parse("tracks-per-cylinder")?,
                cylinders: result.child_parse("cylinders")?,
                max_resize: result.child_parse("max-resize-size")?,
            })
        };
        match self
            .connection()
            .invoke(&request, true)
            .and_then(|result| parse(&result))
        {
            Ok(geometry) => geometry,
            Err(e) => {
                debug!("Lun {} geometry query failed: {}", path, e);
                LunGeometry::default()
            }
        }
    }

    /// The name/value option records of a volume
    fn get_volume_options(&self, volume: &str) -> StorageResult<Vec<Element>> {
        let request = Element::with_children("volume-options-list-info", vec![("volume", volume)]);
        let result = self.connection().invoke(&request, true)?;
        Ok(result.children_of("options").to_vec())
    }

    fn get_vol_option(&self, volume: &str, option: &str) -> StorageResult<Option<String>> {
        let options = self.get_volume_options(volume)?;
        Ok(options
            .iter()
            .find(|opt| opt.child_content("name") == Some(option))
            .and_then(|opt| opt.child_content("value"))
            .map(String::from))
    }

    fn move_lun(&self, path: &str, new_path: &str) -> StorageResult<()> {
        let request = Element::with_children(
            "lun-move",
            vec![("path", path), ("new-path", new_path)],
        );
        self.connection().invoke(&request, true)?;
        debug!("Moved lun {} to {}", path, new_path);
        Ok(())
    }
}

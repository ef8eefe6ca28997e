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
use super::{gib_to_bytes, IscsiDriver, Volume};
use crate::clone::BlockSpan;
use crate::error::*;
use crate::lun::split_lun_path;

use log::{debug, error, info};

impl IscsiDriver {
    /// Grow a volume to `new_size_gb`.  Luns the array can't resize in
    /// place are rebuilt through a sub-lun clone.
    pub fn extend_volume(&self, volume: &Volume, new_size_gb: u64) -> StorageResult<()> {
        let name = &volume.name;
        let new_size = gib_to_bytes(new_size_gb)?;
        let lun = self.get_lun_from_table(name)?;
        let path = lun.metadata.require_path(name)?;
        if lun.size == new_size {
            info!("No need to extend volume {} as it is already the requested new size.", name);
            return Ok(());
        }

        let geometry = self.client().get_lun_geometry(path);
        match geometry.max_resize {
            Some(max_resize) if max_resize >= new_size => {
                self.client().do_direct_resize(path, new_size, true)?;
            }
            _ => {
                debug!(
                    "Resize limit {:?} below new size {} for {}",
                    geometry.max_resize, new_size, name
                );
                self.do_sub_clone_resize(path, new_size)?;
            }
        }
        self.lun_table.set_size(name, new_size);
        info!("Extended volume {} to {} GB", name, new_size_gb);
        Ok(())
    }

    /// Block count of the lun at `path` as the clone api counts them
    fn get_lun_block_count(&self, path: &str) -> StorageResult<u64> {
        let luns = self.mode.get_lun_by_args(&[("path", path)])?;
        let lun = luns.last().ok_or_else(|| {
            StorageError::BackendApi(format!("No lun found at {} to count blocks", path))
        })?;
        let block_size: u64 = lun.child_parse("block-size")?.unwrap_or(0);
        let size: u64 = lun.child_parse("size")?.unwrap_or(0);
        if block_size == 0 {
            return Err(StorageError::BackendApi(format!(
                "Lun {} reports no block size",
                path
            )));
        }
        Ok(self.mode.adjust_block_count(size / block_size))
    }

    /// Create `new-<name>` at the new size, clone every block of the lun
    /// into it and swap it in
    fn do_sub_clone_resize(&self, path: &str, new_size: u64) -> StorageResult<()> {
        let (vol_name, name) = split_lun_path(path)?;
        info!("Resizing lun {} using sub clone to new size {}", name, new_size);

        if self.client().get_vol_option(vol_name, "compression")?.as_deref() == Some("on") {
            return Err(StorageError::BackendCapacity(format!(
                "{} cannot be sub clone resized as it is hosted on compressed volume",
                name
            )));
        }
        let block_count = self.get_lun_block_count(path)?;
        if block_count == 0 {
            return Err(StorageError::BackendApi(format!(
                "{} cannot be sub clone resized as it contains no blocks.",
                name
            )));
        }

        let lun = self.get_lun_from_table(name)?;
        let new_lun = format!("new-{}", name);
        self.client()
            .create_lun(vol_name, &new_lun, new_size, &lun.metadata, None)?;
        let swapped = self
            .clone_lun(name, &new_lun, true, BlockSpan::blocks(block_count))
            .and_then(|_| self.post_sub_clone_resize(path));
        // The new lun either took the original name or is discarded
        self.lun_table.remove(&new_lun);
        if let Err(e) = swapped {
            let new_path = format!("/vol/{}/{}", vol_name, new_lun);
            if let Err(cleanup) = self.client().destroy_lun(&new_path, true) {
                error!("Failure deleting new lun {} after failed resize: {}", new_lun, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stage the old lun aside, move the new one in and drop the old one
    fn post_sub_clone_resize(&self, path: &str) -> StorageResult<()> {
        let (vol_name, name) = split_lun_path(path)?;
        let new_path = format!("/vol/{}/new-{}", vol_name, name);
        let tmp_lun = format!("tmp-{}", name);
        let tmp_path = format!("/vol/{}/{}", vol_name, tmp_lun);
        let client = self.client();

        if let Err(e) = client.move_lun(path, &tmp_path) {
            error!("Failure staging lun {} to tmp: {}", name, e);
            return Err(StorageError::BackendApi(format!(
                "Failure staging lun {} to tmp.",
                name
            )));
        }
        if let Err(e) = client.move_lun(&new_path, path) {
            error!("Failure moving new cloned lun to {}: {}", name, e);
            if let Err(restore) = client.move_lun(&tmp_path, path) {
                error!(
                    "Failure restoring lun {} from {} after failed move: {}",
                    name, tmp_lun, restore
                );
            }
            return Err(StorageError::BackendApi(format!(
                "Failure moving new cloned lun to {}.",
                name
            )));
        }
        if let Err(e) = client.destroy_lun(&tmp_path, true) {
            error!("Failure deleting staged tmp lun {}: {}", tmp_lun, e);
        }
        Ok(())
    }
}

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
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::element::Element;
use crate::error::*;

use log::debug;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LunMetadata {
    pub os_type: Option<String>,
    pub space_reserved: Option<String>,
    pub path: Option<String>,
    pub volume: Option<String>,
    pub qtree: Option<String>,
    pub vserver: Option<String>,
}

impl LunMetadata {
    pub fn new(os_type: &str, space_reserved: &str) -> Self {
        LunMetadata {
            os_type: Some(os_type.to_string()),
            space_reserved: Some(space_reserved.to_string()),
            ..Default::default()
        }
    }

    /// The lun path, required by every call that touches an existing lun
    pub fn require_path(&self, name: &str) -> StorageResult<&str> {
        self.path
            .as_deref()
            .ok_or_else(|| StorageError::BackendApi(format!("No path known for lun {}", name)))
    }

    pub fn require_os_type(&self, name: &str) -> StorageResult<&str> {
        self.os_type
            .as_deref()
            .ok_or_else(|| StorageError::BackendApi(format!("No os type known for lun {}", name)))
    }

    pub fn require_space_reserved(&self, name: &str) -> StorageResult<&str> {
        self.space_reserved.as_deref().ok_or_else(|| {
            StorageError::BackendApi(format!("No space reservation known for lun {}", name))
        })
    }

    pub fn require_volume(&self, name: &str) -> StorageResult<&str> {
        self.volume
            .as_deref()
            .ok_or_else(|| StorageError::BackendApi(format!("No volume known for lun {}", name)))
    }
}

/// Represents a LUN on NetApp storage
#[derive(Clone, Debug, PartialEq)]
pub struct NetAppLun {
    pub handle: String,
    pub name: String,
    /// Size in bytes
    pub size: u64,
    pub metadata: LunMetadata,
}

impl NetAppLun {
    pub fn new(handle: String, name: &str, size: u64, metadata: LunMetadata) -> Self {
        NetAppLun {
            handle,
            name: name.to_string(),
            size,
            metadata,
        }
    }
}

impl fmt::Display for NetAppLun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NetApp Lun[handle:{}, name:{}, size:{}, metadata:{:?}]",
            self.handle, self.name, self.size, self.metadata
        )
    }
}

/// Split `/vol/<volume>/<lun>` into its volume and lun name
pub fn split_lun_path(path: &str) -> StorageResult<(&str, &str)> {
    let seg: Vec<&str> = path.split('/').collect();
    match (seg.get(2), seg.last()) {
        (Some(vol), Some(name)) if seg.len() >= 4 && !vol.is_empty() && !name.is_empty() => {
            Ok((vol, name))
        }
        _ => Err(StorageError::new(format!("invalid lun path: {}", path))),
    }
}

/// Trailing segment of a lun path
pub fn lun_name_from_path(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IgroupInfo {
    pub name: String,
    pub igroup_type: Option<String>,
    pub os_type: Option<String>,
}

impl IgroupInfo {
    pub fn from_element(e: &Element) -> Self {
        IgroupInfo {
            name: e
                .child_content("initiator-group-name")
                .unwrap_or_default()
                .to_string(),
            igroup_type: e.child_content("initiator-group-type").map(String::from),
            os_type: e.child_content("initiator-group-os-type").map(String::from),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LunMapping {
    pub initiator_group: String,
    pub lun_id: Option<String>,
    pub vserver: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetDetails {
    pub address: Option<String>,
    pub port: Option<String>,
    pub tpgroup_tag: Option<String>,
    /// Only reported by clustered arrays
    pub interface_enabled: Option<String>,
}

impl TargetDetails {
    pub fn from_element(e: &Element) -> Self {
        TargetDetails {
            address: e.child_content("ip-address").map(String::from),
            port: e.child_content("ip-port").map(String::from),
            tpgroup_tag: e.child_content("tpgroup-tag").map(String::from),
            interface_enabled: e.child_content("is-interface-enabled").map(String::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interface_enabled.as_deref().unwrap_or("true") == "true"
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LunGeometry {
    pub size: Option<u64>,
    pub bytes_per_sector: Option<u64>,
    pub sectors_per_track: Option<u64>,
    pub tracks_per_cylinder: Option<u64>,
    pub cylinders: Option<u64>,
    pub max_resize: Option<u64>,
}

/// Local cache of the luns on the backend, keyed by lun name.
///
/// A miss is answered by reloading the full lun list from the array.  The
/// reload runs under its own lock so concurrent misses only query once.
#[derive(Default)]
pub struct LunTable {
    luns: Mutex<HashMap<String, NetAppLun>>,
    refresh: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LunTable {
    pub fn new() -> Self {
        LunTable::default()
    }

    pub fn get(&self, name: &str) -> Option<NetAppLun> {
        lock(&self.luns).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.luns).contains_key(name)
    }

    pub fn insert(&self, lun: NetAppLun) {
        debug!("Adding {} to lun table", lun);
        lock(&self.luns).insert(lun.name.clone(), lun);
    }

    pub fn remove(&self, name: &str) -> Option<NetAppLun> {
        lock(&self.luns).remove(name)
    }

    /// Returns false if the lun is not cached
    pub fn set_size(&self, name: &str, size: u64) -> bool {
        match lock(&self.luns).get_mut(name) {
            Some(lun) => {
                lun.size = size;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.luns).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.luns).is_empty()
    }

    /// Drop everything and load `luns` in its place
    pub fn replace_all(&self, luns: Vec<NetAppLun>) {
        let mut table = lock(&self.luns);
        table.clear();
        for lun in luns {
            table.insert(lun.name.clone(), lun);
        }
    }

    /// Look a lun up, reloading the table through `load` when it is missing
    pub fn get_or_refresh<F>(&self, name: &str, load: F) -> StorageResult<NetAppLun>
    where
        F: FnOnce() -> StorageResult<Vec<NetAppLun>>,
    {
        if let Some(lun) = self.get(name) {
            return Ok(lun);
        }
        let _refreshing = lock(&self.refresh);
        // Another caller may have reloaded while we waited
        if let Some(lun) = self.get(name) {
            return Ok(lun);
        }
        debug!("Lun {} not cached. Refreshing lun table", name);
        let luns = load()?;
        {
            let mut table = lock(&self.luns);
            for lun in luns {
                table.insert(lun.name.clone(), lun);
            }
        }
        self.get(name)
            .ok_or_else(|| StorageError::RecordNotFound(format!("volume {}", name)))
    }
}

#[cfg(test)]
fn test_lun(name: &str) -> NetAppLun {
    let mut meta = LunMetadata::new("linux", "true");
    meta.path = Some(format!("/vol/vol1/{}", name));
    meta.volume = Some("vol1".into());
    NetAppLun::new(format!("openstack:/vol/vol1/{}", name), name, 1024, meta)
}

#[test]
fn test_split_lun_path() {
    assert_eq!(("vol1", "lun1"), split_lun_path("/vol/vol1/lun1").unwrap());
    assert!(split_lun_path("lun1").is_err());
    assert!(split_lun_path("/vol//lun1").is_err());
    assert_eq!("lun1", lun_name_from_path("/vol/vol1/lun1"));
}

#[test]
fn test_lun_table_refresh_on_miss() {
    let table = LunTable::new();
    table.insert(test_lun("lun1"));

    // cached entries never trigger a reload
    let lun = table
        .get_or_refresh("lun1", || panic!("should not reload"))
        .unwrap();
    assert_eq!("lun1", lun.name);

    let lun = table
        .get_or_refresh("lun2", || Ok(vec![test_lun("lun2"), test_lun("lun3")]))
        .unwrap();
    assert_eq!(1024, lun.size);
    assert_eq!(3, table.len());

    match table.get_or_refresh("lun4", || Ok(vec![])) {
        Err(StorageError::RecordNotFound(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_lun_table_concurrent_inserts() {
    use std::sync::Arc;
    use std::thread;

    let table = Arc::new(LunTable::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let table = table.clone();
            thread::spawn(move || {
                for j in 0..50 {
                    let name = format!("lun-{}-{}", i, j);
                    table.insert(test_lun(&name));
                    if j % 2 == 0 {
                        table.remove(&name);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(8 * 25, table.len());
}

#[test]
fn test_target_enabled_default() {
    let mut target = TargetDetails::default();
    assert!(target.is_enabled());
    target.interface_enabled = Some("false".into());
    assert!(!target.is_enabled());
}

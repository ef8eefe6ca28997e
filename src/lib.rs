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

#[macro_use]
extern crate serde_derive;

use serde::de::Deserialize;
use serde::Deserializer;

pub mod client;
pub mod clone;
pub mod config;
pub mod driver;
pub mod element;
pub mod error;
pub mod lun;
pub mod ssc;
pub mod transport;

#[cfg(test)]
mod testing;

pub use crate::config::NetappConfig;
pub use crate::driver::IscsiDriver;
pub use crate::error::{StorageError, StorageResult};

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum StringOrFloat {
    String(String),
    Float(f64),
}

/// Host configs often carry numbers as strings
fn deserialize_string_or_float<'de, D>(deserializer: D) -> ::std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match StringOrFloat::deserialize(deserializer)? {
        StringOrFloat::String(s) => s.trim().parse().map_err(D::Error::custom),
        StringOrFloat::Float(f) => Ok(f),
    }
}

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

use std::error::Error as err;
use std::fmt;
use std::io::Error;
use std::num::{ParseFloatError, ParseIntError};

use reqwest::header::InvalidHeaderValue;
use reqwest::Error as ReqwestError;
use serde_json::Error as JsonError;
use treexml::Error as TreeXmlError;
use xml::writer::Error as XmlEmitterError;

/// ZAPI error numbers meaning the LUN is not mapped to the igroup anymore
pub const ALREADY_UNMAPPED_CODES: [&str; 2] = ["13115", "9016"];

pub type StorageResult<T> = Result<T, StorageError>;

/// Custom error handling
#[derive(Debug)]
pub enum StorageError {
    /// A multi step operation left the array in a state that needs attention
    BackendApi(String),
    /// No volume on the array can hold the request
    BackendCapacity(String),
    Cancelled(String),
    /// The array reported a failed clone job
    Clone { code: String, reason: String },
    Error(String),
    HttpError(ReqwestError),
    InvalidConfig(String),
    InvalidHeaderValue(InvalidHeaderValue),
    IoError(Error),
    JsonError(JsonError),
    ParseFloatError(ParseFloatError),
    ParseIntError(ParseIntError),
    /// The array rejected a request. `code` is the ZAPI errno
    Protocol { code: String, message: String },
    RecordNotFound(String),
    Timeout(String),
    TreeXmlError(TreeXmlError),
    XmlEmitterError(XmlEmitterError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StorageError::BackendApi(ref e) => write!(f, "backend api error: {}", e),
            StorageError::BackendCapacity(ref e) => write!(f, "backend capacity error: {}", e),
            StorageError::Cancelled(ref e) => write!(f, "cancelled: {}", e),
            StorageError::Clone {
                ref code,
                ref reason,
            } => write!(f, "clone failed. code: {} reason: {}", code, reason),
            StorageError::Error(ref e) => f.write_str(e),
            StorageError::HttpError(ref e) => e.fmt(f),
            StorageError::InvalidConfig(ref e) => write!(f, "invalid config: {}", e),
            StorageError::InvalidHeaderValue(ref e) => e.fmt(f),
            StorageError::IoError(ref e) => e.fmt(f),
            StorageError::JsonError(ref e) => e.fmt(f),
            StorageError::ParseFloatError(ref e) => e.fmt(f),
            StorageError::ParseIntError(ref e) => e.fmt(f),
            StorageError::Protocol {
                ref code,
                ref message,
            } => write!(f, "NetApp api failed. Reason - {}:{}", code, message),
            StorageError::RecordNotFound(ref e) => write!(f, "{} not found", e),
            StorageError::Timeout(ref e) => write!(f, "timed out: {}", e),
            StorageError::TreeXmlError(ref e) => e.fmt(f),
            StorageError::XmlEmitterError(ref e) => e.fmt(f),
        }
    }
}

impl err for StorageError {
    fn description(&self) -> &str {
        "description() is deprecated; use Display"
    }
    fn source(&self) -> Option<&(dyn err + 'static)> {
        match *self {
            StorageError::BackendApi(_) => None,
            StorageError::BackendCapacity(_) => None,
            StorageError::Cancelled(_) => None,
            StorageError::Clone { .. } => None,
            StorageError::Error(_) => None,
            StorageError::HttpError(ref e) => e.source(),
            StorageError::InvalidConfig(_) => None,
            StorageError::InvalidHeaderValue(ref e) => e.source(),
            StorageError::IoError(ref e) => e.source(),
            StorageError::JsonError(ref e) => e.source(),
            StorageError::ParseFloatError(ref e) => e.source(),
            StorageError::ParseIntError(ref e) => e.source(),
            StorageError::Protocol { .. } => None,
            StorageError::RecordNotFound(_) => None,
            StorageError::Timeout(_) => None,
            StorageError::TreeXmlError(_) => None,
            StorageError::XmlEmitterError(ref e) => e.source(),
        }
    }
}

impl StorageError {
    /// Create a new StorageError with a String message
    pub fn new(err: String) -> StorageError {
        StorageError::Error(err)
    }

    pub fn protocol(code: &str, message: &str) -> StorageError {
        StorageError::Protocol {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// The ZAPI errno if this is an array side rejection
    pub fn code(&self) -> Option<&str> {
        match *self {
            StorageError::Protocol { ref code, .. } => Some(code),
            StorageError::Clone { ref code, .. } => Some(code),
            _ => None,
        }
    }

    /// True when unmapping failed only because the mapping is already gone
    pub fn is_already_unmapped(&self) -> bool {
        match *self {
            StorageError::Protocol { ref code, .. } => {
                ALREADY_UNMAPPED_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }
}

impl From<Error> for StorageError {
    fn from(err: Error) -> StorageError {
        StorageError::IoError(err)
    }
}

impl From<InvalidHeaderValue> for StorageError {
    fn from(err: InvalidHeaderValue) -> StorageError {
        StorageError::InvalidHeaderValue(err)
    }
}

impl From<JsonError> for StorageError {
    fn from(err: JsonError) -> StorageError {
        StorageError::JsonError(err)
    }
}

impl From<ParseFloatError> for StorageError {
    fn from(err: ParseFloatError) -> StorageError {
        StorageError::ParseFloatError(err)
    }
}

impl From<ParseIntError> for StorageError {
    fn from(err: ParseIntError) -> StorageError {
        StorageError::ParseIntError(err)
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> StorageError {
        StorageError::new(err)
    }
}

impl From<TreeXmlError> for StorageError {
    fn from(err: TreeXmlError) -> StorageError {
        StorageError::TreeXmlError(err)
    }
}

impl From<ReqwestError> for StorageError {
    fn from(err: ReqwestError) -> StorageError {
        StorageError::HttpError(err)
    }
}

impl From<XmlEmitterError> for StorageError {
    fn from(err: XmlEmitterError) -> StorageError {
        StorageError::XmlEmitterError(err)
    }
}

#[test]
fn test_already_unmapped_codes() {
    assert!(StorageError::protocol("13115", "not mapped").is_already_unmapped());
    assert!(StorageError::protocol("9016", "no such map").is_already_unmapped());
    assert!(!StorageError::protocol("13005", "busy").is_already_unmapped());
    assert!(!StorageError::BackendApi("13115".into()).is_already_unmapped());
}

//! Canned transports and helpers shared by the unit tests.
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
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clone::Sleeper;
use crate::element::Element;
use crate::error::*;
use crate::transport::{parse_response, Transport};

pub fn init_logging() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Debug, simplelog::Config::default());
}

pub fn fixture(name: &str) -> String {
    let mut s = String::new();
    let mut f = File::open(format!("tests/netapp/{}", name)).unwrap();
    f.read_to_string(&mut s).unwrap();
    s
}

pub fn passed() -> String {
    r#"<results status="passed"/>"#.to_string()
}

/// Replays scripted responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<StorageResult<Element>>>,
    requests: Mutex<Vec<(Element, bool)>>,
    version: Mutex<Option<(u32, u32)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        init_logging();
        Arc::new(ScriptedTransport::default())
    }

    pub fn push_xml(&self, xml: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(parse_response(xml));
    }

    pub fn push_fixture(&self, name: &str) {
        self.push_xml(&fixture(name));
    }

    pub fn push_passed(&self) {
        self.push_xml(&passed());
    }

    pub fn push_error(&self, code: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(StorageError::protocol(code, message)));
    }

    pub fn requests(&self) -> Vec<(Element, bool)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request(&self, index: usize) -> Element {
        self.requests.lock().unwrap()[index].0.clone()
    }

    pub fn request_names(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.name().to_string())
            .collect()
    }

    pub fn invoke_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn invoke(&self, request: &Element, tunnel: bool) -> StorageResult<Element> {
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), tunnel));
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Err(StorageError::new(format!(
                "no scripted response for {}",
                request.name()
            ))),
        }
    }

    fn api_version(&self) -> Option<(u32, u32)> {
        *self.version.lock().unwrap()
    }

    fn set_api_version(&self, major: u32, minor: u32) {
        *self.version.lock().unwrap() = Some((major, minor));
    }
}

/// Counts sleeps instead of sleeping
#[derive(Default)]
pub struct CountingSleeper {
    pub count: AtomicUsize,
}

impl CountingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(CountingSleeper::default())
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Sleeper for CountingSleeper {
    fn sleep(&self, _interval: Duration) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

//! Netapp uses a series of XML request/response queries to interact with the server.
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
use std::fs::File;
use std::io::{Read, Write};
use std::sync::RwLock;

use crate::config::NetappConfig;
use crate::element::Element;
use crate::error::*;

use log::{debug, trace};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use xml::writer::{EventWriter, XmlEvent};

static FILER_URL: &str = "servlets/netapp.servlets.admin.XMLrequest_filer";
static ZAPI_XMLNS: &str = "http://www.netapp.com/filer/admin";

const UNKNOWN_ERRNO: &str = "ESTATUSFAILED";
const UNKNOWN_REASON: &str = "Execution status is failed due to unknown reason.";

/// Sends one request tree to the array and hands back the `results` tree.
pub trait Transport: Send + Sync {
    /// `tunnel` scopes the call to the configured vserver or vfiler.
    /// Without it the call is issued against the cluster or filer itself.
    fn invoke(&self, request: &Element, tunnel: bool) -> StorageResult<Element>;

    fn api_version(&self) -> Option<(u32, u32)> {
        None
    }

    fn set_api_version(&self, _major: u32, _minor: u32) {}
}

pub struct ZapiServer {
    client: Client,
    url: String,
    user: String,
    password: String,
    vserver: Option<String>,
    vfiler: Option<String>,
    api_version: RwLock<Option<(u32, u32)>>,
}

/// Build the http client, trusting the configured certificate if one is given
pub fn build_client(config: &NetappConfig) -> StorageResult<Client> {
    let mut builder = Client::builder();
    if let Some(ref cert_file) = config.certificate {
        let mut buf = Vec::new();
        debug!("Reading cert: {}", cert_file);
        File::open(cert_file)?.read_to_end(&mut buf)?;
        let cert = reqwest::Certificate::from_der(&buf)?;
        builder = builder.add_root_certificate(cert);
    }
    Ok(builder.build()?)
}

impl ZapiServer {
    pub fn new(client: &Client, config: &NetappConfig) -> Self {
        ZapiServer {
            client: client.clone(),
            url: format!(
                "{}://{}:{}/{}",
                config.transport_type.scheme(),
                config.server_hostname,
                config.port(),
                FILER_URL
            ),
            user: config.login.clone(),
            password: config.password.clone(),
            vserver: None,
            vfiler: None,
            api_version: RwLock::new(None),
        }
    }

    pub fn set_vserver(&mut self, vserver: Option<String>) {
        self.vserver = vserver;
    }

    pub fn set_vfiler(&mut self, vfiler: Option<String>) {
        self.vfiler = vfiler;
    }

    fn build_request(&self, request: &Element, tunnel: bool) -> StorageResult<Vec<u8>> {
        let mut output: Vec<u8> = Vec::new();
        {
            let mut writer = EventWriter::new(&mut output);
            let version = match self.api_version() {
                Some((major, minor)) => format!("{}.{}", major, minor),
                None => "1.0".to_string(),
            };
            start_request(&mut writer, &version, self.tunnel_target(tunnel))?;
            request.write(&mut writer)?;
            writer.write(XmlEvent::end_element().name("netapp"))?;
        }
        Ok(output)
    }

    fn tunnel_target(&self, tunnel: bool) -> Option<(&'static str, &str)> {
        if !tunnel {
            return None;
        }
        if let Some(ref vfiler) = self.vfiler {
            return Some(("vfiler", vfiler));
        }
        if let Some(ref vserver) = self.vserver {
            return Some(("vserver", vserver));
        }
        None
    }
}

fn start_request<W: Write>(
    w: &mut EventWriter<W>,
    version: &str,
    tunnel: Option<(&str, &str)>,
) -> StorageResult<()> {
    // The array records the client platform for its audit log
    let sys_info = uname::uname()?;
    let platform = format!("{} {}", sys_info.sysname, sys_info.machine);

    let mut e = XmlEvent::start_element("netapp")
        .default_ns(ZAPI_XMLNS)
        .attr("version", version)
        .attr("nmsdk_version", "9.4")
        .attr("nmsdk_platform", &platform)
        .attr("nmsdk_language", "rust")
        .attr("nmsdk_app", "netapp-iscsi");
    if let Some((key, target)) = tunnel {
        e = e.attr(key, target);
    }
    w.write(e)?;
    Ok(())
}

fn check_failure(e: &Element) -> StorageResult<()> {
    match e.attr("status") {
        Some("passed") => Ok(()),
        _ => Err(StorageError::protocol(
            e.attr("errno").unwrap_or(UNKNOWN_ERRNO),
            e.attr("reason").unwrap_or(UNKNOWN_REASON),
        )),
    }
}

/// Pull the `results` element out of a response document and turn a failed
/// status into a protocol error.
pub fn parse_response(data: &str) -> StorageResult<Element> {
    let root = Element::from_xml(data)?;
    let results = if root.name() == "results" {
        root
    } else {
        root.child("results")
            .cloned()
            .ok_or_else(|| StorageError::new(format!("results tag not found in {:?}", root)))?
    };
    check_failure(&results)?;
    Ok(results)
}

impl Transport for ZapiServer {
    fn invoke(&self, request: &Element, tunnel: bool) -> StorageResult<Element> {
        let req = self.build_request(request, tunnel)?;
        debug!("Sending: {}", String::from_utf8_lossy(&req));
        let s = self
            .client
            .post(&self.url)
            .basic_auth(self.user.clone(), Some(self.password.clone()))
            .body(req)
            .header(CONTENT_TYPE, HeaderValue::from_str("text/xml")?)
            .send()?
            .error_for_status()?;

        let data = s.text()?;
        trace!("api_request response: {}", data);
        parse_response(&data)
    }

    fn api_version(&self) -> Option<(u32, u32)> {
        *self
            .api_version
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_api_version(&self, major: u32, minor: u32) {
        let mut version = self
            .api_version
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *version = Some((major, minor));
    }
}

#[cfg(test)]
fn test_server() -> ZapiServer {
    let config: NetappConfig = serde_json::from_str(
        r#"{"server_hostname": "filer1", "login": "admin", "password": "pass",
            "transport_type": "https"}"#,
    )
    .unwrap();
    ZapiServer::new(&Client::new(), &config)
}

#[test]
fn test_request_url() {
    let server = test_server();
    assert_eq!(
        "https://filer1:443/servlets/netapp.servlets.admin.XMLrequest_filer",
        server.url
    );
}

#[test]
fn test_request_tunneling() {
    let mut server = test_server();
    server.set_vserver(Some("openstack".to_string()));
    server.set_api_version(1, 19);
    let request = Element::new("lun-get-iter");

    let global = String::from_utf8(server.build_request(&request, false).unwrap()).unwrap();
    assert!(global.contains("version=\"1.19\""));
    assert!(!global.contains("vserver="));
    assert!(global.contains("<lun-get-iter"));

    let tunneled = String::from_utf8(server.build_request(&request, true).unwrap()).unwrap();
    assert!(tunneled.contains("vserver=\"openstack\""));
}

#[test]
fn test_parse_failed_response() {
    let data = r#"<?xml version="1.0" encoding="UTF-8"?>
        <netapp version="1.19" xmlns="http://www.netapp.com/filer/admin">
          <results status="failed" errno="13115" reason="LUN not mapped"/>
        </netapp>"#;
    match parse_response(data) {
        Err(StorageError::Protocol { code, message }) => {
            assert_eq!("13115", code);
            assert_eq!("LUN not mapped", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_parse_passed_response() {
    let data = r#"<netapp version="1.19" xmlns="http://www.netapp.com/filer/admin">
          <results status="passed"><node-name>iqn.1992-08.com.netapp:sn.1</node-name></results>
        </netapp>"#;
    let results = parse_response(data).unwrap();
    assert_eq!(Some("iqn.1992-08.com.netapp:sn.1"), results.child_content("node-name"));
}

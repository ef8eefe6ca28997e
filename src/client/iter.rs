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
use crate::element::Element;
use crate::error::*;
use crate::transport::Transport;

use log::debug;

pub const MAX_PAGE_RECORDS: u32 = 100;

/// A `*-get-iter` call.  The array hands back at most `MAX_PAGE_RECORDS` entries
/// per page plus a `next-tag` to continue from.
#[derive(Clone, Debug)]
pub struct IterQuery {
    api: String,
    query: Option<Element>,
    desired_attributes: Option<Element>,
}

/// One page of a get-iter call
#[derive(Debug, Default)]
pub struct IterPage {
    pub records: Vec<Element>,
    pub next_tag: Option<String>,
}

impl IterQuery {
    pub fn new(api: &str) -> Self {
        IterQuery {
            api: api.to_string(),
            query: None,
            desired_attributes: None,
        }
    }

    /// `filter` is wrapped in the `query` node
    pub fn query(mut self, filter: Element) -> Self {
        self.query = Some(filter);
        self
    }

    /// `attributes` is wrapped in the `desired-attributes` node
    pub fn desired_attributes(mut self, attributes: Element) -> Self {
        self.desired_attributes = Some(attributes);
        self
    }

    pub fn build(&self, tag: Option<&str>) -> Element {
        let mut request = Element::new(&self.api);
        request.add_new_child("max-records", MAX_PAGE_RECORDS.to_string().as_str());
        if let Some(tag) = tag {
            request.add_new_child("tag", tag);
        }
        if let Some(ref filter) = self.query {
            let mut query = Element::new("query");
            query.add_child(filter.clone());
            request.add_child(query);
        }
        if let Some(ref attributes) = self.desired_attributes {
            let mut desired = Element::new("desired-attributes");
            desired.add_child(attributes.clone());
            request.add_child(desired);
        }
        request
    }

    pub fn fetch_page(
        &self,
        transport: &dyn Transport,
        tag: Option<&str>,
        tunnel: bool,
    ) -> StorageResult<IterPage> {
        let results = transport.invoke(&self.build(tag), tunnel)?;
        let num_records = results.child_parse::<u64>("num-records")?.unwrap_or(0);
        let records = if num_records > 0 {
            results.children_of("attributes-list").to_vec()
        } else {
            vec![]
        };
        Ok(IterPage {
            records,
            next_tag: results.child_content("next-tag").map(String::from),
        })
    }

    /// Follow `next-tag` until the array stops returning one
    pub fn fetch_all(&self, transport: &dyn Transport, tunnel: bool) -> StorageResult<Vec<Element>> {
        let mut records = Vec::new();
        let mut tag: Option<String> = None;
        loop {
            let page = self.fetch_page(transport, tag.as_deref(), tunnel)?;
            debug!("{} returned {} records", self.api, page.records.len());
            records.extend(page.records);
            match page.next_tag {
                Some(next) => tag = Some(next),
                None => break,
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
use crate::testing::ScriptedTransport;

#[test]
fn test_build_request() {
    let query = IterQuery::new("lun-get-iter")
        .query(Element::with_children("lun-info", vec![("vserver", "openstack")]));
    let request = query.build(Some("page2"));
    let names: Vec<&str> = request.children().iter().map(|c| c.name()).collect();
    assert_eq!(vec!["max-records", "tag", "query"], names);
    assert_eq!(Some("100"), request.child_content("max-records"));
    assert_eq!(
        Some("openstack"),
        request.children_of("query")[0].child_content("vserver")
    );
}

#[test]
fn test_fetch_all_follows_tags() {
    let transport = ScriptedTransport::new();
    transport.push_xml(
        r#"<results status="passed"><num-records>2</num-records>
             <attributes-list><lun-info><path>/vol/vol1/a</path></lun-info>
             <lun-info><path>/vol/vol1/b</path></lun-info></attributes-list>
             <next-tag>tag-1</next-tag></results>"#,
    );
    transport.push_xml(
        r#"<results status="passed"><num-records>1</num-records>
             <attributes-list><lun-info><path>/vol/vol2/c</path></lun-info></attributes-list>
           </results>"#,
    );
    let records = IterQuery::new("lun-get-iter")
        .fetch_all(&*transport, false)
        .unwrap();
    assert_eq!(3, records.len());
    assert_eq!(Some("/vol/vol2/c"), records[2].child_content("path"));
    assert_eq!(2, transport.invoke_count());
    assert_eq!(None, transport.request(0).child_content("tag"));
    assert_eq!(Some("tag-1"), transport.request(1).child_content("tag"));
}

#[test]
fn test_fetch_page_without_records() {
    let transport = ScriptedTransport::new();
    transport.push_xml(
        r#"<results status="passed"><num-records>0</num-records>
             <attributes-list><lun-info/></attributes-list></results>"#,
    );
    let page = IterQuery::new("lun-get-iter")
        .fetch_page(&*transport, None, true)
        .unwrap();
    assert!(page.records.is_empty());
    assert!(page.next_tag.is_none());
}

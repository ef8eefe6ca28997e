//! The ZAPI element tree.  Every request is built from these and every
//! response is handed back as one.
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
use std::collections::BTreeMap;
use std::io::Write;
use std::str::FromStr;

use crate::error::*;

use treexml::Document;
use xml::writer::{EventWriter, XmlEvent};

/// A single ZAPI node.  It either carries text content or children.
/// Children are ordered and may repeat, e.g. several `block-range` entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Element {
    name: String,
    content: Option<String>,
    attributes: BTreeMap<String, String>,
    children: Vec<Element>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Element {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_content(name: &str, content: &str) -> Self {
        Element {
            name: name.to_string(),
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    /// Build a node and give it one child per (name, value) pair.  A `None`
    /// value produces an empty child which is how desired-attributes are
    /// expressed in queries.
    pub fn with_children<'a, I, V>(name: &str, children: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Into<Option<&'a str>>,
    {
        let mut e = Element::new(name);
        for (child_name, value) in children {
            e.add_new_child(child_name, value);
        }
        e
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: &str) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    /// Append a leaf child, empty when `content` is `None`
    pub fn add_new_child<'a, V>(&mut self, name: &str, content: V)
    where
        V: Into<Option<&'a str>>,
    {
        let child = match content.into() {
            Some(c) => Element::with_content(name, c),
            None => Element::new(name),
        };
        self.children.push(child);
    }

    /// Append a child with no content or children
    pub fn add_empty_child(&mut self, name: &str) {
        self.children.push(Element::new(name));
    }

    pub fn add_child(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn add_node_with_children<'a, I, V>(&mut self, name: &str, children: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Into<Option<&'a str>>,
    {
        self.children.push(Element::with_children(name, children));
    }

    /// First immediate child with this name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text content of the first immediate child with this name
    pub fn child_content(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.content())
    }

    /// Parse the text of a child, `None` when missing or empty
    pub fn child_parse<T>(&self, name: &str) -> StorageResult<Option<T>>
    where
        T: FromStr,
    {
        match self.child_content(name) {
            Some(s) => match T::from_str(s) {
                Ok(val) => Ok(Some(val)),
                Err(_) => Err(StorageError::new(format!(
                    "parsing {} failed. value: {}",
                    name, s
                ))),
            },
            None => Ok(None),
        }
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Children of the named child or nothing if that child is absent
    pub fn children_of(&self, name: &str) -> &[Element] {
        match self.child(name) {
            Some(c) => c.children(),
            None => &[],
        }
    }

    pub fn write<W: Write>(&self, w: &mut EventWriter<W>) -> StorageResult<()> {
        let mut start = XmlEvent::start_element(self.name.as_str());
        for (key, value) in &self.attributes {
            start = start.attr(key.as_str(), value.as_str());
        }
        w.write(start)?;
        if let Some(ref chars) = self.content {
            w.write(XmlEvent::characters(chars))?;
        }
        for child in &self.children {
            child.write(w)?;
        }
        w.write(XmlEvent::end_element().name(self.name.as_str()))?;
        Ok(())
    }

    pub fn to_xml_string(&self) -> StorageResult<String> {
        let mut output: Vec<u8> = Vec::new();
        {
            let mut writer = EventWriter::new(&mut output);
            self.write(&mut writer)?;
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Parse a document and return its root element
    pub fn from_xml(data: &str) -> StorageResult<Element> {
        let doc = Document::parse(data.as_bytes())?;
        let root = doc
            .root
            .ok_or_else(|| StorageError::new(format!("root xml not found for {}", data)))?;
        Ok(Element::from(root))
    }
}

impl From<treexml::Element> for Element {
    fn from(e: treexml::Element) -> Element {
        // Indented documents leave whitespace-only text behind on parents
        let content = e.text.and_then(|t| {
            let trimmed = t.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });
        Element {
            name: e.name,
            content,
            attributes: e.attributes.into_iter().collect(),
            children: e.children.into_iter().map(Element::from).collect(),
        }
    }
}

#[test]
fn test_with_children_keeps_order_and_nulls() {
    let mut des = Element::new("initiator-group-info");
    des.add_node_with_children("initiators", vec![("initiator-info", None::<&str>)]);
    des.add_empty_child("vserver");
    des.add_new_child("initiator-group-name", None::<&str>);

    assert_eq!(3, des.children().len());
    assert_eq!("initiators", des.children()[0].name());
    assert_eq!(None, des.child_content("vserver"));
    assert!(des.child("vserver").is_some());
    assert_eq!(
        "initiator-info",
        des.child("initiators").unwrap().children()[0].name()
    );
}

#[test]
fn test_duplicate_children_are_kept() {
    let mut ranges = Element::new("block-ranges");
    ranges.add_node_with_children("block-range", vec![("block-count", "1")]);
    ranges.add_node_with_children("block-range", vec![("block-count", "2")]);
    assert_eq!(2, ranges.children().len());
    // lookups by name return the first match
    assert_eq!(
        Some("1"),
        ranges.child("block-range").unwrap().child_content("block-count")
    );
}

#[test]
fn test_parse_response() {
    let e = Element::from_xml(
        r#"<results status="passed">
              <major-version>1</major-version>
              <minor-version>19</minor-version>
              <attributes-list>
                <lun-info> </lun-info>
              </attributes-list>
           </results>"#,
    )
    .unwrap();
    assert_eq!("results", e.name());
    assert_eq!(Some("passed"), e.attr("status"));
    assert_eq!(Some("1"), e.child_content("major-version"));
    assert_eq!(Some(19), e.child_parse::<u32>("minor-version").unwrap());
    assert_eq!(None, e.child_content("attributes-list"));
    assert_eq!(1, e.children_of("attributes-list").len());
    assert_eq!(None, e.children_of("attributes-list")[0].content());
    assert!(e.children_of("no-such-thing").is_empty());
    assert!(e.child_parse::<u32>("attributes-list").unwrap().is_none());
}

#[test]
fn test_write_request() {
    let e = Element::with_children(
        "lun-destroy",
        vec![("path", "/vol/vol1/lun1"), ("force", "true")],
    );
    let xml = e.to_xml_string().unwrap();
    assert!(xml.contains("<lun-destroy><path>/vol/vol1/lun1</path><force>true</force></lun-destroy>"));
}

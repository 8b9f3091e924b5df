// XML document handling
//
// DBGp responses are small XML documents: metadata in attributes, payloads in
// text content. Parsed with quick-xml into an owned element tree so that
// base64-encoded content can be decoded in place before dispatch.

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use crate::error::{DbgpError, DbgpResult};

/// One element of a parsed DBGp message.
///
/// Attribute names are kept verbatim, prefixes included, so `type` and
/// `xsi:type` stay distinct.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// Parse a complete XML document into its root element.
    pub fn parse(bytes: &[u8]) -> DbgpResult<Element> {
        let mut reader = Reader::from_reader(bytes);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| DbgpError::MalformedDocument(e.to_string()))?;
            match event {
                Event::Start(start) => {
                    let element = element_from_start(&start)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DbgpError::MalformedDocument("unmatched end tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        let unescaped = text
                            .unescape()
                            .map_err(|e| DbgpError::MalformedDocument(e.to_string()))?;
                        top.text.push_str(&unescaped);
                    }
                }
                Event::CData(cdata) => {
                    if let Some(top) = stack.last_mut() {
                        top.text
                            .push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                    }
                }
                Event::Eof => break,
                // Declarations, comments and processing instructions carry
                // nothing DBGp cares about.
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(DbgpError::MalformedDocument("unterminated element".into()));
        }
        root.ok_or_else(|| DbgpError::MalformedDocument("document has no root element".into()))
    }

    /// Look up an attribute by its verbatim name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attr_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.attr(name).unwrap_or(default)
    }

    pub fn find_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> DbgpResult<Element> {
    let mut element = Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Element::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| DbgpError::MalformedDocument(e.to_string()))?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| DbgpError::MalformedDocument(e.to_string()))?
            .into_owned();
        element.attributes.push((name, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> DbgpResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(DbgpError::MalformedDocument(
            "multiple root elements".into(),
        ));
    }
    Ok(())
}

/// Decode every element marked `encoding="base64"` in place, depth first.
/// Unmarked elements are left untouched. Decode failures are logged and the
/// content kept as received.
pub fn decode_encoded_content(element: &mut Element) {
    if element.attr("encoding") == Some("base64") && !element.text.trim().is_empty() {
        match crate::base64::decode(&element.text) {
            Ok(raw) => element.text = String::from_utf8_lossy(&raw).into_owned(),
            Err(e) => warn!("base64 decode failed for <{}> content: {}", element.name, e),
        }
    }
    for child in &mut element.children {
        decode_encoded_content(child);
    }
}

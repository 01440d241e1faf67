//! Owned XML tree built on quick-xml.
//!
//! The mapping engine resolves declarative paths repeatedly against the same
//! document, so the streaming reader is materialised once into a small owned
//! tree. Element names are stored prefix-stripped; the default namespace URI
//! is detected once from the root start tag and recorded per document, never
//! held in shared state.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use tracing::trace;

use crate::error::{NodulyxError, Result};

/// A single element: local name, attributes, accumulated text, children.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn new(name: String) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given local name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First child matching any of the given local names.
    /// Used where two historical tag vocabularies name the same concept.
    pub fn child_of_any(&self, names: &[&str]) -> Option<&XmlElement> {
        self.children.iter().find(|c| names.contains(&c.name.as_str()))
    }

    /// All children matching any of the given local names, in document order.
    pub fn children_of_any<'a>(&'a self, names: &'a [&'a str]) -> Vec<&'a XmlElement> {
        self.children
            .iter()
            .filter(|c| names.contains(&c.name.as_str()))
            .collect()
    }

    /// Trimmed text of the first child with the given name, if non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.trimmed_text())
    }

    /// Trimmed own text, if non-empty.
    pub fn trimmed_text(&self) -> Option<&str> {
        let t = self.text.trim();
        if t.is_empty() { None } else { Some(t) }
    }

    /// Attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a named child exists and carries non-empty text.
    pub fn has_populated_child(&self, name: &str) -> bool {
        self.child_text(name).is_some()
    }

    /// Depth-first search for the first descendant with the given name.
    pub fn descendant(&self, name: &str) -> Option<&XmlElement> {
        if let Some(c) = self.child(name) {
            return Some(c);
        }
        self.children.iter().find_map(|c| c.descendant(name))
    }
}

/// A parsed document with its detected default namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub root: XmlElement,
    pub namespace: Option<String>,
}

impl XmlDocument {
    /// Parse a UTF-8 XML string into an owned tree.
    ///
    /// Any well-formedness violation (mismatched or unclosed tags, bad
    /// entities) maps to `NodulyxError::XmlSyntax`.
    pub fn parse_str(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut namespace: Option<String> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let mut elem = XmlElement::new(local_name(e.name().as_ref()));
                    for attr in e.attributes() {
                        let attr = attr.map_err(|err| {
                            NodulyxError::XmlSyntax(format!("bad attribute: {err}"))
                        })?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                        let value = attr
                            .unescape_value()
                            .map_err(|err| {
                                NodulyxError::XmlSyntax(format!("bad attribute value: {err}"))
                            })?
                            .to_string();
                        if key == "xmlns" {
                            if stack.is_empty() && root.is_none() {
                                namespace = Some(value);
                            }
                        } else if !key.starts_with("xmlns:") {
                            elem.attributes.push((local_name(key.as_bytes()), value));
                        }
                    }
                    stack.push(elem);
                }
                Ok(Event::Empty(ref e)) => {
                    let mut elem = XmlElement::new(local_name(e.name().as_ref()));
                    for attr in e.attributes() {
                        let attr = attr.map_err(|err| {
                            NodulyxError::XmlSyntax(format!("bad attribute: {err}"))
                        })?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                        let value = attr
                            .unescape_value()
                            .map_err(|err| {
                                NodulyxError::XmlSyntax(format!("bad attribute value: {err}"))
                            })?
                            .to_string();
                        if key == "xmlns" {
                            if stack.is_empty() && root.is_none() {
                                namespace = Some(value);
                            }
                        } else if !key.starts_with("xmlns:") {
                            elem.attributes.push((local_name(key.as_bytes()), value));
                        }
                    }
                    attach(&mut stack, &mut root, elem)?;
                }
                Ok(Event::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| NodulyxError::XmlSyntax(format!("bad text: {err}")))?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(ref e)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Ok(Event::End(ref e)) => {
                    let elem = stack.pop().ok_or_else(|| {
                        NodulyxError::XmlSyntax(format!(
                            "unexpected closing tag </{}>",
                            String::from_utf8_lossy(e.name().as_ref())
                        ))
                    })?;
                    let closing = local_name(e.name().as_ref());
                    if elem.name != closing {
                        return Err(NodulyxError::XmlSyntax(format!(
                            "mismatched closing tag </{closing}>, expected </{}>",
                            elem.name
                        )));
                    }
                    attach(&mut stack, &mut root, elem)?;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(NodulyxError::XmlSyntax(err.to_string())),
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(NodulyxError::XmlSyntax(format!(
                "unclosed element <{}>",
                open.name
            )));
        }

        match root {
            Some(root) => {
                trace!(root = %root.name, namespace = ?namespace, "Parsed document");
                Ok(Self { root, namespace })
            }
            None => Err(NodulyxError::XmlSyntax("document has no root element".to_string())),
        }
    }

    /// Parse a document from a file path.
    pub fn parse_file(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path).map_err(|err| {
            NodulyxError::XmlSyntax(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::parse_str(&xml)
    }
}

/// Strip any namespace prefix from a qualified name.
fn local_name(name: &[u8]) -> String {
    let full = String::from_utf8_lossy(name);
    match full.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => full.to_string(),
    }
}

fn attach(
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    elem: XmlElement,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(elem);
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(NodulyxError::XmlSyntax(
                    "multiple root elements".to_string(),
                ));
            }
            *root = Some(elem);
            Ok(())
        }
    }
}

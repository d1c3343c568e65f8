//! Namespace-aware XML tree document
//!
//! The persisted access-control datastore is read into an owned element
//! tree, queried and edited through [`NodePath`]s, and written back whole.
//!
//! [`NodeId`]s are positional (child indexes from the root element). They
//! stay valid only until the next structural change to the tree and must
//! not be kept across a [`XmlDocument::save`]; resolve them again by path.

use std::path::Path;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};
use tracing::debug;

use crate::error::{ConfiguratorError, Result};
use crate::fsutil;
use crate::xpath::{NodePath, Predicate, QualifiedName, Step};

/// A node in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

/// An element with its resolved namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Name as written in the document, possibly prefixed
    pub name: String,
    /// Resolved namespace URI
    pub namespace: Option<String>,
    /// Attributes in document order, namespace declarations included
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Concatenated text content of direct text children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(s) | Node::CData(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace the text content, keeping element children
    pub fn set_text(&mut self, value: &str) {
        self.children
            .retain(|node| !matches!(node, Node::Text(_) | Node::CData(_)));
        if !value.is_empty() {
            self.children.push(Node::Text(value.to_string()));
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    fn is(&self, name: &QualifiedName) -> bool {
        self.local_name() == name.local && self.namespace == name.namespace
    }

    fn satisfies(&self, predicate: &Option<Predicate>) -> bool {
        match predicate {
            None => true,
            Some(p) => self
                .child_elements()
                .any(|child| child.is(&p.child) && child.text() == p.value),
        }
    }

    fn matches(&self, step: &Step) -> bool {
        self.is(&step.name) && self.satisfies(&step.predicate)
    }

    /// A new child element in `namespace`.
    ///
    /// A child in the parent's namespace reuses the parent's prefix;
    /// any other namespace is declared on the child as the default one.
    fn new_child(&self, name: &QualifiedName) -> Element {
        let mut attributes = Vec::new();
        let qualified = if name.namespace == self.namespace {
            match self.prefix() {
                Some(prefix) => format!("{}:{}", prefix, name.local),
                None => name.local.clone(),
            }
        } else {
            attributes.push((
                "xmlns".to_string(),
                name.namespace.clone().unwrap_or_default(),
            ));
            name.local.clone()
        };
        Element {
            name: qualified,
            namespace: name.namespace.clone(),
            attributes,
            children: Vec::new(),
        }
    }
}

/// Positional handle of an element; see the module docs for its lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodeId(Vec<usize>);

impl NodeId {
    /// The root element
    pub fn root() -> Self {
        Self::default()
    }

    fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }
}

/// Parsed XML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    declaration: bool,
    prolog: Vec<Node>,
    root: Element,
}

impl XmlDocument {
    /// Create a document around `root`
    pub fn new(root: Element) -> Self {
        Self {
            declaration: true,
            prolog: Vec::new(),
            root,
        }
    }

    /// Load a document from disk.
    ///
    /// A missing file is `NotFound`; unparsable or non UTF-8 content is
    /// `Corrupt`; any other read failure is `ReadError`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fsutil::read_to_string(path)?;
        Self::parse(&text).map_err(|reason| ConfiguratorError::corrupt(path, reason))
    }

    /// Parse a document from a string
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut reader = NsReader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut declaration = false;
        let mut prolog = Vec::new();
        let mut root: Option<Element> = None;
        let mut stack: Vec<Element> = Vec::new();

        loop {
            let (ns, event) = reader.read_resolved_event().map_err(|e| e.to_string())?;
            let node = match event {
                Event::Start(start) => {
                    stack.push(element_from(ns, &start)?);
                    continue;
                }
                Event::Empty(start) => Node::Element(element_from(ns, &start)?),
                Event::End(_) => match stack.pop() {
                    Some(element) => Node::Element(element),
                    None => return Err("unexpected closing tag".to_string()),
                },
                Event::Text(t) => Node::Text(t.unescape().map_err(|e| e.to_string())?.into_owned()),
                Event::CData(c) => Node::CData(String::from_utf8_lossy(&c.into_inner()).into_owned()),
                Event::Comment(c) => Node::Comment(String::from_utf8_lossy(&c).into_owned()),
                Event::Decl(_) => {
                    declaration = true;
                    continue;
                }
                Event::PI(_) | Event::DocType(_) => continue,
                Event::Eof => break,
            };

            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => match node {
                    Node::Element(element) if root.is_none() => root = Some(element),
                    Node::Element(_) => return Err("multiple root elements".to_string()),
                    Node::Comment(_) if root.is_none() => prolog.push(node),
                    Node::Text(_) | Node::CData(_) => {
                        return Err("text outside of the root element".to_string());
                    }
                    Node::Comment(_) => {}
                },
            }
        }

        if !stack.is_empty() {
            return Err("unexpected end of document".to_string());
        }
        let root = root.ok_or_else(|| "no root element".to_string())?;

        Ok(Self {
            declaration,
            prolog,
            root,
        })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Serialize with two-space indentation
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        if self.declaration {
            writer
                .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
                .map_err(std::io::Error::other)?;
        }
        for node in &self.prolog {
            write_node(&mut writer, node)?;
        }
        write_element(&mut writer, &self.root)?;

        let mut text = String::from_utf8(writer.into_inner())
            .map_err(|e| ConfiguratorError::Io(std::io::Error::other(e)))?;
        text.push('\n');
        Ok(text)
    }

    /// Replace the file at `path` with this document.
    ///
    /// Every [`NodeId`] taken before the save must be considered stale.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self
            .to_xml_string()
            .map_err(|e| ConfiguratorError::write(path, e))?;
        fsutil::write_atomic(path, text.as_bytes())?;
        debug!(path = %path.display(), "saved document");
        Ok(())
    }

    /// All elements selected by `path`, in document order
    pub fn find_all(&self, path: &NodePath) -> Vec<NodeId> {
        let steps = path.steps();
        if !self.root.matches(&steps[0]) {
            return Vec::new();
        }

        let mut current = vec![NodeId::root()];
        for step in &steps[1..] {
            let mut next = Vec::new();
            for id in &current {
                if let Some(element) = self.get(id) {
                    for (index, node) in element.children.iter().enumerate() {
                        if let Node::Element(child) = node {
                            if child.matches(step) {
                                next.push(id.child(index));
                            }
                        }
                    }
                }
            }
            current = next;
        }
        current
    }

    /// First element selected by `path`
    pub fn find(&self, path: &NodePath) -> Option<NodeId> {
        self.find_all(path).into_iter().next()
    }

    /// Text of every element selected by `path`
    pub fn texts(&self, path: &NodePath) -> Vec<String> {
        self.find_all(path)
            .iter()
            .filter_map(|id| self.get(id))
            .map(Element::text)
            .collect()
    }

    /// Text of the first element selected by `path`
    pub fn text(&self, path: &NodePath) -> Option<String> {
        self.find(path).and_then(|id| self.get(&id)).map(Element::text)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Element> {
        let mut element = &self.root;
        for &index in &id.0 {
            element = match element.children.get(index) {
                Some(Node::Element(child)) => child,
                _ => return None,
            };
        }
        Some(element)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Element> {
        let mut element = &mut self.root;
        for &index in &id.0 {
            element = match element.children.get_mut(index) {
                Some(Node::Element(child)) => child,
                _ => return None,
            };
        }
        Some(element)
    }

    /// Insert a new child element under `parent` at `index` (clamped to
    /// the number of children), optionally with text content
    pub fn insert_child(
        &mut self,
        parent: &NodeId,
        index: usize,
        name: &QualifiedName,
        text: Option<&str>,
    ) -> Result<NodeId> {
        let parent_element = self.get_mut(parent).ok_or_else(|| stale(parent))?;
        let mut child = parent_element.new_child(name);
        if let Some(text) = text {
            child.set_text(text);
        }
        let index = index.min(parent_element.children.len());
        parent_element.children.insert(index, Node::Element(child));
        Ok(parent.child(index))
    }

    /// Append a new child element under `parent`
    pub fn append_child(
        &mut self,
        parent: &NodeId,
        name: &QualifiedName,
        text: Option<&str>,
    ) -> Result<NodeId> {
        self.insert_child(parent, usize::MAX, name, text)
    }

    /// Detach the element `id`; handles of its later siblings become stale
    pub fn remove(&mut self, id: &NodeId) -> Option<Element> {
        let (&index, parent) = id.0.split_last()?;
        let parent = self.get_mut(&NodeId(parent.to_vec()))?;
        if !matches!(parent.children.get(index), Some(Node::Element(_))) {
            return None;
        }
        match parent.children.remove(index) {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Return the element selected by `path`, creating every missing step.
    ///
    /// A created step with a predicate gets the predicate's child too. The
    /// root element itself is never created.
    pub fn ensure(&mut self, path: &NodePath) -> Result<NodeId> {
        let steps = path.steps();
        if !self.root.matches(&steps[0]) {
            return Err(ConfiguratorError::InvalidPath {
                path: path.to_string(),
                reason: format!("document root is '{}'", self.root.name),
            });
        }

        let mut id = NodeId::root();
        for step in &steps[1..] {
            let existing = self.get(&id).and_then(|element| {
                element.children.iter().position(|node| match node {
                    Node::Element(child) => child.matches(step),
                    _ => false,
                })
            });
            id = match existing {
                Some(index) => id.child(index),
                None => {
                    let created = self.append_child(&id, &step.name, None)?;
                    if let Some(predicate) = &step.predicate {
                        self.append_child(&created, &predicate.child, Some(&predicate.value))?;
                    }
                    created
                }
            };
        }
        Ok(id)
    }

    /// Set the text of a field.
    ///
    /// Uses `handle` when it still designates an element, otherwise the
    /// element selected by `path`, creating the chain when absent.
    pub fn set_field(
        &mut self,
        handle: Option<&NodeId>,
        path: &NodePath,
        value: &str,
    ) -> Result<NodeId> {
        let id = match handle {
            Some(id) if self.get(id).is_some_and(|e| e.matches(path.leaf())) => id.clone(),
            _ => self.ensure(path)?,
        };
        let element = self.get_mut(&id).ok_or_else(|| stale(&id))?;
        element.set_text(value);
        Ok(id)
    }
}

fn stale(id: &NodeId) -> ConfiguratorError {
    ConfiguratorError::InvalidPath {
        path: format!("{:?}", id.0),
        reason: "node handle no longer designates an element".to_string(),
    }
}

fn element_from(ns: ResolveResult<'_>, start: &BytesStart<'_>) -> std::result::Result<Element, String> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| e.to_string())?
        .to_string();
    let namespace = match ns {
        ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
        ResolveResult::Unbound => None,
        ResolveResult::Unknown(prefix) => {
            return Err(format!(
                "unknown namespace prefix '{}'",
                String::from_utf8_lossy(&prefix)
            ));
        }
    };

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| e.to_string())?
            .to_string();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        namespace,
        attributes,
        children: Vec::new(),
    })
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &Node) -> Result<()> {
    let event = match node {
        Node::Element(element) => return write_element(writer, element),
        Node::Text(text) => Event::Text(BytesText::new(text)),
        Node::CData(text) => Event::CData(BytesCData::new(text.as_str())),
        Node::Comment(text) => Event::Comment(BytesText::from_escaped(text.as_str())),
    };
    writer.write_event(event).map_err(std::io::Error::other)?;
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(std::io::Error::other)?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(std::io::Error::other)?;
    for child in &element.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(std::io::Error::other)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpath::Namespaces;

    const DATASTORE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<datastores xmlns="urn:cesnet:tmc:datastores:file">
  <running lock=""/>
  <startup lock="">
    <nacm xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-acm">
      <read-default>deny</read-default>
      <groups>
        <group>
          <name>admin</name>
          <user-name>root</user-name>
          <user-name>bob</user-name>
        </group>
      </groups>
    </nacm>
  </startup>
</datastores>
"#;

    fn ns() -> Namespaces {
        Namespaces::new()
            .with("d", "urn:cesnet:tmc:datastores:file")
            .with("n", "urn:ietf:params:xml:ns:yang:ietf-netconf-acm")
    }

    fn path(expr: &str) -> NodePath {
        NodePath::parse(expr, &ns()).unwrap()
    }

    #[test]
    fn test_find_by_namespace() {
        let doc = XmlDocument::parse(DATASTORE).unwrap();

        assert_eq!(
            doc.text(&path("/d:datastores/d:startup/n:nacm/n:read-default")),
            Some("deny".to_string())
        );
        // Right local name, wrong namespace
        assert_eq!(doc.find(&path("/d:datastores/d:startup/d:nacm")), None);
    }

    #[test]
    fn test_find_with_predicate() {
        let doc = XmlDocument::parse(DATASTORE).unwrap();

        let users = doc.texts(&path(
            "/d:datastores/d:startup/n:nacm/n:groups/n:group[n:name='admin']/n:user-name",
        ));
        assert_eq!(users, vec!["root", "bob"]);
        assert!(
            doc.find(&path("/d:datastores/d:startup/n:nacm/n:groups/n:group[n:name='almighty']"))
                .is_none()
        );
    }

    #[test]
    fn test_set_field_creates_chain_in_parent_namespace() {
        let mut doc = XmlDocument::parse(DATASTORE).unwrap();
        let exec = path("/d:datastores/d:startup/n:nacm/n:exec-default");

        doc.set_field(None, &exec, "deny").unwrap();

        let xml = doc.to_xml_string().unwrap();
        assert!(xml.contains("<exec-default>deny</exec-default>"));
        let reparsed = XmlDocument::parse(&xml).unwrap();
        assert_eq!(reparsed.text(&exec), Some("deny".to_string()));
    }

    #[test]
    fn test_set_field_declares_foreign_namespace() {
        let mut doc = XmlDocument::parse(
            r#"<datastores xmlns="urn:cesnet:tmc:datastores:file"><startup/></datastores>"#,
        )
        .unwrap();
        let enable = path("/d:datastores/d:startup/n:nacm/n:enable-nacm");

        doc.set_field(None, &enable, "false").unwrap();

        let xml = doc.to_xml_string().unwrap();
        assert!(xml.contains(r#"<nacm xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-acm">"#));
        let reparsed = XmlDocument::parse(&xml).unwrap();
        assert_eq!(reparsed.text(&enable), Some("false".to_string()));
    }

    #[test]
    fn test_set_field_reuses_prefix() {
        let mut doc = XmlDocument::parse(
            r#"<d:datastores xmlns:d="urn:cesnet:tmc:datastores:file"><d:startup/></d:datastores>"#,
        )
        .unwrap();

        doc.set_field(None, &path("/d:datastores/d:startup/d:note"), "x")
            .unwrap();

        assert!(doc.to_xml_string().unwrap().contains("<d:note>x</d:note>"));
    }

    #[test]
    fn test_ensure_with_predicate() {
        let mut doc = XmlDocument::parse(DATASTORE).unwrap();
        let group = path("/d:datastores/d:startup/n:nacm/n:groups/n:group[n:name='almighty']");

        let id = doc.ensure(&group).unwrap();

        assert_eq!(doc.find(&group), Some(id));
        assert_eq!(doc.find_all(&path("/d:datastores/d:startup/n:nacm/n:groups/n:group")).len(), 2);
    }

    #[test]
    fn test_stale_handle_is_resolved_again() {
        let mut doc = XmlDocument::parse(DATASTORE).unwrap();
        let read = path("/d:datastores/d:startup/n:nacm/n:read-default");
        let handle = doc.find(&read).unwrap();

        // Shift read-default one position down
        let nacm = doc.find(&path("/d:datastores/d:startup/n:nacm")).unwrap();
        let name = QualifiedName {
            namespace: Some("urn:ietf:params:xml:ns:yang:ietf-netconf-acm".to_string()),
            local: "comment".to_string(),
        };
        doc.insert_child(&nacm, 0, &name, Some("first")).unwrap();

        doc.set_field(Some(&handle), &read, "permit").unwrap();

        assert_eq!(doc.text(&read), Some("permit".to_string()));
        assert_eq!(
            doc.text(&path("/d:datastores/d:startup/n:nacm/n:comment")),
            Some("first".to_string())
        );
    }

    #[test]
    fn test_remove() {
        let mut doc = XmlDocument::parse(DATASTORE).unwrap();
        let users = path("/d:datastores/d:startup/n:nacm/n:groups/n:group/n:user-name");

        for id in doc.find_all(&users).iter().rev() {
            assert!(doc.remove(id).is_some());
        }

        assert!(doc.find_all(&users).is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(XmlDocument::parse("").is_err());
        assert!(XmlDocument::parse("<a><b></a>").is_err());
        assert!(XmlDocument::parse("<a/><b/>").is_err());
        assert!(XmlDocument::parse("<x:a/>").is_err());
    }

    #[test]
    fn test_round_trip_preserves_content() {
        let doc = XmlDocument::parse(DATASTORE).unwrap();
        let reparsed = XmlDocument::parse(&doc.to_xml_string().unwrap()).unwrap();
        assert_eq!(doc, reparsed);
    }
}

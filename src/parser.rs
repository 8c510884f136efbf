// Namespace-aware XML reader for filing documents
use crate::{model::Attributes, Error, Result};
use compact_str::CompactString;
#[cfg(feature = "mmap")]
use memmap2::Mmap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, PrefixDeclaration, ResolveResult};
use quick_xml::NsReader;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub namespace: Option<CompactString>,
    pub local_name: CompactString,
    pub attributes: Attributes,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: Element,
    /// Prefix to namespace URI, as declared anywhere in the document.
    pub namespaces: BTreeMap<String, String>,
}

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    #[cfg(not(feature = "mmap"))]
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<XmlDocument> {
        let content = std::fs::read(path)?;
        self.parse_bytes(&content)
    }

    #[cfg(feature = "mmap")]
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<XmlDocument> {
        let file = std::fs::File::open(path)?;
        // SAFETY: the map is only read for the duration of this call
        let map = unsafe { Mmap::map(&file)? };
        self.parse_bytes(&map)
    }

    pub fn parse_str(&self, text: &str) -> Result<XmlDocument> {
        self.parse_bytes(text.as_bytes())
    }

    pub fn parse_bytes(&self, data: &[u8]) -> Result<XmlDocument> {
        // Skip BOM if present
        let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

        let mut reader = NsReader::from_reader(data);
        reader.config_mut().trim_text(true);

        let mut namespaces = BTreeMap::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;
        let mut buf = Vec::new();

        loop {
            let position = reader.buffer_position();
            let (namespace, event) = match reader.read_resolved_event_into(&mut buf) {
                Ok((ns, event)) => (resolved_namespace(ns)?, event),
                Err(e) => {
                    return Err(Error::Parse(format!(
                        "XML error after byte {}: {}",
                        position, e
                    )))
                }
            };

            match event {
                Event::Start(ref e) => {
                    let element = open_element(&reader, namespace, e, &mut namespaces)?;
                    stack.push(element);
                }
                Event::Empty(ref e) => {
                    let element = open_element(&reader, namespace, e, &mut namespaces)?;
                    close_element(element, &mut stack, &mut root);
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::Parse("Unbalanced closing tag".to_string()))?;
                    close_element(element, &mut stack, &mut root);
                }
                Event::Text(ref t) => {
                    if let Some(current) = stack.last_mut() {
                        let text = match t.unescape() {
                            Ok(text) => text.into_owned(),
                            // Undeclared entities: keep the raw text
                            Err(_) => String::from_utf8_lossy(t).into_owned(),
                        };
                        append_text(current, &text);
                    }
                }
                Event::CData(ref c) => {
                    if let Some(current) = stack.last_mut() {
                        append_text(current, &String::from_utf8_lossy(c));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(Error::Parse(format!(
                "Unclosed element <{}>",
                stack[stack.len() - 1].local_name
            )));
        }

        let root = root.ok_or_else(|| Error::Parse("Document has no root element".to_string()))?;
        Ok(XmlDocument { root, namespaces })
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn resolved_namespace(ns: ResolveResult<'_>) -> Result<Option<CompactString>> {
    match ns {
        ResolveResult::Bound(Namespace(uri)) => std::str::from_utf8(uri)
            .map(|s| Some(CompactString::from(s)))
            .map_err(|_| Error::Parse("Invalid UTF-8 in namespace".to_string())),
        // Unbound or unknown prefixes surface later as malformed references
        ResolveResult::Unbound | ResolveResult::Unknown(_) => Ok(None),
    }
}

fn open_element<R>(
    reader: &NsReader<R>,
    namespace: Option<CompactString>,
    start: &BytesStart<'_>,
    namespaces: &mut BTreeMap<String, String>,
) -> Result<Element> {
    let local_name = std::str::from_utf8(start.local_name().as_ref())
        .map(CompactString::from)
        .map_err(|_| Error::Parse("Invalid UTF-8 in tag name".to_string()))?;

    let mut attributes = Attributes::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Parse(format!("Attribute error: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Parse(format!("Attribute value error: {}", e)))?
            .into_owned();

        if let Some(binding) = attr.key.as_namespace_binding() {
            let prefix = match binding {
                PrefixDeclaration::Default => String::new(),
                PrefixDeclaration::Named(prefix) => String::from_utf8_lossy(prefix).into_owned(),
            };
            namespaces.entry(prefix).or_insert(value);
            continue;
        }

        let (attr_ns, local) = reader.resolve_attribute(attr.key);
        let local = std::str::from_utf8(local.as_ref())
            .map_err(|_| Error::Parse("Invalid UTF-8 in attribute name".to_string()))?;
        let key = match attr_ns {
            ResolveResult::Bound(Namespace(uri)) if attributes.contains_key(local) => {
                CompactString::from(format!("{{{}}}{}", String::from_utf8_lossy(uri), local))
            }
            _ => CompactString::from(local),
        };
        attributes.entry(key).or_insert(value);
    }

    Ok(Element {
        namespace,
        local_name,
        attributes,
        text: None,
        children: Vec::new(),
    })
}

fn append_text(element: &mut Element, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    match &mut element.text {
        Some(existing) => existing.push_str(text),
        None => element.text = Some(text.to_string()),
    }
}

fn close_element(element: Element, stack: &mut [Element], root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTANCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance"
            xmlns:us-gaap="http://fasb.org/us-gaap/2020-01-31"
            xmlns:xlink="http://www.w3.org/1999/xlink">
  <xbrli:context id="C1">
    <xbrli:period>
      <xbrli:startDate>2020-01-01</xbrli:startDate>
      <xbrli:endDate>2020-12-31</xbrli:endDate>
    </xbrli:period>
  </xbrli:context>
  <us-gaap:Revenues contextRef="C1" unitRef="USD" decimals="-3">1000</us-gaap:Revenues>
  <us-gaap:Note contextRef="C1"><![CDATA[a < b]]></us-gaap:Note>
  <us-gaap:Escaped contextRef="C1">R&amp;D</us-gaap:Escaped>
</xbrli:xbrl>"#;

    #[test]
    fn test_parse_resolves_namespaces() {
        let doc = Parser::new().parse_str(INSTANCE).unwrap();

        assert_eq!(doc.root.local_name, "xbrl");
        assert_eq!(
            doc.root.namespace.as_deref(),
            Some("http://www.xbrl.org/2003/instance")
        );
        assert_eq!(
            doc.namespaces.get("us-gaap").map(String::as_str),
            Some("http://fasb.org/us-gaap/2020-01-31")
        );
        assert!(doc.root.attributes.is_empty(), "xmlns must not become attributes");

        let revenue = &doc.root.children[1];
        assert_eq!(revenue.local_name, "Revenues");
        assert_eq!(revenue.attr("decimals"), Some("-3"));
        assert_eq!(revenue.text.as_deref(), Some("1000"));
    }

    #[test]
    fn test_parse_text_cdata_and_entities() {
        let doc = Parser::new().parse_str(INSTANCE).unwrap();
        assert_eq!(doc.root.children[2].text.as_deref(), Some("a < b"));
        assert_eq!(doc.root.children[3].text.as_deref(), Some("R&D"));

        let period = &doc.root.children[0].children[0];
        assert_eq!(period.text, None);
        assert_eq!(period.children[1].text.as_deref(), Some("2020-12-31"));
    }

    #[test]
    fn test_parse_xlink_attributes_by_local_name() {
        let doc = Parser::new()
            .parse_str(
                r##"<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"
                               xmlns:xlink="http://www.w3.org/1999/xlink">
                  <link:loc xlink:type="locator" xlink:href="x.xsd#us-gaap_Assets" xlink:label="loc_Assets"/>
                </link:linkbase>"##,
            )
            .unwrap();
        let loc = &doc.root.children[0];
        assert_eq!(loc.attr("href"), Some("x.xsd#us-gaap_Assets"));
        assert_eq!(loc.attr("label"), Some("loc_Assets"));
        assert_eq!(loc.attr("type"), Some("locator"));
    }

    #[test]
    fn test_unbound_prefix_has_no_namespace() {
        let doc = Parser::new()
            .parse_str("<root><foo:bar>1</foo:bar></root>")
            .unwrap();
        assert_eq!(doc.root.children[0].namespace, None);
        assert_eq!(doc.root.children[0].local_name, "bar");
    }

    #[test]
    fn test_bom_is_skipped() {
        let mut data = vec![0xEF, 0xBB, 0xBF];
        data.extend_from_slice(b"<root/>");
        let doc = Parser::new().parse_bytes(&data).unwrap();
        assert_eq!(doc.root.local_name, "root");
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(Parser::new().parse_str("").is_err());
    }
}

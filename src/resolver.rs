// Reference resolution: concept root or contextual group for each node
use crate::model::{FactTree, Node, OtherTree, QName, STRUCTURAL_NAMESPACES};
use crate::prefixes::PrefixSet;
use compact_str::CompactString;

/// Classification of a node before any tree is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Candidate concept name, possibly still prefix-qualified.
    Concept(CompactString),
    Contextual(QName),
    Malformed,
}

/// Where `resolve` placed the node's reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Concept(CompactString),
    Other(QName),
    Malformed,
}

pub struct ReferenceResolver<'a> {
    prefixes: &'a PrefixSet,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(prefixes: &'a PrefixSet) -> Self {
        Self { prefixes }
    }

    pub fn reference(&self, node: &Node) -> Reference {
        if node.local_name.is_empty() {
            return Reference::Malformed;
        }

        if let Some(fragment) = node.attr("href").and_then(locator_fragment) {
            return Reference::Concept(CompactString::from(fragment));
        }

        match node.namespace.as_deref() {
            None => Reference::Malformed,
            Some(ns) if STRUCTURAL_NAMESPACES.contains(&ns) => Reference::Contextual(node.qname()),
            Some(_) => Reference::Concept(node.local_name.clone()),
        }
    }

    /// Creates or reuses the node's concept root or contextual group.
    pub fn resolve(&self, node: &Node, tree: &mut FactTree, other: &mut OtherTree) -> Resolved {
        match self.reference(node) {
            Reference::Concept(candidate) => {
                let name = self.canonical_name(&candidate, tree);
                let concept = tree.entry(&name);
                if concept.prefix.is_none() && node.text().is_some() {
                    concept.prefix = self.prefix_hint(node, &candidate);
                }
                Resolved::Concept(name)
            }
            Reference::Contextual(qname) => {
                other.group_mut(qname.clone());
                Resolved::Other(qname)
            }
            Reference::Malformed => Resolved::Malformed,
        }
    }

    /// Strips a reporting-entity prefix, preferring an existing concept
    /// reached by suffix over a fresh prefix-qualified one.
    pub fn canonical_name(&self, candidate: &str, tree: &FactTree) -> CompactString {
        let stripped = self.prefixes.strip(candidate);
        if tree.contains(stripped) {
            return CompactString::from(stripped);
        }
        if let Some(pos) = stripped.find(['_', ':']) {
            let suffix = &stripped[pos + 1..];
            if !suffix.is_empty() && tree.contains(suffix) {
                return CompactString::from(suffix);
            }
        }
        CompactString::from(stripped)
    }

    fn prefix_hint(&self, node: &Node, candidate: &str) -> Option<CompactString> {
        node.namespace
            .as_deref()
            .and_then(|ns| self.prefixes.prefix_for_namespace(ns))
            .or_else(|| self.prefixes.split(candidate).0)
            .map(CompactString::from)
    }
}

/// Fragment of a cross-document locator (`file.xsd#us-gaap_Assets`).
/// Intra-document references (`#fact-1`) and plain URLs are not locators.
pub fn locator_fragment(href: &str) -> Option<&str> {
    let (document, fragment) = href.split_once('#')?;
    if document.trim().is_empty() || fragment.trim().is_empty() {
        return None;
    }
    Some(fragment.trim())
}

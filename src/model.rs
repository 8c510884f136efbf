use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Well-known namespaces
// ============================================================================

pub const XML_SCHEMA: &str = "http://www.w3.org/2001/XMLSchema";
pub const XBRL_INSTANCE: &str = "http://www.xbrl.org/2003/instance";
pub const XBRL_LINKBASE: &str = "http://www.xbrl.org/2003/linkbase";
pub const XBRL_DIMENSIONS: &str = "http://xbrl.org/2006/xbrldi";

/// Namespaces whose elements are document machinery rather than concepts.
pub const STRUCTURAL_NAMESPACES: [&str; 4] =
    [XML_SCHEMA, XBRL_INSTANCE, XBRL_LINKBASE, XBRL_DIMENSIONS];

// ============================================================================
// Node tree - the universal element shared by every linked document
// ============================================================================

pub type Attributes = BTreeMap<CompactString, String>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QName {
    pub namespace: Option<CompactString>,
    pub local_name: CompactString,
}

impl QName {
    pub fn new(namespace: Option<&str>, local_name: &str) -> Self {
        Self {
            namespace: namespace.map(CompactString::from),
            local_name: CompactString::from(local_name),
        }
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name == local_name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Element without text content.
    #[default]
    Structural,
    /// Element carrying non-empty text.
    Fact { text: String },
    /// Synthetic grouping node for dimensional facts.
    AxisMarker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub local_name: CompactString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<CompactString>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    /// Owning reporting context (`contextRef`, or the nearest ancestor's `id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<CompactString>,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(namespace: Option<&str>, local_name: &str) -> Self {
        Self {
            local_name: CompactString::from(local_name),
            namespace: namespace.map(CompactString::from),
            attributes: Attributes::new(),
            context: None,
            kind: NodeKind::Structural,
            children: Vec::new(),
        }
    }

    pub fn axis_marker(token: &str) -> Self {
        Self {
            kind: NodeKind::AxisMarker,
            ..Self::new(None, token)
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attributes
            .insert(CompactString::from(key), value.to_string());
        self
    }

    /// Sets the text; whitespace-only text leaves the node structural.
    pub fn with_text(mut self, text: &str) -> Self {
        let trimmed = text.trim();
        self.kind = if trimmed.is_empty() {
            NodeKind::Structural
        } else {
            NodeKind::Fact {
                text: trimmed.to_string(),
            }
        };
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(CompactString::from(context));
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn qname(&self) -> QName {
        QName {
            namespace: self.namespace.clone(),
            local_name: self.local_name.clone(),
        }
    }

    #[inline]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Fact { text } => Some(text),
            _ => None,
        }
    }

    pub fn context_ref(&self) -> Option<&str> {
        self.attr("contextRef")
    }

    pub fn is_axis_marker(&self) -> bool {
        matches!(self.kind, NodeKind::AxisMarker)
    }

    pub fn is_named(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name == local_name
    }

    // Duplicate test used by the merger: name, attribute set and text
    pub fn same_structure(&self, other: &Node) -> bool {
        self.local_name == other.local_name
            && self.namespace == other.namespace
            && self.attributes == other.attributes
            && self.kind == other.kind
    }

    /// Detaches every element into a flat pre-order stream.
    pub fn into_preorder(self) -> Vec<Node> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(mut node) = stack.pop() {
            let children = std::mem::take(&mut node.children);
            out.push(node);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }
}

// ============================================================================
// The three roots: concept tree, contextual tree, discard bucket
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRoot {
    pub name: CompactString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<CompactString>,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl ConceptRoot {
    pub fn new(name: &str) -> Self {
        Self {
            name: CompactString::from(name),
            prefix: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactTree {
    pub concepts: BTreeMap<CompactString, ConceptRoot>,
}

impl FactTree {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.concepts.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ConceptRoot> {
        self.concepts.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ConceptRoot> {
        self.concepts.get_mut(name)
    }

    pub fn entry(&mut self, name: &str) -> &mut ConceptRoot {
        self.concepts
            .entry(CompactString::from(name))
            .or_insert_with(|| ConceptRoot::new(name))
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConceptRoot> {
        self.concepts.values()
    }

    pub fn node_count(&self) -> usize {
        self.concepts
            .values()
            .flat_map(|c| c.children.iter())
            .map(|n| 1 + n.descendant_count())
            .sum()
    }
}

// Contextual machinery grouped by exact (namespace, local name)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtherTree {
    pub groups: BTreeMap<QName, Vec<Node>>,
}

impl OtherTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_mut(&mut self, name: QName) -> &mut Vec<Node> {
        self.groups.entry(name).or_default()
    }

    pub fn push(&mut self, name: QName, node: Node) {
        self.group_mut(name).push(node);
    }

    pub fn take(&mut self, namespace: &str, local_name: &str) -> Vec<Node> {
        self.groups
            .remove(&QName::new(Some(namespace), local_name))
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.groups.values().flat_map(|g| g.iter())
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    Duplicate { concept: CompactString },
    MalformedReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discarded {
    pub node: Node,
    pub reason: DiscardReason,
}

// ============================================================================
// Periods, dimensions and facts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Instant { date: CompactString },
    Duration { start: CompactString, end: CompactString },
    Forever,
}

pub const FOREVER: &str = "forever";

impl Period {
    /// `instant`, `end:start`, or `forever`.
    pub fn key(&self) -> String {
        match self {
            Period::Instant { date } => date.to_string(),
            Period::Duration { start, end } if start == end => end.to_string(),
            Period::Duration { start, end } => format!("{}:{}", end, start),
            Period::Forever => FOREVER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub axis: CompactString,
    pub member: CompactString,
}

impl Dimension {
    pub fn new(axis: &str, member: &str) -> Self {
        Self {
            axis: CompactString::from(axis),
            member: CompactString::from(member),
        }
    }

    /// Nesting keys in output order; an empty axis contributes no level.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        [self.axis.as_str(), self.member.as_str()]
            .into_iter()
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DimensionPath(pub Vec<Dimension>);

impl DimensionPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, axis: &str, member: &str) {
        self.0.push(Dimension::new(axis, member));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.0.iter()
    }
}

impl FromIterator<Dimension> for DimensionPath {
    fn from_iter<I: IntoIterator<Item = Dimension>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// Reported precision; INF outranks every finite value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decimals {
    Finite(i32),
    Infinite,
}

impl Decimals {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("INF") {
            Some(Decimals::Infinite)
        } else {
            raw.parse().ok().map(Decimals::Finite)
        }
    }

    /// Orders by number of reported places in either direction, so `-6`
    /// ranks above `-3`.
    pub fn cmp_precision(&self, other: &Decimals) -> Ordering {
        match (self, other) {
            (Decimals::Infinite, Decimals::Infinite) => Ordering::Equal,
            (Decimals::Infinite, _) => Ordering::Greater,
            (_, Decimals::Infinite) => Ordering::Less,
            (Decimals::Finite(a), Decimals::Finite(b)) => a.unsigned_abs().cmp(&b.unsigned_abs()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Single(String),
    Conflicting(Vec<String>),
}

impl FactValue {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            FactValue::Single(v) => v == value,
            FactValue::Conflicting(values) => values.iter().any(|v| v == value),
        }
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            FactValue::Single(v) => Some(v),
            FactValue::Conflicting(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRecord {
    pub value: FactValue,
    pub decimals: Option<Decimals>,
    pub unit: Option<CompactString>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactKey {
    pub dimensions: DimensionPath,
    pub date: CompactString,
}

impl FactKey {
    pub fn base(date: &str) -> Self {
        Self {
            dimensions: DimensionPath::new(),
            date: CompactString::from(date),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptFacts {
    pub prefix: Option<CompactString>,
    pub facts: BTreeMap<FactKey, FactRecord>,
    /// Label role (trailing URI segment) to text.
    pub labels: BTreeMap<CompactString, String>,
    /// Context-less texts without a label id, sorted and distinct.
    pub values: Vec<String>,
}

impl ConceptFacts {
    pub fn get(&self, date: &str) -> Option<&FactRecord> {
        self.facts.get(&FactKey::base(date))
    }

    pub fn get_dimensional(&self, dimensions: &DimensionPath, date: &str) -> Option<&FactRecord> {
        self.facts.get(&FactKey {
            dimensions: dimensions.clone(),
            date: CompactString::from(date),
        })
    }
}

// Rendered to JSON by `codec::table_to_value`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactTable {
    pub ticker: String,
    pub entity: Option<String>,
    pub concepts: BTreeMap<CompactString, ConceptFacts>,
}

impl FactTable {
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            ..Self::default()
        }
    }

    pub fn concept(&self, name: &str) -> Option<&ConceptFacts> {
        self.concepts.get(name)
    }

    pub fn fact_count(&self) -> usize {
        self.concepts.values().map(|c| c.facts.len()).sum()
    }

    /// Flat `(concept, key, record)` view over every surviving fact.
    pub fn records(&self) -> impl Iterator<Item = (&str, &FactKey, &FactRecord)> {
        self.concepts.iter().flat_map(|(name, concept)| {
            concept
                .facts
                .iter()
                .map(move |(key, record)| (name.as_str(), key, record))
        })
    }
}

// Recoverable conditions reported alongside the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    MalformedReference { node: QName },
    UnresolvedDate { concept: CompactString, context: CompactString },
    PrecisionIncomparable { concept: CompactString, key: FactKey },
    IncompletePeriod { context: CompactString },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::MalformedReference { node } => write!(f, "malformed reference: {}", node),
            Anomaly::UnresolvedDate { concept, context } => {
                write!(f, "unresolved date for {} (contextRef {})", concept, context)
            }
            Anomaly::PrecisionIncomparable { concept, key } => {
                write!(f, "incomparable precision for {} at {}", concept, key.date)
            }
            Anomaly::IncompletePeriod { context } => {
                write!(f, "incomplete period for context {}", context)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRole {
    Instance,
    Schema,
    Label,
    Definition,
    Calculation,
    Presentation,
}

impl DocumentRole {
    /// Merge order; the instance always comes first.
    pub const MERGE_ORDER: [DocumentRole; 6] = [
        DocumentRole::Instance,
        DocumentRole::Schema,
        DocumentRole::Label,
        DocumentRole::Definition,
        DocumentRole::Calculation,
        DocumentRole::Presentation,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preorder_detaches_children() {
        let tree = Node::new(Some("ns"), "root")
            .with_child(
                Node::new(Some("ns"), "a").with_child(Node::new(Some("ns"), "a1")),
            )
            .with_child(Node::new(Some("ns"), "b"));

        let flat = tree.into_preorder();
        let names: Vec<_> = flat.iter().map(|n| n.local_name.as_str()).collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);
        assert!(flat.iter().all(|n| n.children.is_empty()));
    }

    #[test]
    fn test_whitespace_text_is_structural() {
        let node = Node::new(None, "x").with_text("  \n\t ");
        assert_eq!(node.kind, NodeKind::Structural);
        assert_eq!(node.text(), None);

        let node = Node::new(None, "x").with_text(" 1000 ");
        assert_eq!(node.text(), Some("1000"));
    }

    #[test]
    fn test_period_keys() {
        let duration = Period::Duration {
            start: "2020-01-01".into(),
            end: "2020-12-31".into(),
        };
        assert_eq!(duration.key(), "2020-12-31:2020-01-01");

        let same_day = Period::Duration {
            start: "2020-12-31".into(),
            end: "2020-12-31".into(),
        };
        assert_eq!(same_day.key(), "2020-12-31");
        assert_eq!(Period::Instant { date: "2021-06-30".into() }.key(), "2021-06-30");
        assert_eq!(Period::Forever.key(), "forever");
    }

    #[test]
    fn test_decimals_precision_order() {
        let neg3 = Decimals::parse("-3").unwrap();
        let neg6 = Decimals::parse("-6").unwrap();
        let two = Decimals::parse("2").unwrap();
        let inf = Decimals::parse("INF").unwrap();

        assert_eq!(neg6.cmp_precision(&neg3), Ordering::Greater);
        assert_eq!(two.cmp_precision(&Decimals::Finite(0)), Ordering::Greater);
        assert_eq!(inf.cmp_precision(&neg6), Ordering::Greater);
        assert_eq!(Decimals::parse("abc"), None);
    }

    #[test]
    fn test_decimals_mixed_signs_compare_by_magnitude() {
        let pos6 = Decimals::Finite(6);
        let neg6 = Decimals::Finite(-6);
        let neg3 = Decimals::Finite(-3);
        let two = Decimals::Finite(2);

        // Magnitude alone decides, so the sign never breaks a tie
        assert_eq!(pos6.cmp_precision(&neg6), Ordering::Equal);
        assert_eq!(neg3.cmp_precision(&two), Ordering::Greater);
        assert_eq!(two.cmp_precision(&neg3), Ordering::Less);
    }

    #[test]
    fn test_same_structure_includes_text() {
        let a = Node::new(Some("ns"), "Revenue")
            .with_attr("contextRef", "C1")
            .with_text("1");
        let b = a.clone().with_text("2");
        assert!(a.same_structure(&a.clone()));
        assert!(!a.same_structure(&b));
    }
}

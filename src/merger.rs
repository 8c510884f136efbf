//! Tree merger.
//!
//! Every element of every linked document is resolved and attached under its
//! concept root. Nodes the resolver can only classify as contextual are then
//! rehomed by progressively weaker linkage heuristics. Period and unit
//! machinery is left alone for the context dictionary.

use crate::contexts::is_period_machinery;
use crate::model::{DiscardReason, Discarded, FactTree, Node, OtherTree, QName};
use crate::prefixes::PrefixSet;
use crate::resolver::{ReferenceResolver, Resolved};
use ahash::AHashMap;
use bitflags::bitflags;
use compact_str::CompactString;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

bitflags! {
    /// Rehoming heuristics the merger may apply after direct attachment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Heuristics: u8 {
        /// Owning context id or intra-document `href` equals a placed node's `id`.
        const ID_LINK = 1 << 0;
        /// `dimension` attribute names a concept.
        const DIMENSION = 1 << 1;
        /// XLink `label` equals a placed node's label.
        const LABEL = 1 << 2;
        /// XLink arc `from`/`to` leads to a placed label.
        const ARC = 1 << 3;
        /// Trailing segment of a non-standard XLink role.
        const ROLE = 1 << 4;
        /// `name`/`from`/`id` contains a concept name.
        const ATTRIBUTE = 1 << 5;
        /// Dimensional facts grouped under axis markers.
        const AXIS_GROUPING = 1 << 6;
    }
}

impl Default for Heuristics {
    fn default() -> Self {
        Heuristics::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Heuristic {
    Direct,
    IdLink,
    Dimension,
    Label,
    Arc,
    Role,
    Attribute,
    AxisGrouping,
}

impl Heuristic {
    fn enabled(self, set: Heuristics) -> bool {
        let flag = match self {
            Heuristic::Direct => return true,
            Heuristic::IdLink => Heuristics::ID_LINK,
            Heuristic::Dimension => Heuristics::DIMENSION,
            Heuristic::Label => Heuristics::LABEL,
            Heuristic::Arc => Heuristics::ARC,
            Heuristic::Role => Heuristics::ROLE,
            Heuristic::Attribute => Heuristics::ATTRIBUTE,
            Heuristic::AxisGrouping => Heuristics::AXIS_GROUPING,
        };
        set.contains(flag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Nodes placed (or grouped, for axis grouping) per heuristic.
    pub placed: BTreeMap<Heuristic, usize>,
    pub duplicates: usize,
    pub malformed: usize,
    /// Non-reserved contextual nodes no heuristic could place.
    pub unplaced: usize,
    /// Linkage rounds run before reaching a fixpoint.
    pub linkage_rounds: usize,
}

impl MergeStats {
    pub fn placed_by(&self, heuristic: Heuristic) -> usize {
        self.placed.get(&heuristic).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    pub tree: FactTree,
    pub other: OtherTree,
    pub discarded: Vec<Discarded>,
    pub stats: MergeStats,
}

pub struct TreeMerger<'a> {
    resolver: ReferenceResolver<'a>,
    prefixes: &'a PrefixSet,
    heuristics: Heuristics,
}

impl<'a> TreeMerger<'a> {
    pub fn new(prefixes: &'a PrefixSet, heuristics: Heuristics) -> Self {
        Self {
            resolver: ReferenceResolver::new(prefixes),
            prefixes,
            heuristics,
        }
    }

    /// Merges imported documents, given in merge order.
    pub fn merge<I>(&self, documents: I) -> MergeOutput
    where
        I: IntoIterator<Item = Node>,
    {
        let mut state = MergeState::default();

        for root in documents {
            for node in root.into_preorder() {
                self.attach_direct(&mut state, node);
            }
        }

        self.rehome_by_linkage(&mut state);
        if self.heuristics.contains(Heuristics::ATTRIBUTE) {
            self.rehome_by_attribute(&mut state);
        }
        if self.heuristics.contains(Heuristics::AXIS_GROUPING) {
            state.group_by_axis();
        }

        state.output.stats.unplaced = state
            .output
            .other
            .groups
            .iter()
            .filter(|(qname, _)| !is_period_machinery(qname))
            .map(|(_, nodes)| nodes.len())
            .sum();

        let output = state.output;
        info!(
            "merged {} concepts ({} nodes), {} contextual, {} discarded, {} unplaced",
            output.tree.len(),
            output.tree.node_count(),
            output.other.len(),
            output.discarded.len(),
            output.stats.unplaced
        );
        output
    }

    fn attach_direct(&self, state: &mut MergeState, node: Node) {
        let out = &mut state.output;
        match self.resolver.resolve(&node, &mut out.tree, &mut out.other) {
            Resolved::Concept(name) => state.attach(&name, node, Heuristic::Direct),
            Resolved::Other(qname) => out.other.push(qname, node),
            Resolved::Malformed => {
                warn!(
                    "malformed reference: <{}> has no namespace (attributes {:?})",
                    node.local_name, node.attributes
                );
                out.stats.malformed += 1;
                out.discarded.push(Discarded {
                    node,
                    reason: DiscardReason::MalformedReference,
                });
            }
        }
    }

    // Pass 2, repeated while anything moves: a placed label or id can make
    // another node's linkage resolvable.
    fn rehome_by_linkage(&self, state: &mut MergeState) {
        loop {
            state.output.stats.linkage_rounds += 1;
            let moved = state.rehome(|state, node| self.linkage(state, node));
            debug!("linkage round placed {} nodes", moved);
            if moved == 0 {
                break;
            }
        }
    }

    // Pass 3
    fn rehome_by_attribute(&self, state: &mut MergeState) {
        let moved = state.rehome(|state, node| {
            self.by_attribute(state, node)
                .map(|concept| Placement::new(concept, Heuristic::Attribute))
        });
        debug!("attribute pass placed {} nodes", moved);
    }

    fn linkage(&self, state: &MergeState, node: &Node) -> Option<Placement> {
        let enabled = |h: Heuristic| h.enabled(self.heuristics);

        if enabled(Heuristic::IdLink) {
            if let Some(concept) = state.by_id_link(node) {
                return Some(Placement::new(concept, Heuristic::IdLink));
            }
        }
        if enabled(Heuristic::Dimension) {
            if let Some(concept) = self.by_dimension(state, node) {
                return Some(Placement::new(concept, Heuristic::Dimension));
            }
        }
        if enabled(Heuristic::Label) {
            if let Some(concept) = state.by_label(node) {
                return Some(Placement::new(concept, Heuristic::Label));
            }
        }
        if enabled(Heuristic::Arc) {
            if let Some(placement) = state.by_arc(node) {
                return Some(placement);
            }
        }
        if enabled(Heuristic::Role) {
            if let Some(concept) = state.by_role(node) {
                return Some(Placement::new(concept, Heuristic::Role));
            }
        }
        None
    }

    fn by_dimension(&self, state: &MergeState, node: &Node) -> Option<CompactString> {
        let dimension = self.prefixes.strip(node.attr("dimension")?.trim());
        let name = dimension.rsplit(':').next().unwrap_or(dimension);
        state
            .output
            .tree
            .contains(name)
            .then(|| CompactString::from(name))
    }

    fn by_attribute(&self, state: &MergeState, node: &Node) -> Option<CompactString> {
        for key in ["name", "from", "id"] {
            if let Some(value) = node.attr(key) {
                if let Some(concept) = state.longest_contained(self.prefixes.strip(value)) {
                    return Some(concept);
                }
            }
        }
        state.by_link_attribute(node)
    }
}

struct Placement {
    concept: CompactString,
    heuristic: Heuristic,
    /// Arc target label to index under the same concept.
    also_label: Option<CompactString>,
}

impl Placement {
    fn new(concept: CompactString, heuristic: Heuristic) -> Self {
        Self {
            concept,
            heuristic,
            also_label: None,
        }
    }
}

#[derive(Default)]
struct MergeState {
    output: MergeOutput,
    // First insertion wins in both indexes
    labels: AHashMap<CompactString, CompactString>,
    ids: AHashMap<CompactString, CompactString>,
}

impl MergeState {
    fn attach(&mut self, concept: &str, node: Node, heuristic: Heuristic) {
        let duplicate = self
            .output
            .tree
            .get(concept)
            .is_some_and(|root| root.children.iter().any(|s| s.same_structure(&node)));

        if duplicate {
            debug!("duplicate <{}> under {}", node.qname(), concept);
            self.output.stats.duplicates += 1;
            self.output.discarded.push(Discarded {
                node,
                reason: DiscardReason::Duplicate {
                    concept: CompactString::from(concept),
                },
            });
            return;
        }

        self.index(concept, &node);
        self.output.tree.entry(concept).children.push(node);
        *self.output.stats.placed.entry(heuristic).or_default() += 1;
    }

    fn index(&mut self, concept: &str, node: &Node) {
        if let Some(label) = node.attr("label") {
            self.labels
                .entry(CompactString::from(label))
                .or_insert_with(|| CompactString::from(concept));
        }
        if let Some(id) = node.attr("id") {
            self.ids
                .entry(CompactString::from(id))
                .or_insert_with(|| CompactString::from(concept));
        }
    }

    /// Runs `place` over every non-reserved contextual node once, returning
    /// how many left the contextual tree.
    fn rehome<F>(&mut self, mut place: F) -> usize
    where
        F: FnMut(&MergeState, &Node) -> Option<Placement>,
    {
        let names: Vec<QName> = self
            .output
            .other
            .groups
            .keys()
            .filter(|qname| !is_period_machinery(qname))
            .cloned()
            .collect();

        let mut moved = 0;
        for qname in names {
            let nodes = self
                .output
                .other
                .groups
                .remove(&qname)
                .unwrap_or_default();
            let mut kept = Vec::new();

            for node in nodes {
                match place(&*self, &node) {
                    Some(placement) => {
                        if let Some(label) = &placement.also_label {
                            self.labels
                                .entry(label.clone())
                                .or_insert_with(|| placement.concept.clone());
                        }
                        self.attach(&placement.concept, node, placement.heuristic);
                        moved += 1;
                    }
                    None => kept.push(node),
                }
            }

            // Keep the group even when emptied so contextual names stay listed
            self.output.other.groups.insert(qname, kept);
        }
        moved
    }

    fn by_id_link(&self, node: &Node) -> Option<CompactString> {
        let fragment = node.attr("href").and_then(|href| href.strip_prefix('#'));
        node.context
            .as_deref()
            .into_iter()
            .chain(fragment)
            .find_map(|id| self.ids.get(id).cloned())
    }

    // Nested resources arrive as their own stream nodes, so each is matched
    // on its own attributes
    fn by_label(&self, node: &Node) -> Option<CompactString> {
        node.attr("label")
            .and_then(|label| self.labels.get(label))
            .cloned()
    }

    fn by_arc(&self, node: &Node) -> Option<Placement> {
        let from = node.attr("from");
        let to = node.attr("to");

        if let Some(concept) = from.and_then(|f| self.labels.get(f)) {
            return Some(Placement {
                concept: concept.clone(),
                heuristic: Heuristic::Arc,
                also_label: to.map(CompactString::from),
            });
        }
        to.and_then(|t| self.labels.get(t))
            .map(|concept| Placement::new(concept.clone(), Heuristic::Arc))
    }

    fn by_role(&self, node: &Node) -> Option<CompactString> {
        let role = node.attr("role")?;
        // Standard roles name label kinds and link types, never concepts
        if role.starts_with("http://www.xbrl.org/") {
            return None;
        }
        let segment = role.trim_end_matches('/').rsplit('/').next()?;
        if segment.is_empty() {
            return None;
        }

        let tree = &self.output.tree;
        if tree.contains(segment) {
            return Some(CompactString::from(segment));
        }
        tree.concepts
            .keys()
            .find(|name| name.ends_with(segment))
            .cloned()
    }

    fn by_link_attribute(&self, node: &Node) -> Option<CompactString> {
        node.attr("id")
            .and_then(|id| self.ids.get(id).cloned())
            .or_else(|| self.by_label(node))
    }

    // Longest concept name contained in `value`; ties go to the first name
    fn longest_contained(&self, value: &str) -> Option<CompactString> {
        let mut best: Option<&CompactString> = None;
        for name in self.output.tree.concepts.keys() {
            if name.is_empty() || !value.contains(name.as_str()) {
                continue;
            }
            if best.map_or(true, |b| name.len() > b.len()) {
                best = Some(name);
            }
        }
        best.cloned()
    }

    // Pass 4
    fn group_by_axis(&mut self) {
        let mut grouped = 0;

        for concept in self.output.tree.concepts.values_mut() {
            let children = std::mem::take(&mut concept.children);
            let mut kept: Vec<Node> = Vec::with_capacity(children.len());

            for child in children {
                // Keyed on contextRef: explicit members only inherit a context
                let token = child
                    .context_ref()
                    .and_then(axis_token)
                    .map(CompactString::from);
                let Some(token) = token else {
                    kept.push(child);
                    continue;
                };

                let position = kept
                    .iter()
                    .position(|n| n.is_axis_marker() && n.local_name == token);
                let marker = match position {
                    Some(i) => &mut kept[i],
                    None => {
                        kept.push(Node::axis_marker(&token));
                        let last = kept.len() - 1;
                        &mut kept[last]
                    }
                };
                marker.children.push(child);
                grouped += 1;
            }
            concept.children = kept;
        }

        if grouped > 0 {
            *self
                .output
                .stats
                .placed
                .entry(Heuristic::AxisGrouping)
                .or_default() += grouped;
        }
    }
}

/// First `_`-delimited token naming an axis, else the first naming a member.
pub fn axis_token(context: &str) -> Option<&str> {
    let tokens = || context.split('_').filter(|t| !t.is_empty());
    tokens()
        .find(|t| t.contains("Axis"))
        .or_else(|| tokens().find(|t| t.contains("Member")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{XBRL_DIMENSIONS, XBRL_INSTANCE, XBRL_LINKBASE};

    const US_GAAP: &str = "http://fasb.org/us-gaap/2020-01-31";
    const ACME: &str = "http://acme.com/20201231";

    fn merge(prefixes: &PrefixSet, documents: Vec<Node>) -> MergeOutput {
        TreeMerger::new(prefixes, Heuristics::all()).merge(documents)
    }

    fn instance() -> Node {
        Node::new(Some(XBRL_INSTANCE), "xbrl")
            .with_child(
                Node::new(Some(XBRL_INSTANCE), "context")
                    .with_attr("id", "C1")
                    .with_child(
                        Node::new(Some(XBRL_INSTANCE), "period")
                            .with_context("C1")
                            .with_child(
                                Node::new(Some(XBRL_INSTANCE), "instant")
                                    .with_context("C1")
                                    .with_text("2020-12-31"),
                            ),
                    ),
            )
            .with_child(
                Node::new(Some(US_GAAP), "Assets")
                    .with_attr("contextRef", "C1")
                    .with_attr("id", "fact-1")
                    .with_context("C1")
                    .with_text("100"),
            )
    }

    fn label_linkbase() -> Node {
        Node::new(Some(XBRL_LINKBASE), "linkbase").with_child(
            Node::new(Some(XBRL_LINKBASE), "labelLink")
                .with_attr("role", "http://www.xbrl.org/2003/role/link")
                .with_child(
                    Node::new(Some(XBRL_LINKBASE), "loc")
                        .with_attr("href", "acme.xsd#us-gaap_Assets")
                        .with_attr("label", "loc_Assets"),
                )
                .with_child(
                    Node::new(Some(XBRL_LINKBASE), "labelArc")
                        .with_attr("from", "loc_Assets")
                        .with_attr("to", "lab_Assets_en"),
                )
                .with_child(
                    Node::new(Some(XBRL_LINKBASE), "label")
                        .with_attr("label", "lab_Assets_en")
                        .with_attr("role", "http://www.xbrl.org/2003/role/terseLabel")
                        .with_text("Total assets"),
                ),
        )
    }

    #[test]
    fn test_direct_attach_and_period_machinery_stays() {
        let output = merge(&PrefixSet::new(), vec![instance()]);

        let assets = output.tree.get("Assets").unwrap();
        assert_eq!(assets.children.len(), 1);
        assert_eq!(assets.children[0].text(), Some("100"));

        let instants = &output.other.groups[&QName::new(Some(XBRL_INSTANCE), "instant")];
        assert_eq!(instants.len(), 1);
        assert_eq!(output.stats.placed_by(Heuristic::Direct), 1);
    }

    #[test]
    fn test_label_reached_through_arc() {
        let output = merge(&PrefixSet::new(), vec![instance(), label_linkbase()]);

        let assets = output.tree.get("Assets").unwrap();
        let names: Vec<_> = assets.children.iter().map(|n| n.local_name.as_str()).collect();
        assert_eq!(names, vec!["Assets", "loc", "labelArc", "label"]);
        assert_eq!(output.stats.placed_by(Heuristic::Arc), 1);
        assert_eq!(output.stats.placed_by(Heuristic::Label), 1);
        assert!(output.stats.linkage_rounds >= 2);
    }

    #[test]
    fn test_duplicate_locator_discarded() {
        let output = merge(
            &PrefixSet::new(),
            vec![instance(), label_linkbase(), label_linkbase()],
        );
        assert_eq!(output.stats.duplicates, 3);
        assert!(output.discarded.iter().all(|d| matches!(
            &d.reason,
            DiscardReason::Duplicate { concept } if concept.as_str() == "Assets"
        )));
    }

    #[test]
    fn test_footnote_locator_links_by_fact_id() {
        let footnotes = Node::new(Some(XBRL_LINKBASE), "footnoteLink")
            .with_child(Node::new(Some(XBRL_LINKBASE), "footnoteLoc").with_attr("href", "#fact-1"));
        let mut doc = instance();
        doc.children.push(footnotes);

        let output = merge(&PrefixSet::new(), vec![doc]);
        let assets = output.tree.get("Assets").unwrap();
        assert!(assets.children.iter().any(|n| n.local_name == "footnoteLoc"));
        assert_eq!(output.stats.placed_by(Heuristic::IdLink), 1);
    }

    #[test]
    fn test_schema_element_placed_by_name() {
        let mut prefixes = PrefixSet::new();
        prefixes.insert("acme");
        let doc = Node::new(Some(ACME), "WidgetSales")
            .with_attr("contextRef", "C1")
            .with_context("C1")
            .with_text("7");
        let schema = Node::new(Some(crate::model::XML_SCHEMA), "schema").with_child(
            Node::new(Some(crate::model::XML_SCHEMA), "element")
                .with_attr("id", "acme_WidgetSales")
                .with_attr("name", "WidgetSales"),
        );

        let output = merge(&prefixes, vec![doc, schema]);
        let widget = output.tree.get("WidgetSales").unwrap();
        assert_eq!(widget.children.len(), 2);
        assert_eq!(output.stats.placed_by(Heuristic::Attribute), 1);
    }

    #[test]
    fn test_disabled_heuristics_leave_nodes_unplaced() {
        let output = TreeMerger::new(&PrefixSet::new(), Heuristics::empty())
            .merge(vec![instance(), label_linkbase()]);
        assert_eq!(output.tree.get("Assets").unwrap().children.len(), 2);
        assert!(output.stats.unplaced > 0);
    }

    #[test]
    fn test_explicit_member_follows_dimension() {
        let definition = Node::new(Some(XBRL_LINKBASE), "loc")
            .with_attr("href", "x.xsd#us-gaap_StatementGeographicalAxis")
            .with_attr("label", "loc_geo");
        // Inherits a dimensional context without carrying a contextRef
        let member = Node::new(Some(XBRL_DIMENSIONS), "explicitMember")
            .with_attr("dimension", "us-gaap:StatementGeographicalAxis")
            .with_context("C2_us-gaap_StatementGeographicalAxis_us-gaap_DomesticMember")
            .with_text("us-gaap:DomesticMember");

        let output = merge(&PrefixSet::new(), vec![member, definition]);
        let axis = output.tree.get("StatementGeographicalAxis").unwrap();
        assert!(axis.children.iter().any(|n| n.local_name == "explicitMember"));
        assert!(axis.children.iter().all(|n| !n.is_axis_marker()));
        assert_eq!(output.stats.placed_by(Heuristic::Dimension), 1);
        assert_eq!(output.stats.placed_by(Heuristic::AxisGrouping), 0);
    }

    #[test]
    fn test_role_segment_names_concept() {
        let links = Node::new(Some(XBRL_LINKBASE), "linkbase")
            .with_child(
                Node::new(Some(XBRL_LINKBASE), "presentationLink")
                    .with_attr("role", "http://acme.com/role/Assets"),
            )
            .with_child(
                Node::new(Some(XBRL_LINKBASE), "calculationLink")
                    .with_attr("role", "http://www.xbrl.org/2003/role/Assets"),
            );

        let output = merge(&PrefixSet::new(), vec![instance(), links]);
        let assets = output.tree.get("Assets").unwrap();
        assert!(assets.children.iter().any(|n| n.local_name == "presentationLink"));
        assert!(!assets.children.iter().any(|n| n.local_name == "calculationLink"));
        assert_eq!(output.stats.placed_by(Heuristic::Role), 1);

        let standard = &output.other.groups[&QName::new(Some(XBRL_LINKBASE), "calculationLink")];
        assert_eq!(standard.len(), 1);
    }

    #[test]
    fn test_attribute_pass_falls_back_to_id_and_label() {
        let links = Node::new(Some(XBRL_LINKBASE), "linkbase")
            .with_child(
                Node::new(Some(XBRL_LINKBASE), "loc")
                    .with_attr("href", "acme.xsd#us-gaap_Assets")
                    .with_attr("label", "loc_A"),
            )
            .with_child(Node::new(Some(XBRL_LINKBASE), "footnote").with_attr("label", "loc_A"))
            .with_child(Node::new(Some(XBRL_INSTANCE), "footnoteRef").with_attr("id", "fact-1"));

        let output = TreeMerger::new(&PrefixSet::new(), Heuristics::ATTRIBUTE)
            .merge(vec![instance(), links]);
        let assets = output.tree.get("Assets").unwrap();
        for name in ["footnote", "footnoteRef"] {
            assert!(assets.children.iter().any(|n| n.local_name == name));
        }
        assert_eq!(output.stats.placed_by(Heuristic::Attribute), 2);
        assert_eq!(output.stats.placed_by(Heuristic::Label), 0);
    }

    #[test]
    fn test_axis_grouping() {
        let ctx = "C2_us-gaap_StatementGeographicalAxis_us-gaap_DomesticMember";
        let doc = Node::new(Some(XBRL_INSTANCE), "xbrl")
            .with_child(
                Node::new(Some(US_GAAP), "Revenues")
                    .with_attr("contextRef", "C1")
                    .with_context("C1")
                    .with_text("1000"),
            )
            .with_child(
                Node::new(Some(US_GAAP), "Revenues")
                    .with_attr("contextRef", ctx)
                    .with_context(ctx)
                    .with_text("500"),
            );

        let output = merge(&PrefixSet::new(), vec![doc]);
        let revenues = output.tree.get("Revenues").unwrap();
        assert_eq!(revenues.children.len(), 2);
        let marker = &revenues.children[1];
        assert!(marker.is_axis_marker());
        assert_eq!(marker.local_name, "StatementGeographicalAxis");
        assert_eq!(marker.children[0].text(), Some("500"));
    }

    #[test]
    fn test_axis_token() {
        assert_eq!(
            axis_token("C2_us-gaap_StatementGeographicalAxis_us-gaap_DomesticMember"),
            Some("StatementGeographicalAxis")
        );
        assert_eq!(axis_token("FY20_srt_ParentCompanyMember"), Some("ParentCompanyMember"));
        assert_eq!(axis_token("FY2020"), None);
    }
}

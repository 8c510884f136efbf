//! Fact extraction from the merged tree.
//!
//! Each concept root becomes one bucket of the fact table. Facts are keyed by
//! their dimension path and date; a key reported twice keeps the more precise
//! value. Context-less texts become labels or plain values.

use crate::contexts::ContextDictionary;
use crate::model::{
    Anomaly, ConceptFacts, Decimals, DimensionPath, FactKey, FactRecord, FactTable, FactTree,
    FactValue, Node,
};
use crate::prefixes::PrefixSet;
use compact_str::CompactString;
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Currency facts are keyed by date alone; any other currency gets a suffix.
pub const BASE_CURRENCY: &str = "USD";

const DEFAULT_LABEL_ROLE: &str = "label";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Keep text-block and embedded-HTML facts.
    pub include_text_blocks: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub table: FactTable,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Default)]
struct LabelEntry {
    owner: CompactString,
    roles: BTreeMap<CompactString, String>,
}

struct Extractor<'a> {
    contexts: &'a ContextDictionary,
    prefixes: &'a PrefixSet,
    options: &'a ExtractOptions,
    labels: BTreeMap<CompactString, LabelEntry>,
    anomalies: Vec<Anomaly>,
}

pub fn extract_facts(
    tree: &FactTree,
    contexts: &ContextDictionary,
    prefixes: &PrefixSet,
    options: &ExtractOptions,
) -> Extraction {
    let mut extractor = Extractor {
        contexts,
        prefixes,
        options,
        labels: BTreeMap::new(),
        anomalies: Vec::new(),
    };

    let mut table = FactTable::new("");
    table.entity = contexts.entity.clone();

    for concept in tree.iter() {
        let mut facts = ConceptFacts {
            prefix: concept.prefix.clone(),
            ..ConceptFacts::default()
        };
        for child in &concept.children {
            extractor.visit(&concept.name, child, false, &mut facts);
        }
        facts.values.sort();
        facts.values.dedup();

        if !facts.facts.is_empty() || !facts.values.is_empty() {
            table.concepts.insert(concept.name.clone(), facts);
        }
    }

    extractor.attach_labels(tree, &mut table);

    info!(
        "extracted {} facts across {} concepts ({} anomalies)",
        table.fact_count(),
        table.concepts.len(),
        extractor.anomalies.len()
    );
    Extraction {
        table,
        anomalies: extractor.anomalies,
    }
}

impl Extractor<'_> {
    fn visit(&mut self, concept: &str, node: &Node, under_axis: bool, facts: &mut ConceptFacts) {
        let under_axis = under_axis || node.is_axis_marker();

        if let Some(text) = node.text() {
            self.fact(concept, node, text, under_axis, facts);
        }
        for child in &node.children {
            self.visit(concept, child, under_axis, facts);
        }
    }

    fn fact(
        &mut self,
        concept: &str,
        node: &Node,
        text: &str,
        under_axis: bool,
        facts: &mut ConceptFacts,
    ) {
        if !self.options.include_text_blocks && is_text_block(node, text) {
            debug!("skipping text block {} in {}", node.local_name, concept);
            return;
        }

        let Some(context) = node.context_ref() else {
            self.context_less(concept, node, text, facts);
            return;
        };

        let Some(mut date) = self.contexts.date(context) else {
            warn!(
                "unresolved date for {} (contextRef {})",
                node.qname(),
                context
            );
            self.anomalies.push(Anomaly::UnresolvedDate {
                concept: CompactString::from(concept),
                context: CompactString::from(context),
            });
            return;
        };

        let unit = node.attr("unitRef").map(str::trim);
        if let Some(unit_ref) = unit {
            if self
                .contexts
                .currency(unit_ref)
                .is_some_and(|code| code != BASE_CURRENCY)
            {
                date = format!("{}_{}", date, unit_ref);
            }
        }

        let dimensions = self.dimensions(context, under_axis);
        let record = FactRecord {
            value: FactValue::Single(clean_value(text)),
            decimals: node.attr("decimals").and_then(Decimals::parse),
            unit: unit.map(CompactString::from),
            attributes: node.attributes.clone(),
        };
        let key = FactKey {
            dimensions,
            date: CompactString::from(date),
        };
        self.insert(concept, facts, key, record);
    }

    fn context_less(&mut self, concept: &str, node: &Node, text: &str, facts: &mut ConceptFacts) {
        match node.attr("label") {
            Some(id) => {
                let role = node
                    .attr("role")
                    .and_then(|r| r.trim_end_matches('/').rsplit('/').next())
                    .filter(|r| !r.is_empty())
                    .unwrap_or(DEFAULT_LABEL_ROLE);
                let entry = self
                    .labels
                    .entry(CompactString::from(id))
                    .or_insert_with(|| LabelEntry {
                        owner: CompactString::from(concept),
                        ..LabelEntry::default()
                    });
                entry
                    .roles
                    .entry(CompactString::from(role))
                    .or_insert_with(|| clean_value(text));
            }
            None if node.context.is_some() => {
                debug!("<{}> inherits a context without reporting a fact", node.qname());
            }
            None => facts.values.push(clean_value(text)),
        }
    }

    fn dimensions(&self, context: &str, under_axis: bool) -> DimensionPath {
        if under_axis {
            let path = context_path(context, self.prefixes);
            if !path.is_empty() {
                return path;
            }
        }
        self.contexts
            .dimensions(context)
            .cloned()
            .unwrap_or_default()
    }

    fn insert(&mut self, concept: &str, facts: &mut ConceptFacts, key: FactKey, incoming: FactRecord) {
        let mut entry = match facts.facts.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
                return;
            }
            Entry::Occupied(entry) => entry,
        };

        let FactValue::Single(value) = incoming.value.clone() else {
            return;
        };
        let existing = entry.get_mut();
        if existing.value.contains(&value) {
            return;
        }

        let precision = match (incoming.decimals, existing.decimals) {
            (Some(new), Some(old)) => Some(new.cmp_precision(&old)),
            _ => None,
        };
        let ordering = match precision {
            Some(Ordering::Equal) => Some(value.len().cmp(&longest(&existing.value))),
            other => other,
        };

        match ordering {
            Some(Ordering::Greater) => *existing = incoming,
            Some(Ordering::Less) => {}
            Some(Ordering::Equal) => combine(existing, value),
            None => {
                warn!(
                    "incomparable precision for {} at {}: keeping both values",
                    concept,
                    entry.key().date
                );
                self.anomalies.push(Anomaly::PrecisionIncomparable {
                    concept: CompactString::from(concept),
                    key: entry.key().clone(),
                });
                combine(entry.get_mut(), value);
            }
        }
    }

    // Labels go to the longest concept name their id contains, otherwise to
    // the concept they were merged under
    fn attach_labels(&mut self, tree: &FactTree, table: &mut FactTable) {
        for (id, entry) in std::mem::take(&mut self.labels) {
            let target = tree
                .concepts
                .keys()
                .filter(|name| !name.is_empty() && id.contains(name.as_str()))
                .fold(None::<&CompactString>, |best, name| match best {
                    Some(b) if b.len() >= name.len() => Some(b),
                    _ => Some(name),
                })
                .cloned()
                .unwrap_or(entry.owner);

            let facts = table
                .concepts
                .entry(target.clone())
                .or_insert_with(|| ConceptFacts {
                    prefix: tree.get(&target).and_then(|c| c.prefix.clone()),
                    ..ConceptFacts::default()
                });
            for (role, text) in entry.roles {
                facts.labels.entry(role).or_insert(text);
            }
        }
    }
}

fn longest(value: &FactValue) -> usize {
    match value {
        FactValue::Single(v) => v.len(),
        FactValue::Conflicting(values) => values.iter().map(String::len).max().unwrap_or(0),
    }
}

fn combine(record: &mut FactRecord, value: String) {
    match &mut record.value {
        FactValue::Single(existing) => {
            let first = std::mem::take(existing);
            record.value = FactValue::Conflicting(vec![first, value]);
        }
        FactValue::Conflicting(values) => values.push(value),
    }
}

/// Axis/member pairs encoded in a context id, reporting prefixes dropped.
/// A member with no preceding axis gets an empty axis.
pub fn context_path(context: &str, prefixes: &PrefixSet) -> DimensionPath {
    let mut path = DimensionPath::new();
    let mut axis: Option<&str> = None;

    for token in context.split('_').filter(|t| !t.is_empty()) {
        if prefixes.contains(token) {
            continue;
        }
        if token.contains("Axis") {
            if let Some(pending) = axis.replace(token) {
                path.push(pending, "");
            }
        } else if token.contains("Member") {
            path.push(axis.take().unwrap_or(""), token);
        }
    }
    if let Some(pending) = axis {
        path.push(pending, "");
    }
    path
}

pub fn is_text_block(node: &Node, text: &str) -> bool {
    node.local_name.contains("TextBlock")
        || text.contains("&lt;")
        || (text.contains("<div") && text.contains("</div>"))
}

fn clean_value(text: &str) -> String {
    text.trim().chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

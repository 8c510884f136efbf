// Reporting-entity prefix collection
use crate::model::STRUCTURAL_NAMESPACES;
use crate::parser::XmlDocument;
use compact_str::CompactString;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefixes that denote accounting concepts in every SEC filing.
pub const FIXED_PREFIXES: [&str; 11] = [
    "us-gaap",
    "dei",
    "srt",
    "ifrs-full",
    "country",
    "currency",
    "exch",
    "invest",
    "naics",
    "sic",
    "stpr",
];

// Declared by filings but never holding reportable concepts
const NON_CONCEPT_NAMESPACES: [&str; 9] = [
    "http://www.w3.org/1999/xlink",
    "http://www.w3.org/2001/XMLSchema-instance",
    "http://www.w3.org/XML/1998/namespace",
    "http://xbrl.org/2005/xbrldt",
    "http://www.xbrl.org/2003/iso4217",
    "http://www.xbrl.org/2009/utr",
    "http://www.xbrl.org/2006/ref",
    "http://www.xbrl.org/2013/inlineXBRL",
    "http://www.xbrl.org/2003/XLink",
];

pub fn is_concept_namespace(uri: &str) -> bool {
    !STRUCTURAL_NAMESPACES.contains(&uri)
        && !NON_CONCEPT_NAMESPACES.contains(&uri)
        && !uri.starts_with("http://www.xbrl.org/dtr/type")
        && !uri.starts_with("http://www.xbrl.org/inlineXBRL/transformation")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixSet {
    // Longest first so `strip` never removes a shorter overlapping prefix
    prefixes: Vec<CompactString>,
    by_namespace: BTreeMap<CompactString, CompactString>,
}

impl PrefixSet {
    /// The fixed reporting-entity prefixes only.
    pub fn new() -> Self {
        let mut set = Self::default();
        for prefix in FIXED_PREFIXES {
            set.insert(prefix);
        }
        set
    }

    /// Scans the instance document's namespace declarations once.
    pub fn collect(instance: &XmlDocument, ticker: Option<&str>) -> Self {
        let mut set = Self::new();

        for (prefix, uri) in &instance.namespaces {
            if prefix.is_empty() || !is_concept_namespace(uri) {
                continue;
            }
            set.insert(prefix);
            set.by_namespace
                .entry(CompactString::from(uri.as_str()))
                .or_insert_with(|| CompactString::from(prefix.as_str()));
        }

        if let Some(ticker) = ticker {
            set.insert(&ticker.to_lowercase());
        }

        debug!("collected {} reporting prefixes", set.len());
        set
    }

    pub fn insert(&mut self, prefix: &str) {
        let prefix = prefix.trim();
        if prefix.is_empty() || self.contains(prefix) {
            return;
        }
        self.prefixes.push(CompactString::from(prefix));
        self.prefixes
            .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.prefixes.iter().any(|p| p.as_str() == prefix)
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(CompactString::as_str)
    }

    pub fn prefix_for_namespace(&self, uri: &str) -> Option<&str> {
        self.by_namespace.get(uri).map(CompactString::as_str)
    }

    /// Splits `us-gaap_Assets` / `us-gaap:Assets` into a recognized prefix
    /// and the remainder.
    pub fn split<'a>(&self, reference: &'a str) -> (Option<&'a str>, &'a str) {
        for prefix in &self.prefixes {
            let len = prefix.len();
            if reference.len() > len + 1
                && reference.starts_with(prefix.as_str())
                && matches!(reference.as_bytes()[len], b'_' | b':')
            {
                return (Some(&reference[..len]), &reference[len + 1..]);
            }
        }
        (None, reference)
    }

    pub fn strip<'a>(&self, reference: &'a str) -> &'a str {
        self.split(reference).1
    }
}

// Context dictionary: context id to period, unit id to measure
use crate::model::{
    DimensionPath, FactTree, Node, OtherTree, Period, QName, XBRL_DIMENSIONS, XBRL_INSTANCE,
};
use crate::prefixes::PrefixSet;
use crate::{Error, Result};
use chrono::NaiveDate;
use compact_str::CompactString;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// XBRL-instance elements describing periods, entities and units. The merger
/// never rehomes them; the dictionary builder consumes them.
pub const PERIOD_MACHINERY: [&str; 15] = [
    "context",
    "entity",
    "identifier",
    "segment",
    "scenario",
    "period",
    "startDate",
    "endDate",
    "instant",
    "forever",
    "unit",
    "measure",
    "divide",
    "unitNumerator",
    "unitDenominator",
];

pub fn is_period_machinery(qname: &QName) -> bool {
    qname.namespace.as_deref() == Some(XBRL_INSTANCE)
        && PERIOD_MACHINERY.contains(&qname.local_name.as_str())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDictionary {
    pub periods: BTreeMap<CompactString, Period>,
    /// Unit id to measure (`iso4217:USD`, `iso4217:USD/xbrli:shares`).
    #[serde(default)]
    pub units: BTreeMap<CompactString, String>,
    #[serde(default)]
    pub dimensions: BTreeMap<CompactString, DimensionPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Contexts keyed from a single period component, or with none at all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incomplete: Vec<CompactString>,
}

impl ContextDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimensions(mut self, dimensions: BTreeMap<CompactString, DimensionPath>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Canonical date key for a context id.
    pub fn date(&self, context: &str) -> Option<String> {
        self.periods.get(context).map(Period::key)
    }

    /// ISO currency code for a unit id, if the unit is a plain currency.
    pub fn currency<'a>(&'a self, unit_ref: &'a str) -> Option<&'a str> {
        match self.units.get(unit_ref) {
            Some(measure) if !measure.contains('/') => measure
                .strip_prefix("iso4217:")
                .or_else(|| measure.strip_prefix("ISO4217:")),
            Some(_) => None,
            None => (unit_ref.len() == 3 && unit_ref.bytes().all(|b| b.is_ascii_uppercase()))
                .then_some(unit_ref),
        }
    }

    pub fn dimensions(&self, context: &str) -> Option<&DimensionPath> {
        self.dimensions.get(context).filter(|path| !path.is_empty())
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

#[derive(Default)]
struct PartialPeriod {
    start: Option<String>,
    end: Option<String>,
    instant: Option<String>,
    forever: bool,
}

impl PartialPeriod {
    fn set(slot: &mut Option<String>, value: String, context: &str, kind: &str) -> Result<()> {
        match slot {
            Some(existing) if *existing != value => Err(Error::AmbiguousPeriod {
                context: context.to_string(),
                detail: format!("conflicting {} values {} and {}", kind, existing, value),
            }),
            Some(_) => Ok(()),
            None => {
                *slot = Some(value);
                Ok(())
            }
        }
    }

    // Returns the period and whether it was keyed from an incomplete pair.
    // No usable component at all yields no period.
    fn finish(self, context: &str) -> Result<Option<(Period, bool)>> {
        let ambiguous = |detail: &str| Error::AmbiguousPeriod {
            context: context.to_string(),
            detail: detail.to_string(),
        };

        match (self.instant, self.start, self.end, self.forever) {
            (Some(_), Some(_), _, _) | (Some(_), _, Some(_), _) => {
                Err(ambiguous("instant collides with a duration"))
            }
            (Some(_), None, None, true) => Err(ambiguous("instant collides with forever")),
            (None, Some(_), _, true) | (None, _, Some(_), true) => {
                Err(ambiguous("duration collides with forever"))
            }
            (Some(date), None, None, false) => {
                Ok(Some((Period::Instant { date: date.into() }, false)))
            }
            (None, Some(start), Some(end), false) => Ok(Some((
                Period::Duration {
                    start: start.into(),
                    end: end.into(),
                },
                false,
            ))),
            (None, None, None, true) => Ok(Some((Period::Forever, false))),
            (None, Some(date), None, false) | (None, None, Some(date), false) => {
                Ok(Some((Period::Instant { date: date.into() }, true)))
            }
            (None, None, None, false) => Ok(None),
        }
    }
}

/// Builds the dictionary from the contextual tree, consuming every period,
/// unit and entity node in it.
pub fn build_context_dict(other: &mut OtherTree) -> Result<ContextDictionary> {
    let mut partial: BTreeMap<CompactString, PartialPeriod> = BTreeMap::new();

    for kind in ["startDate", "endDate", "instant", "forever"] {
        for node in other.take(XBRL_INSTANCE, kind) {
            let Some(context) = node.context.clone() else {
                warn!("<{}> outside any context, ignored", node.qname());
                continue;
            };
            let entry = partial.entry(context.clone()).or_default();

            if kind == "forever" {
                entry.forever = true;
                continue;
            }
            let Some(raw) = node.text() else {
                warn!("empty <{}> in context {}", kind, context);
                continue;
            };
            let date = normalize_date(raw).unwrap_or_else(|| {
                warn!("unparseable {} {:?} in context {}", kind, raw, context);
                clean_date(raw)
            });
            let slot = match kind {
                "startDate" => &mut entry.start,
                "endDate" => &mut entry.end,
                _ => &mut entry.instant,
            };
            PartialPeriod::set(slot, date, &context, kind)?;
        }
    }

    let mut dict = ContextDictionary::new();
    for (context, period) in partial {
        let Some((period, incomplete)) = period.finish(&context)? else {
            warn!("context {} has an empty period", context);
            dict.incomplete.push(context);
            continue;
        };
        if incomplete {
            warn!("context {} has only one of startDate/endDate", context);
            dict.incomplete.push(context.clone());
        }
        dict.periods.insert(context, period);
    }

    for node in other.take(XBRL_INSTANCE, "context") {
        if let Some(id) = node.attr("id") {
            if !dict.periods.contains_key(id) && !dict.incomplete.iter().any(|c| c.as_str() == id) {
                warn!("context {} declares no period", id);
                dict.incomplete.push(CompactString::from(id));
            }
        }
    }

    dict.entity = other
        .take(XBRL_INSTANCE, "identifier")
        .iter()
        .find_map(|n| n.text().map(str::to_string));

    dict.units = collect_units(other);

    for name in PERIOD_MACHINERY {
        other.take(XBRL_INSTANCE, name);
    }

    info!(
        "built {} contexts and {} units ({} incomplete)",
        dict.periods.len(),
        dict.units.len(),
        dict.incomplete.len()
    );
    Ok(dict)
}

fn collect_units(other: &mut OtherTree) -> BTreeMap<CompactString, String> {
    let divided: Vec<CompactString> = other
        .take(XBRL_INSTANCE, "divide")
        .into_iter()
        .filter_map(|n| n.context)
        .collect();

    // Measures arrive in document order, so a divide's numerator precedes
    // its denominator
    let mut measures: BTreeMap<CompactString, Vec<String>> = BTreeMap::new();
    for node in other.take(XBRL_INSTANCE, "measure") {
        if let (Some(unit), Some(text)) = (node.context.clone(), node.text()) {
            measures.entry(unit).or_default().push(text.to_string());
        }
    }

    measures
        .into_iter()
        .map(|(unit, parts)| {
            let separator = if divided.contains(&unit) { "/" } else { "*" };
            (unit, parts.join(separator))
        })
        .collect()
}

/// Explicit dimension members per context id, read from wherever the merger
/// left the `explicitMember` nodes. Paths are sorted by axis.
pub fn collect_dimensions(
    tree: &FactTree,
    other: &OtherTree,
    prefixes: &PrefixSet,
) -> BTreeMap<CompactString, DimensionPath> {
    let mut found: BTreeMap<CompactString, DimensionPath> = BTreeMap::new();
    let mut visit = |node: &Node| {
        if !node.is_named(XBRL_DIMENSIONS, "explicitMember") {
            return;
        }
        let (Some(context), Some(dimension), Some(member)) =
            (node.context.as_ref(), node.attr("dimension"), node.text())
        else {
            return;
        };
        let axis = local_part(prefixes.strip(dimension.trim()));
        let member = local_part(prefixes.strip(member.trim()));
        found.entry(context.clone()).or_default().push(axis, member);
    };

    for concept in tree.iter() {
        for child in &concept.children {
            child.walk(&mut visit);
        }
    }
    for node in other.nodes() {
        node.walk(&mut visit);
    }

    for path in found.values_mut() {
        path.0.sort();
        path.0.dedup();
    }
    found
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn clean_date(raw: &str) -> String {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '\n' && *c != '\r').collect();
    match cleaned.split_once('T') {
        Some((date, _)) => date.to_string(),
        None => cleaned,
    }
}

/// `YYYY-MM-DD` for a period value, dropping any time part.
pub fn normalize_date(raw: &str) -> Option<String> {
    let cleaned = clean_date(raw);
    NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

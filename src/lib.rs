//! crabtree - XBRL filing reconciler
//!
//! Merges an instance document and its linkbases into one concept tree and
//! flattens it into a date-indexed fact table.
//!
//! Licensed under AGPL-3.0

pub mod cache;
pub mod codec;
pub mod contexts;
pub mod extractor;
pub mod importer;
pub mod merger;
pub mod model;
pub mod parser;
pub mod prefixes;
pub mod resolver;
pub mod sec;
pub mod validator;

pub use parser::Parser;

// Re-export main types
pub use codec::Snapshot;
pub use contexts::ContextDictionary;
pub use extractor::ExtractOptions;
pub use merger::{Heuristics, MergeStats};
pub use model::{Anomaly, DocumentRole, FactTable, FactTree, FactValue, Node};
pub use prefixes::PrefixSet;
pub use sec::FilingDocuments;

use cache::SnapshotCache;
use log::{debug, info};
use merger::{MergeOutput, TreeMerger};
use model::{DiscardReason, Discarded};
use std::path::{Path, PathBuf};
use validator::{TreeValidator, ValidationError};

/// Processing options for one filing.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub ticker: Option<String>,
    pub extra_prefixes: Vec<String>,
    pub include_text_blocks: bool,
    pub heuristics: Heuristics,
    pub cache_dir: Option<PathBuf>,
    pub strict_validation: bool,
}

impl ReconcileConfig {
    pub fn sec_edgar() -> Self {
        Self {
            strict_validation: true,
            ..Self::default()
        }
    }

    pub fn with_ticker(mut self, ticker: &str) -> Self {
        self.ticker = Some(ticker.to_string());
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.extra_prefixes.push(prefix.to_string());
        self
    }

    pub fn with_text_blocks(mut self, include: bool) -> Self {
        self.include_text_blocks = include;
        self
    }

    pub fn with_heuristics(mut self, heuristics: Heuristics) -> Self {
        self.heuristics = heuristics;
        self
    }

    pub fn with_cache_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            ticker: None,
            extra_prefixes: Vec::new(),
            include_text_blocks: false,
            heuristics: Heuristics::all(),
            cache_dir: None,
            strict_validation: false,
        }
    }
}

/// Result of processing one filing.
#[derive(Debug, Clone)]
pub struct FilingOutput {
    pub tree: FactTree,
    pub contexts: ContextDictionary,
    pub table: FactTable,
    pub anomalies: Vec<Anomaly>,
    pub discarded: Vec<Discarded>,
    pub stats: MergeStats,
    pub validation: Vec<ValidationError>,
    pub from_cache: bool,
}

impl FilingOutput {
    /// The fact table in its `{ ticker: { concept: ... } }` form.
    pub fn to_json(&self) -> Result<String> {
        codec::table_to_json(&self.table)
    }
}

pub struct Reconciler {
    config: ReconcileConfig,
    validator: Option<TreeValidator>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::with_config(ReconcileConfig::default())
    }

    pub fn with_config(config: ReconcileConfig) -> Self {
        let validator = config
            .strict_validation
            .then(|| TreeValidator::new().strict());
        Self { config, validator }
    }

    pub fn sec_edgar() -> Self {
        Self::with_config(ReconcileConfig::sec_edgar())
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validator = match (validate, self.config.strict_validation) {
            (false, _) => None,
            (true, true) => Some(TreeValidator::new().strict()),
            (true, false) => Some(TreeValidator::new()),
        };
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn process_dir<P: AsRef<Path>>(&self, dir: P) -> Result<FilingOutput> {
        let filing = FilingDocuments::from_dir(dir)?;
        self.process(&filing)
    }

    pub fn process(&self, filing: &FilingDocuments) -> Result<FilingOutput> {
        let instance = filing.instance()?;

        let cache = match &self.config.cache_dir {
            Some(dir) => Some(SnapshotCache::new(dir)?),
            None => None,
        };
        if let Some(snapshot) = cache.as_ref().map(|c| c.get(&filing.id)).transpose()?.flatten() {
            info!("filing {} restored from cache", filing.id);
            return Ok(self.finish(filing, snapshot, MergeOutputParts::default(), true));
        }

        let ticker = self
            .config
            .ticker
            .clone()
            .or_else(|| filing.ticker_hint.clone());
        let mut prefixes = PrefixSet::collect(instance, ticker.as_deref());
        for prefix in &self.config.extra_prefixes {
            prefixes.insert(prefix);
        }

        let imported: Vec<Node> = filing
            .ordered()
            .map(|(role, document)| {
                debug!("importing {:?} document", role);
                importer::import(document)
            })
            .collect();
        info!("imported {} documents for filing {}", imported.len(), filing.id);

        let MergeOutput {
            tree,
            mut other,
            discarded,
            stats,
        } = TreeMerger::new(&prefixes, self.config.heuristics).merge(imported);

        let dimensions = contexts::collect_dimensions(&tree, &other, &prefixes);
        let contexts = contexts::build_context_dict(&mut other)?.with_dimensions(dimensions);

        let validation = match &self.validator {
            Some(validator) => validator.validate(&tree, &other, &contexts)?,
            None => Vec::new(),
        };

        let snapshot = Snapshot {
            tree,
            contexts,
            prefixes,
        };
        if let Some(cache) = &cache {
            cache.insert(&filing.id, &snapshot)?;
        }

        let parts = MergeOutputParts {
            discarded,
            stats,
            validation,
        };
        Ok(self.finish(filing, snapshot, parts, false))
    }

    fn finish(
        &self,
        filing: &FilingDocuments,
        snapshot: Snapshot,
        parts: MergeOutputParts,
        from_cache: bool,
    ) -> FilingOutput {
        let Snapshot {
            tree,
            contexts,
            prefixes,
        } = snapshot;

        let options = ExtractOptions {
            include_text_blocks: self.config.include_text_blocks,
        };
        let extraction = extractor::extract_facts(&tree, &contexts, &prefixes, &options);
        let mut table = extraction.table;
        table.ticker = self
            .config
            .ticker
            .clone()
            .or_else(|| filing.ticker_hint.clone())
            .or_else(|| contexts.entity.clone())
            .unwrap_or_else(|| filing.id.clone());

        let mut anomalies: Vec<Anomaly> = parts
            .discarded
            .iter()
            .filter(|d| d.reason == DiscardReason::MalformedReference)
            .map(|d| Anomaly::MalformedReference {
                node: d.node.qname(),
            })
            .collect();
        anomalies.extend(
            contexts
                .incomplete
                .iter()
                .map(|context| Anomaly::IncompletePeriod {
                    context: context.clone(),
                }),
        );
        anomalies.extend(extraction.anomalies);

        info!(
            "filing {}: {} facts for {} ({} anomalies)",
            filing.id,
            table.fact_count(),
            table.ticker,
            anomalies.len()
        );

        FilingOutput {
            tree,
            contexts,
            table,
            anomalies,
            discarded: parts.discarded,
            stats: parts.stats,
            validation: parts.validation,
            from_cache,
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

// Merge by-products that a cached snapshot does not carry
#[derive(Default)]
struct MergeOutputParts {
    discarded: Vec<Discarded>,
    stats: MergeStats,
    validation: Vec<ValidationError>,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ambiguous period for context {context}: {detail}")]
    AmbiguousPeriod { context: String, detail: String },

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

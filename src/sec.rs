// SEC EDGAR filing documents (local files only)
use crate::model::DocumentRole;
use crate::parser::{Parser, XmlDocument};
use crate::{Error, Result};
use log::{debug, info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The linked documents of one filing, keyed by role.
#[derive(Debug, Clone, Default)]
pub struct FilingDocuments {
    pub id: String,
    /// Ticker guessed from the instance file name.
    pub ticker_hint: Option<String>,
    documents: BTreeMap<DocumentRole, XmlDocument>,
}

impl FilingDocuments {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_document(mut self, role: DocumentRole, document: XmlDocument) -> Self {
        self.insert(role, document);
        self
    }

    pub fn with_ticker_hint(mut self, ticker: &str) -> Self {
        self.ticker_hint = Some(ticker.to_lowercase());
        self
    }

    pub fn insert(&mut self, role: DocumentRole, document: XmlDocument) {
        self.documents.insert(role, document);
    }

    pub fn get(&self, role: DocumentRole) -> Option<&XmlDocument> {
        self.documents.get(&role)
    }

    pub fn instance(&self) -> Result<&XmlDocument> {
        self.get(DocumentRole::Instance)
            .ok_or_else(|| Error::NotFound(format!("instance document for filing {}", self.id)))
    }

    /// Present documents in merge order.
    pub fn ordered(&self) -> impl Iterator<Item = (DocumentRole, &XmlDocument)> {
        DocumentRole::MERGE_ORDER
            .into_iter()
            .filter_map(|role| self.documents.get(&role).map(|doc| (role, doc)))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Loads an unpacked EDGAR filing directory, classifying documents by
    /// file name.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut selected: BTreeMap<DocumentRole, PathBuf> = BTreeMap::new();
        for path in paths {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let Some(role) = classify(&name) else {
                debug!("ignoring {}", name);
                continue;
            };
            if let Some(existing) = selected.get(&role) {
                warn!(
                    "{:?} document {} ignored, already using {}",
                    role,
                    name,
                    existing.display()
                );
                continue;
            }
            selected.insert(role, path);
        }

        let ticker_hint = selected
            .get(&DocumentRole::Instance)
            .and_then(|p| p.file_name())
            .and_then(|n| ticker_hint(&n.to_string_lossy()));

        let documents = parse_all(selected.into_iter().collect())?;
        let mut filing = Self {
            id,
            ticker_hint,
            documents: BTreeMap::new(),
        };
        for (role, document) in documents {
            filing.insert(role, document);
        }

        info!("loaded {} documents for filing {}", filing.len(), filing.id);
        filing.instance()?;
        Ok(filing)
    }
}

#[cfg(feature = "parallel")]
fn parse_all(files: Vec<(DocumentRole, PathBuf)>) -> Result<Vec<(DocumentRole, XmlDocument)>> {
    files
        .par_iter()
        .map(|(role, path)| Ok((*role, Parser::new().parse_file(path)?)))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn parse_all(files: Vec<(DocumentRole, PathBuf)>) -> Result<Vec<(DocumentRole, XmlDocument)>> {
    files
        .iter()
        .map(|(role, path)| Ok((*role, Parser::new().parse_file(path)?)))
        .collect()
}

/// Role of an EDGAR XBRL file from its name.
pub fn classify(file_name: &str) -> Option<DocumentRole> {
    let name = file_name.to_ascii_lowercase();
    if name.ends_with("_lab.xml") {
        Some(DocumentRole::Label)
    } else if name.ends_with("_def.xml") {
        Some(DocumentRole::Definition)
    } else if name.ends_with("_cal.xml") {
        Some(DocumentRole::Calculation)
    } else if name.ends_with("_pre.xml") {
        Some(DocumentRole::Presentation)
    } else if name.ends_with(".xsd") {
        Some(DocumentRole::Schema)
    } else if name.ends_with(".xml") && !name.starts_with("filingsummary") {
        Some(DocumentRole::Instance)
    } else {
        None
    }
}

/// `aapl-20200926.xml` gives `aapl`.
pub fn ticker_hint(file_name: &str) -> Option<String> {
    let (head, _) = file_name.split_once('-')?;
    (!head.is_empty() && head.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| head.to_lowercase())
}

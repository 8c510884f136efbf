// On-disk snapshots keyed by filing id
use crate::codec::Snapshot;
use crate::Result;
use log::debug;
use std::path::{Path, PathBuf};

pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn path_for(&self, filing_id: &str) -> PathBuf {
        let file: String = filing_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }

    #[inline(always)]
    pub fn contains(&self, filing_id: &str) -> bool {
        self.path_for(filing_id).is_file()
    }

    pub fn get(&self, filing_id: &str) -> Result<Option<Snapshot>> {
        let path = self.path_for(filing_id);
        if !path.is_file() {
            return Ok(None);
        }
        debug!("cache hit for {} at {}", filing_id, path.display());
        Snapshot::read(&path).map(Some)
    }

    pub fn insert(&self, filing_id: &str, snapshot: &Snapshot) -> Result<()> {
        let path = self.path_for(filing_id);
        debug!("caching {} at {}", filing_id, path.display());
        snapshot.write(path)
    }

    pub fn remove(&self, filing_id: &str) -> Result<bool> {
        let path = self.path_for(filing_id);
        if !path.is_file() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}

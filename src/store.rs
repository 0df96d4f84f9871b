use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::MovieRecord;
use crate::parser::normalize::collapse_whitespace;

pub const DEFAULT_CACHE_PATH: &str = "all_movies.json";

/// Key → record mapping backed by a pretty-printed JSON document.
///
/// The mutex is held across the in-memory update and the flush, so
/// concurrent `put`s serialize and the file always matches some committed
/// state of the mapping.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, MovieRecord>>,
}

impl RecordStore {
    /// Open the cache at `path`, starting empty if it is missing or unusable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match Self::load(&path) {
            Ok(records) => {
                info!("Loaded {} cached movies from {:?}", records.len(), path);
                records
            }
            Err(e) => {
                warn!("{}; starting with an empty cache", e);
                if matches!(e, StoreError::Corrupt { .. }) {
                    quarantine(&path);
                }
                BTreeMap::new()
            }
        };
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    /// Read the persisted mapping. A missing or blank file is an empty store.
    pub fn load(path: &Path) -> Result<BTreeMap<String, MovieRecord>, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let parsed: BTreeMap<String, MovieRecord> =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(rekey(parsed))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exact-key lookup.
    pub fn get(&self, key: &str) -> Option<MovieRecord> {
        self.records().get(key).cloned()
    }

    /// Exact title match ignoring case and whitespace runs. When several
    /// years share the title, the latest year wins.
    pub fn find_by_title(&self, title: &str) -> Option<MovieRecord> {
        let wanted = title_match_key(title);
        if wanted.is_empty() {
            return None;
        }
        self.records()
            .values()
            .filter(|r| title_match_key(&r.title) == wanted)
            .max_by(|a, b| a.year.cmp(&b.year))
            .cloned()
    }

    /// Insert or overwrite under the record's derived key, then flush.
    ///
    /// Untitled records are rejected and never reach the mapping. On a
    /// `Persistence` error the in-memory mapping already holds the record;
    /// only durability is missing.
    pub fn put(&self, record: MovieRecord) -> Result<(), StoreError> {
        if record.title.trim().is_empty() {
            warn!("Refusing to cache an untitled record");
            return Err(StoreError::Untitled);
        }
        let key = record.key();
        let mut records = self.records();
        if records.insert(key.clone(), record).is_some() {
            debug!("Overwriting cached record {}", key);
        }
        self.write_locked(&records)?;
        info!("Saved {} to {:?}", key, self.path);
        Ok(())
    }

    pub fn all(&self) -> Vec<MovieRecord> {
        self.records().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, MovieRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write to a sibling temp file and rename over the target.
    fn write_locked(&self, records: &BTreeMap<String, MovieRecord>) -> Result<(), StoreError> {
        let persistence = |source: std::io::Error| StoreError::Persistence {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_string_pretty(records)
            .map_err(|e| persistence(std::io::Error::from(e)))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json.as_bytes()).map_err(persistence)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            persistence(e)
        })
    }
}

fn title_match_key(title: &str) -> String {
    collapse_whitespace(title).to_lowercase()
}

/// Re-derive every key from its record, dropping untitled entries.
fn rekey(parsed: BTreeMap<String, MovieRecord>) -> BTreeMap<String, MovieRecord> {
    let mut records = BTreeMap::new();
    for (stored_key, record) in parsed {
        let mut record = record.scrub_placeholders();
        record.title = collapse_whitespace(&record.title);
        if record.title.is_empty() {
            warn!("Dropping cached entry {:?} with an empty title", stored_key);
            continue;
        }
        let key = record.key();
        if key != stored_key {
            debug!("Re-keyed cached entry {:?} as {:?}", stored_key, key);
        }
        records.insert(key, record);
    }
    records
}

/// Move a corrupt cache aside so the next flush does not destroy it.
fn quarantine(path: &Path) {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".corrupt-{}", stamp));
    match fs::rename(path, &target) {
        Ok(()) => warn!("Moved corrupt cache to {:?}", target),
        Err(e) => warn!("Could not move corrupt cache {:?} aside: {}", path, e),
    }
}

// ── Tests ──

//! The payload catalog: a category-indexed view of a directory tree.
//!
//! Layout on disk is one subdirectory per category, each holding
//! payload files. Every file is parsed at scan time, so a malformed
//! payload is caught at startup instead of mid-write, and lookups
//! hand out shared images without touching the filesystem. Rescans
//! build a complete new index and swap it in one step, so concurrent
//! lookups always see either the old tree or the new one, never a mix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use tagdock_core::constants::PAYLOAD_FILE_EXTENSION;
use tagdock_core::TagImage;

use crate::error::{CatalogError, CatalogResult};
use crate::payload::parse_payload;

/// One loaded payload: its parsed image and where it came from.
#[derive(Debug, Clone)]
pub struct Payload {
    pub image: TagImage,
    pub path: PathBuf,
}

type Index = BTreeMap<String, BTreeMap<String, Arc<Payload>>>;

/// Category-indexed payload store.
pub struct Catalog {
    root: PathBuf,
    index: RwLock<Arc<Index>>,
}

impl Catalog {
    /// Open a catalog rooted at `root`, scanning and parsing the whole
    /// tree immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EmptySource`] when the tree holds no
    /// payload files at all, and [`CatalogError::MalformedPayload`]
    /// for the first file that does not parse; a service with nothing
    /// valid to write is misconfigured.
    pub fn open(root: impl Into<PathBuf>) -> CatalogResult<Self> {
        let root = root.into();
        let index = scan(&root)?;
        info!(
            root = %root.display(),
            categories = index.len(),
            payloads = index.values().map(BTreeMap::len).sum::<usize>(),
            "catalog loaded"
        );
        Ok(Self {
            root,
            index: RwLock::new(Arc::new(index)),
        })
    }

    /// Category names, sorted.
    pub fn list_categories(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// Payload names within a category, sorted.
    pub fn list_payloads(&self, category: &str) -> CatalogResult<Vec<String>> {
        let snapshot = self.snapshot();
        let payloads = snapshot
            .get(category)
            .ok_or_else(|| CatalogError::CategoryNotFound(category.to_string()))?;
        Ok(payloads.keys().cloned().collect())
    }

    /// Look up one payload.
    pub fn get(&self, category: &str, name: &str) -> CatalogResult<Arc<Payload>> {
        let snapshot = self.snapshot();
        let payloads = snapshot
            .get(category)
            .ok_or_else(|| CatalogError::CategoryNotFound(category.to_string()))?;
        payloads
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::PayloadNotFound {
                category: category.to_string(),
                name: name.to_string(),
            })
    }

    /// Rescan the tree and swap the index in one step.
    ///
    /// Returns the new (category, payload) counts. On any scan or
    /// parse error the old index stays in place.
    pub fn reload(&self) -> CatalogResult<(usize, usize)> {
        let index = scan(&self.root)?;
        let categories = index.len();
        let payloads = index.values().map(BTreeMap::len).sum();
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(index);
        info!(categories, payloads, "catalog reloaded");
        Ok((categories, payloads))
    }

    fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&self.index.read().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Walk one level of categories, parsing every payload file found.
fn scan(root: &Path) -> CatalogResult<Index> {
    let mut index = Index::new();

    let entries = std::fs::read_dir(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CatalogError::EmptySource {
            root: root.to_path_buf(),
        },
        _ => CatalogError::Io(e),
    })?;

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let category = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(name = ?raw, "skipping category with non-UTF-8 name");
                continue;
            }
        };

        let mut payloads = BTreeMap::new();
        for file in std::fs::read_dir(entry.path())? {
            let file = file?;
            let path = file.path();
            if !file.file_type()?.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "skipping payload with non-UTF-8 name");
                continue;
            };
            let contents = std::fs::read(&path)?;
            let image = parse_payload(&path, &contents)?;
            payloads.insert(stem.to_string(), Arc::new(Payload { image, path }));
        }

        if payloads.is_empty() {
            debug!(category, "skipping empty category directory");
            continue;
        }
        index.insert(category, payloads);
    }

    if index.is_empty() {
        return Err(CatalogError::EmptySource {
            root: root.to_path_buf(),
        });
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tagdock_core::constants::{TAG_SIZE, USER_DATA_SIZE};
    use tempfile::TempDir;

    fn write_payload(dir: &Path, category: &str, name: &str, contents: &[u8]) {
        let category_dir = dir.join(category);
        std::fs::create_dir_all(&category_dir).unwrap();
        std::fs::write(category_dir.join(format!("{name}.nfc")), contents).unwrap();
    }

    fn seeded() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_payload(dir.path(), "animal-crossing", "isabelle", &[0x11; TAG_SIZE]);
        write_payload(dir.path(), "animal-crossing", "tom-nook", &[0x22; TAG_SIZE]);
        write_payload(dir.path(), "smash", "mario", &[0x33; USER_DATA_SIZE]);
        dir
    }

    #[test]
    fn lists_categories_and_payloads_sorted() {
        let dir = seeded();
        let catalog = Catalog::open(dir.path()).unwrap();
        assert_eq!(catalog.list_categories(), ["animal-crossing", "smash"]);
        assert_eq!(
            catalog.list_payloads("animal-crossing").unwrap(),
            ["isabelle", "tom-nook"]
        );
    }

    #[test]
    fn full_binary_payload_round_trips() {
        let dir = seeded();
        let mut contents = vec![0u8; TAG_SIZE];
        for (i, byte) in contents.iter_mut().enumerate() {
            *byte = i as u8;
        }
        write_payload(dir.path(), "smash", "ridley", &contents);
        let catalog = Catalog::open(dir.path()).unwrap();
        let payload = catalog.get("smash", "ridley").unwrap();
        assert_eq!(payload.image.as_bytes(), &contents[..]);
    }

    #[test]
    fn user_region_payload_parses() {
        let dir = seeded();
        let catalog = Catalog::open(dir.path()).unwrap();
        let payload = catalog.get("smash", "mario").unwrap();
        assert_eq!(payload.image.page(4).unwrap(), [0x33; 4]);
    }

    #[test]
    fn unknown_names_are_distinct_errors() {
        let dir = seeded();
        let catalog = Catalog::open(dir.path()).unwrap();
        assert!(matches!(
            catalog.get("zelda", "link"),
            Err(CatalogError::CategoryNotFound(_))
        ));
        assert!(matches!(
            catalog.get("smash", "link"),
            Err(CatalogError::PayloadNotFound { .. })
        ));
    }

    #[test]
    fn empty_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Catalog::open(dir.path()),
            Err(CatalogError::EmptySource { .. })
        ));
        assert!(matches!(
            Catalog::open(dir.path().join("missing")),
            Err(CatalogError::EmptySource { .. })
        ));
    }

    #[test]
    fn non_payload_files_are_ignored() {
        let dir = seeded();
        std::fs::write(dir.path().join("smash").join("notes.txt"), b"hi").unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        assert_eq!(catalog.list_payloads("smash").unwrap(), ["mario"]);
    }

    #[test]
    fn malformed_payload_fails_the_whole_load() {
        let dir = seeded();
        write_payload(dir.path(), "smash", "broken", &[0x00; 17]);
        assert!(matches!(
            Catalog::open(dir.path()),
            Err(CatalogError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn reload_picks_up_new_payloads() {
        let dir = seeded();
        let catalog = Catalog::open(dir.path()).unwrap();
        write_payload(dir.path(), "zelda", "link", &[0x44; TAG_SIZE]);
        let (categories, payloads) = catalog.reload().unwrap();
        assert_eq!(categories, 3);
        assert_eq!(payloads, 4);
        assert_eq!(catalog.list_payloads("zelda").unwrap(), ["link"]);
    }

    #[test]
    fn failed_reload_keeps_the_old_index() {
        let dir = seeded();
        let catalog = Catalog::open(dir.path()).unwrap();
        write_payload(dir.path(), "zelda", "broken", &[0x00; 17]);
        assert!(catalog.reload().is_err());
        assert_eq!(catalog.list_categories(), ["animal-crossing", "smash"]);
        assert!(catalog.get("smash", "mario").is_ok());
    }
}

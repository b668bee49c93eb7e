//! Policy forest storage and debounced write-back.
//!
//! The forest is the root document plus every sub-document named in its
//! manifest. It is loaded eagerly and fails fast: a missing or malformed
//! manifest file aborts [`PolicyStore::open`].
//!
//! ## Write-back
//!
//! Every [`PolicyStore::invalidate`] sends a tick to a dedicated worker
//! thread running a current-thread tokio runtime. The worker waits until no
//! tick has arrived for `write_delay`, then writes the whole forest once.
//! Any number of invalidations inside the window coalesce into one write.
//!
//! Durability gap: dropping the store (or exiting the process) abandons a
//! pending write. Call [`PolicyStore::flush`] when the forest must be on
//! disk before continuing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::policy::{EntityPolicyData, PolicyData};

/// In-memory policy forest.
#[derive(Debug)]
pub(crate) struct Forest {
    pub(crate) root: PolicyData,
    pub(crate) documents: BTreeMap<String, EntityPolicyData>,
    /// Transient documents backing synthesized nodes; never persisted.
    pub(crate) scratch: BTreeMap<String, EntityPolicyData>,
    root_file: String,
}

impl Forest {
    fn new(root: PolicyData, documents: BTreeMap<String, EntityPolicyData>, root_file: String) -> Self {
        Self {
            root,
            documents,
            scratch: BTreeMap::new(),
            root_file,
        }
    }

    /// Add `id` to the manifest. Returns false if it was already there.
    pub(crate) fn register(&mut self, id: &str) -> bool {
        if self.root.manifest.contains_key(id) {
            return false;
        }
        let base = document_file(id);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while candidate == self.root_file || self.root.manifest.values().any(|p| *p == candidate) {
            let stem = base.strip_suffix(".json").unwrap_or(&base);
            candidate = format!("{stem}~{suffix}.json");
            suffix += 1;
        }
        self.root.manifest.insert(id.to_owned(), candidate);
        true
    }
}

/// Relative file for a document id: slash-separated segments restricted to
/// a filesystem-safe alphabet.
fn document_file(id: &str) -> String {
    let segments: Vec<String> = id
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let cleaned: String = segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || "-_.[]@$".contains(c) {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            if cleaned.chars().all(|c| c == '.') {
                cleaned.replace('.', "_")
            } else {
                cleaned
            }
        })
        .collect();
    if segments.is_empty() {
        "_.json".to_owned()
    } else {
        format!("{}.json", segments.join("/"))
    }
}

fn lock(forest: &Mutex<Forest>) -> MutexGuard<'_, Forest> {
    forest.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PolicyFiles {
    root: PathBuf,
    name: String,
}

impl PolicyFiles {
    fn root_file_name(&self) -> String {
        format!("{}.json", self.name)
    }

    fn root_file(&self) -> PathBuf {
        self.root.join(self.root_file_name())
    }

    fn resolve(&self, id: &str, relative: &str) -> Result<PathBuf, StoreError> {
        let path = Path::new(relative);
        if relative.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(StoreError::InvalidManifest {
                id: id.to_owned(),
                path: relative.to_owned(),
            });
        }
        Ok(self.root.join(path))
    }

    fn persist(&self, forest: &Mutex<Forest>) -> Result<usize, StoreError> {
        // Serialize under the lock, write outside it.
        let outputs = {
            let forest = lock(forest);
            let mut outputs = Vec::with_capacity(forest.root.manifest.len() + 1);
            outputs.push((self.root_file(), pretty("<root>", &forest.root)?));
            for (id, relative) in &forest.root.manifest {
                if let Some(document) = forest.documents.get(id) {
                    outputs.push((self.resolve(id, relative)?, pretty(id, document)?));
                }
            }
            outputs
        };
        for (path, text) in &outputs {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(path, text).map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        }
        Ok(outputs.len())
    }
}

fn pretty<T: Serialize>(id: &str, value: &T) -> Result<String, StoreError> {
    let mut text = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize {
        id: id.to_owned(),
        source,
    })?;
    text.push('\n');
    Ok(text)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn spawn_writeback(
    forest: Arc<Mutex<Forest>>,
    files: Arc<PolicyFiles>,
    delay: Duration,
) -> Result<mpsc::UnboundedSender<()>, StoreError> {
    let (ticks, mut rx) = mpsc::unbounded_channel::<()>();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(StoreError::Worker)?;
    std::thread::Builder::new()
        .name("policy-writeback".to_owned())
        .spawn(move || {
            runtime.block_on(async move {
                while rx.recv().await.is_some() {
                    loop {
                        tokio::select! {
                            () = tokio::time::sleep(delay) => break,
                            tick = rx.recv() => {
                                if tick.is_none() {
                                    tracing::debug!("policy store closed with a pending write");
                                    return;
                                }
                            }
                        }
                    }
                    match files.persist(&forest) {
                        Ok(count) => tracing::debug!(
                            root = %files.root.display(),
                            files = count,
                            "policy forest written"
                        ),
                        Err(e) => tracing::error!(error = %e, "policy write-back failed"),
                    }
                }
            });
        })
        .map_err(StoreError::Worker)?;
    Ok(ticks)
}

// ---------------------------------------------------------------------------
// PolicyStore
// ---------------------------------------------------------------------------

/// Owner of the policy forest.
///
/// ## Example
///
/// ```rust,ignore
/// use airlock::{PolicyStore, StoreConfig};
///
/// let store = PolicyStore::open(&StoreConfig::new("./policies"))?;
/// println!("{} documents", store.ids().len());
/// store.flush()?;
/// ```
pub struct PolicyStore {
    forest: Arc<Mutex<Forest>>,
    files: Option<Arc<PolicyFiles>>,
    write_delay: Duration,
    ticks: Option<mpsc::UnboundedSender<()>>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("files", &self.files)
            .field("write_delay", &self.write_delay)
            .finish_non_exhaustive()
    }
}

impl PolicyStore {
    /// Load the forest under `config.root` and start the write-back worker.
    ///
    /// A missing root document starts an empty forest with process defaults
    /// and schedules its first write.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let files = PolicyFiles {
            root: config.root.clone(),
            name: config.name.clone(),
        };
        let root_path = files.root_file();
        let (root, fresh) = if root_path.exists() {
            (read_json::<PolicyData>(&root_path)?, false)
        } else {
            (PolicyData::default(), true)
        };
        let mut documents = BTreeMap::new();
        for (id, relative) in &root.manifest {
            let path = files.resolve(id, relative)?;
            documents.insert(id.clone(), read_json::<EntityPolicyData>(&path)?);
        }
        tracing::debug!(
            root = %config.root.display(),
            documents = documents.len(),
            fresh,
            "loaded policy forest"
        );

        let forest = Arc::new(Mutex::new(Forest::new(root, documents, files.root_file_name())));
        let files = Arc::new(files);
        let ticks = spawn_writeback(Arc::clone(&forest), Arc::clone(&files), config.write_delay)?;
        let store = Self {
            forest,
            files: Some(files),
            write_delay: config.write_delay,
            ticks: Some(ticks),
        };
        if fresh {
            store.invalidate();
        }
        Ok(store)
    }

    /// A forest that is never persisted.
    pub fn in_memory(root: PolicyData) -> Self {
        Self {
            forest: Arc::new(Mutex::new(Forest::new(root, BTreeMap::new(), String::new()))),
            files: None,
            write_delay: Duration::ZERO,
            ticks: None,
        }
    }

    /// Schedule a write-back of the whole forest.
    pub fn invalidate(&self) {
        if let Some(ticks) = &self.ticks
            && ticks.send(()).is_err()
        {
            tracing::warn!("policy write-back worker is gone; change not scheduled");
        }
    }

    /// Write the whole forest now.
    pub fn flush(&self) -> Result<(), StoreError> {
        if let Some(files) = &self.files {
            files.persist(&self.forest)?;
        }
        Ok(())
    }

    /// Quiescence delay before a scheduled write.
    pub fn write_delay(&self) -> Duration {
        self.write_delay
    }

    /// Directory the forest is persisted to, if any.
    pub fn location(&self) -> Option<&Path> {
        self.files.as_deref().map(|f| f.root.as_path())
    }

    /// Snapshot of the root document.
    pub fn root(&self) -> PolicyData {
        self.with_forest(|f| f.root.clone())
    }

    /// Snapshot of a sub-document.
    pub fn document(&self, id: &str) -> Option<EntityPolicyData> {
        self.with_forest(|f| f.documents.get(id).cloned())
    }

    /// Ids of every loaded or created sub-document.
    pub fn ids(&self) -> Vec<String> {
        self.with_forest(|f| f.documents.keys().cloned().collect())
    }

    pub(crate) fn with_forest<R>(&self, f: impl FnOnce(&mut Forest) -> R) -> R {
        f(&mut lock(&self.forest))
    }
}

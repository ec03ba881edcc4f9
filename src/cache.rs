//! Zone-name caching over a zoneinfo directory tree.
//!
//! Two cooperating modes share one record store. Lazy mode resolves a logical name
//! (`"Europe/Sofia"`) to a canonical file, decodes it once, and memoizes failures
//! permanently. Eager mode walks the whole tree and freezes a case-insensitive
//! snapshot; once installed, every lookup is a map probe and the filesystem is never
//! touched again. The on-disk database is assumed static for the process lifetime:
//! there is no invalidation, eviction or refresh.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tokio::fs;
use tokio::task::JoinSet;
use tracing::debug;

use crate::parse::Zoneinfo;
use crate::TzError;

// Classic zoneinfo locations, probed in order.
const ZONEINFO_ROOTS: [&str; 4] = [
    "/usr/share/zoneinfo",
    "/usr/share/lib/zoneinfo",
    "/usr/lib/locale/TZ",
    "/etc/zoneinfo",
];

/// Returns the first well-known zoneinfo root present on this system.
pub fn system_zoneinfo_root() -> Option<PathBuf> {
    ZONEINFO_ROOTS
        .iter()
        .map(PathBuf::from)
        .find(|root| root.is_dir())
}

enum NameEntry {
    Resolved(PathBuf),
    // Resolution or decoding failed once; it will not be retried.
    Negative,
}

/// Process-wide cache of decoded zones, rooted at a zoneinfo directory.
///
/// All methods take `&self`; the maps are behind locks so a cache can be shared across
/// threads (typically as an `Arc<ZoneCache>`). Concurrent first requests for the same
/// name are not deduplicated: each performs its own filesystem round trip and the last
/// one wins, with identical results.
pub struct ZoneCache {
    root: PathBuf,
    names: RwLock<HashMap<String, NameEntry>>,
    records: RwLock<HashMap<PathBuf, Arc<Zoneinfo>>>,
    snapshot: OnceLock<HashMap<String, Arc<Zoneinfo>>>,
}

impl ZoneCache {
    /// Creates a cache over the given zoneinfo root.
    pub fn new(root: impl Into<PathBuf>) -> ZoneCache {
        ZoneCache {
            root: root.into(),
            names: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            snapshot: OnceLock::new(),
        }
    }

    /// Creates a cache over the system zone database.
    pub fn system() -> Result<ZoneCache, TzError> {
        Ok(ZoneCache::new(
            system_zoneinfo_root().ok_or(TzError::RootNotFound)?,
        ))
    }

    /// Returns the decoded zone for a logical name.
    ///
    /// Before [`precache`](ZoneCache::precache) completes, the name is matched
    /// exact-case and a miss resolves, reads and decodes the file, memoizing the
    /// outcome either way. Afterwards, the frozen case-insensitive snapshot is probed
    /// exclusively: names absent from the walk miss permanently, even if a matching
    /// file appears on disk later.
    pub fn get(&self, name: &str) -> Result<Arc<Zoneinfo>, TzError> {
        if let Some(snapshot) = self.snapshot.get() {
            return probe_snapshot(snapshot, name);
        }
        if let Some(found) = self.probe_lazy(name) {
            return found;
        }
        let outcome = self.load(name);
        self.commit(name, outcome)
    }

    /// Async variant of [`get`](ZoneCache::get), performing filesystem work through
    /// `tokio::fs`.
    pub async fn get_async(&self, name: &str) -> Result<Arc<Zoneinfo>, TzError> {
        if let Some(snapshot) = self.snapshot.get() {
            return probe_snapshot(snapshot, name);
        }
        if let Some(found) = self.probe_lazy(name) {
            return found;
        }
        let outcome = self.load_async(name).await;
        self.commit(name, outcome)
    }

    /// Probes the completed snapshot only; never touches the filesystem.
    ///
    /// Returns `None` when the snapshot has not been built yet or the name is absent.
    pub fn get_precached(&self, name: &str) -> Option<Arc<Zoneinfo>> {
        self.snapshot.get()?.get(&name.to_ascii_lowercase()).cloned()
    }

    /// True once a precache walk has completed and the snapshot is frozen.
    pub fn is_precached(&self) -> bool {
        self.snapshot.get().is_some()
    }

    /// Walks the root recursively, decodes every readable zone file, and freezes the
    /// case-insensitive snapshot. Unreadable or unparseable entries are skipped; the
    /// snapshot is best-effort. Records already decoded lazily are reused, not decoded
    /// again. When `names` is given, the original-case relative path of every cached
    /// zone is appended to it. Returns the number of zones in the snapshot.
    pub fn precache(&self, names: Option<&mut Vec<String>>) -> usize {
        let mut entries = Vec::new();
        let mut walker = ZoneWalker::new(self.root.clone());
        while let Some(path) = walker.walk_sync() {
            let rel = match relative_name(&self.root, &path) {
                Some(rel) => rel,
                None => continue,
            };
            let canonical = match std::fs::canonicalize(&path) {
                Ok(canonical) => canonical,
                Err(_) => continue,
            };
            let bytes = match std::fs::read(&canonical) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            entries.push((rel, canonical, bytes));
        }
        self.install_snapshot(entries, names)
    }

    /// Async variant of [`precache`](ZoneCache::precache). The walk fans out one task
    /// per directory and joins them all before the snapshot is installed.
    pub async fn precache_async(&self, names: Option<&mut Vec<String>>) -> usize {
        let entries = collect_tree(self.root.clone()).await;
        self.install_snapshot(entries, names)
    }

    fn probe_lazy(&self, name: &str) -> Option<Result<Arc<Zoneinfo>, TzError>> {
        let names = lock(self.names.read());
        match names.get(name) {
            Some(NameEntry::Negative) => Some(Err(TzError::ZoneNotFound)),
            Some(NameEntry::Resolved(path)) => {
                lock(self.records.read()).get(path).cloned().map(Ok)
            }
            None => None,
        }
    }

    fn load(&self, name: &str) -> Result<(PathBuf, Arc<Zoneinfo>), TzError> {
        let canonical = std::fs::canonicalize(self.root.join(name))?;
        if let Some(record) = lock(self.records.read()).get(&canonical).cloned() {
            return Ok((canonical, record));
        }
        let bytes = std::fs::read(&canonical)?;
        Ok((canonical, Arc::new(Zoneinfo::parse(&bytes)?)))
    }

    async fn load_async(&self, name: &str) -> Result<(PathBuf, Arc<Zoneinfo>), TzError> {
        let canonical = fs::canonicalize(self.root.join(name)).await?;
        if let Some(record) = lock(self.records.read()).get(&canonical).cloned() {
            return Ok((canonical, record));
        }
        let bytes = fs::read(&canonical).await?;
        Ok((canonical, Arc::new(Zoneinfo::parse(&bytes)?)))
    }

    fn commit(
        &self,
        name: &str,
        outcome: Result<(PathBuf, Arc<Zoneinfo>), TzError>,
    ) -> Result<Arc<Zoneinfo>, TzError> {
        match outcome {
            Ok((canonical, record)) => {
                lock(self.records.write()).insert(canonical.clone(), record.clone());
                lock(self.names.write())
                    .insert(name.to_string(), NameEntry::Resolved(canonical));
                Ok(record)
            }
            Err(e) => {
                debug!(zone = name, error = %e, "memoizing failed zone resolution");
                lock(self.names.write()).insert(name.to_string(), NameEntry::Negative);
                Err(e)
            }
        }
    }

    fn install_snapshot(
        &self,
        entries: Vec<(String, PathBuf, Vec<u8>)>,
        mut names: Option<&mut Vec<String>>,
    ) -> usize {
        let mut map = HashMap::with_capacity(entries.len());
        for (rel, canonical, bytes) in entries {
            let known = lock(self.records.read()).get(&canonical).cloned();
            let record = match known {
                Some(record) => record,
                None => match Zoneinfo::parse(&bytes) {
                    Ok(record) => {
                        let record = Arc::new(record);
                        lock(self.records.write()).insert(canonical, record.clone());
                        record
                    }
                    Err(e) => {
                        debug!(zone = rel.as_str(), error = %e, "skipping unparseable zone file");
                        continue;
                    }
                },
            };
            if let Some(list) = names.as_mut() {
                list.push(rel.clone());
            }
            map.insert(rel.to_ascii_lowercase(), record);
        }
        let count = map.len();
        if self.snapshot.set(map).is_err() {
            debug!("zone snapshot already installed");
        } else {
            debug!(zones = count, "zone snapshot complete");
        }
        count
    }
}

fn probe_snapshot(
    snapshot: &HashMap<String, Arc<Zoneinfo>>,
    name: &str,
) -> Result<Arc<Zoneinfo>, TzError> {
    snapshot
        .get(&name.to_ascii_lowercase())
        .cloned()
        .ok_or(TzError::ZoneNotFound)
}

fn lock<T>(guard: Result<T, PoisonError<T>>) -> T {
    guard.unwrap_or_else(PoisonError::into_inner)
}

// Zone names always use '/' separators, whatever the host path separator.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel.iter().map(|c| c.to_string_lossy()).collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Depth-first walk over a zone tree, yielding regular files. Symlinks are followed
/// (zone databases alias heavily); unreadable entries are skipped.
struct ZoneWalker {
    stack: Vec<(PathBuf, Option<Metadata>)>,
    eat_root: bool,
}

impl ZoneWalker {
    fn new(root: PathBuf) -> ZoneWalker {
        ZoneWalker {
            stack: vec![(root, None)],
            eat_root: true,
        }
    }

    fn walk_sync(&mut self) -> Option<PathBuf> {
        if self.eat_root {
            self.eat_root = false;
            let (dir, _) = self.stack.pop()?;
            self.append_stack_sync(&dir);
        }
        while let Some((entry, metadata)) = self.stack.pop() {
            let metadata = match metadata {
                Some(metadata) => metadata,
                None => continue,
            };
            if metadata.is_dir() {
                self.append_stack_sync(&entry);
                continue;
            }
            if metadata.is_file() {
                return Some(entry);
            }
        }
        None
    }

    fn append_stack_sync(&mut self, dir: &Path) {
        let read = match std::fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                return;
            }
        };
        for entry in read.flatten() {
            let path = entry.path();
            if let Ok(metadata) = std::fs::metadata(&path) {
                self.stack.push((path, Some(metadata)));
            }
        }
    }
}

/// Concurrent tree walk: one task per directory, joined through a [`JoinSet`], each
/// returning its subdirectories and the bytes of its readable files.
async fn collect_tree(root: PathBuf) -> Vec<(String, PathBuf, Vec<u8>)> {
    let mut entries = Vec::new();
    let mut tasks = JoinSet::new();
    tasks.spawn(read_zone_dir(root, String::new()));
    while let Some(joined) = tasks.join_next().await {
        let (subdirs, files) = match joined {
            Ok(result) => result,
            Err(_) => continue,
        };
        for (dir, rel) in subdirs {
            tasks.spawn(read_zone_dir(dir, rel));
        }
        entries.extend(files);
    }
    entries
}

type DirListing = (Vec<(PathBuf, String)>, Vec<(String, PathBuf, Vec<u8>)>);

async fn read_zone_dir(dir: PathBuf, rel: String) -> DirListing {
    let mut subdirs = Vec::new();
    let mut files = Vec::new();
    let mut stream = match fs::read_dir(&dir).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return (subdirs, files);
        }
    };
    while let Ok(Some(entry)) = stream.next_entry().await {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_rel = if rel.is_empty() {
            name
        } else {
            format!("{}/{}", rel, name)
        };
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };
        if metadata.is_dir() {
            subdirs.push((path, child_rel));
        } else if metadata.is_file() {
            let canonical = match fs::canonicalize(&path).await {
                Ok(canonical) => canonical,
                Err(_) => continue,
            };
            if let Ok(bytes) = fs::read(&canonical).await {
                files.push((child_rel, canonical, bytes));
            }
        }
    }
    (subdirs, files)
}

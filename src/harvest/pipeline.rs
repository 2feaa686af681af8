//! Recursive extent traversal of directories and archives.
//!
//! This module provides the [`TraversalEngine`] that walks a directory tree
//! and folds per-file extents upward with:
//! - Async execution via `tokio` (archive unpacking on the blocking pool)
//! - A best-effort [`TimeBudget`] checked between siblings
//! - Structured logging via `tracing`
//! - Automatic cleanup of unpacked archives via RAII (`Drop` on `TempExtraction`)
//!
//! The partially built result tree lives in an explicit arena of
//! [`DirNode`]s driven by a node stack, so the time accounting and the
//! assembly of partial results are plain state instead of call-stack frames.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::harvest::aggregate::{merge_bbox, merge_tbox};
use crate::harvest::extract::FileExtractor;
use crate::harvest::traits::{ArchiveError, ExtentError, ExtractOptions};
use crate::model::{ExtentDetails, ExtentKind, ExtentRecord};
use crate::traits::ArchiveHandler;

/// Seed for the sibling shuffle applied under a time budget.
pub const SHUFFLE_SEED: u64 = 0;

// ============================================================================
// Scratch Directories
// ============================================================================

/// Scratch directory holding the unpacked contents of an archive.
///
/// # RAII Cleanup
///
/// The directory is removed when the value is dropped, on success and error
/// paths alike. Because of this, it intentionally does **not** implement
/// `Clone`. If you need to share the path, clone it as a `PathBuf`.
///
/// # Security
///
/// Use [`TempExtraction::safe_child`] to resolve archive entry names inside
/// the directory. It rejects any name that would escape the root via `..` or
/// absolute components.
#[derive(Debug)]
pub struct TempExtraction {
    dir: Option<TempDir>,
    root: PathBuf,

    /// Archive the contents were unpacked from
    pub source: PathBuf,
}

impl TempExtraction {
    /// Creates an empty scratch directory in the platform temp location.
    pub fn new(source: &Path) -> Result<Self, ArchiveError> {
        let dir = tempfile::Builder::new().prefix("geoextent-").tempdir()?;
        Ok(Self {
            root: dir.path().to_path_buf(),
            dir: Some(dir),
            source: source.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves `relative` against the scratch root.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::PathTraversal`] if `relative` contains `..` or
    /// is absolute.
    pub fn safe_child(&self, relative: &Path) -> Result<PathBuf, ArchiveError> {
        safe_join(&self.root, relative)
    }
}

impl Drop for TempExtraction {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(
                    path = %self.root.display(),
                    error = %e,
                    "Failed to remove scratch directory"
                );
            }
        }
    }
}

/// Joins `relative` onto `root`, rejecting anything that could leave `root`.
pub fn safe_join(root: &Path, relative: &Path) -> Result<PathBuf, ArchiveError> {
    for component in relative.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathTraversal {
                    attempted: relative.display().to_string(),
                });
            }
            _ => {}
        }
    }
    Ok(root.join(relative))
}

// ============================================================================
// Time Budget
// ============================================================================

/// Best-effort wall-clock ceiling for one traversal level.
///
/// Each directory node starts its own budget from the time left over at its
/// parent; the budget is only consulted between siblings, never while a single
/// file is being extracted.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    started: Instant,
    limit: Duration,
}

impl TimeBudget {
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, or `None` once the limit has been exceeded.
    pub fn remaining(&self) -> Option<Duration> {
        let elapsed = self.elapsed();
        if elapsed > self.limit {
            None
        } else {
            Some(self.limit - elapsed)
        }
    }
}

// ============================================================================
// Result Arena
// ============================================================================

type NodeId = usize;

/// One directory or archive in the partially built result tree.
#[derive(Debug)]
struct DirNode {
    /// Key of this node in its parent's details
    name: String,
    parent: Option<NodeId>,
    depth: usize,
    kind: ExtentKind,
    budget: Option<TimeBudget>,
    /// Children not visited yet, in processing order
    pending: VecDeque<PathBuf>,
    /// Records gathered so far
    children: ExtentDetails,
    timed_out: bool,
    /// Unpacked archive contents, dropped once the node is folded
    scratch: Option<TempExtraction>,
}

impl DirNode {
    /// Next child to visit and the budget it may use.
    ///
    /// Stops the level for good once this node's budget is exhausted.
    fn next_child(&mut self) -> Option<(PathBuf, Option<Duration>)> {
        if self.pending.is_empty() {
            return None;
        }

        let remaining = match &self.budget {
            Some(budget) => match budget.remaining() {
                Some(left) => Some(left),
                None => {
                    if self.depth == 0 {
                        warn!(
                            timeout_secs = budget.limit().as_secs_f64(),
                            skipped = self.pending.len(),
                            "Timeout reached, returning partial results"
                        );
                        self.timed_out = true;
                    } else {
                        debug!(node = %self.name, skipped = self.pending.len(), "Budget exhausted");
                    }
                    self.pending.clear();
                    return None;
                }
            },
            None => None,
        };

        self.pending.pop_front().map(|child| (child, remaining))
    }
}

#[derive(Debug, Default)]
struct ExtentTree {
    nodes: Vec<DirNode>,
}

impl ExtentTree {
    fn insert(&mut self, node: DirNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn node_mut(&mut self, id: NodeId) -> &mut DirNode {
        &mut self.nodes[id]
    }

    /// Folds a finished node into its record, releasing its scratch directory.
    fn fold(&mut self, id: NodeId, options: &ExtractOptions) -> (Option<NodeId>, String, ExtentRecord) {
        let node = &mut self.nodes[id];
        let children = std::mem::take(&mut node.children);
        drop(node.scratch.take());

        let mut record = ExtentRecord::new(node.kind);

        if options.bbox {
            match merge_bbox(&children) {
                Some(extent) => record.set_spatial(Some(extent)),
                None => warn!(
                    node = %node.name,
                    "The {:?} has no identifiable bbox - Coordinate reference system (CRS) may be missing",
                    node.kind
                ),
            }
        }

        if options.tbox {
            match merge_tbox(&children) {
                Some(tbox) => record.tbox = Some(tbox),
                None => warn!(node = %node.name, "The {:?} has no identifiable time extent", node.kind),
            }
        }

        if node.depth > 0 || options.details {
            record.children = Some(children);
        }
        if node.timed_out {
            record.timeout = node.budget.as_ref().map(TimeBudget::limit);
        }

        (node.parent, std::mem::take(&mut node.name), record)
    }
}

// ============================================================================
// Traversal Engine
// ============================================================================

/// Walks directories and archives, extracting every supported file.
///
/// # Example
///
/// ```ignore
/// use geoextent::harvest::ExtractOptions;
/// use std::time::Duration;
///
/// let engine = GeoExtent::new().traversal();
/// let record = engine
///     .walk(Path::new("data/"), &ExtractOptions::all(), Some(Duration::from_secs(30)))
///     .await?;
/// println!("{:?}", record.bbox);
/// ```
#[derive(Clone)]
pub struct TraversalEngine {
    extractor: FileExtractor,
    archives: Arc<dyn ArchiveHandler>,
}

impl TraversalEngine {
    pub fn new(extractor: FileExtractor, archives: Arc<dyn ArchiveHandler>) -> Self {
        Self {
            extractor,
            archives,
        }
    }

    /// Extracts the merged extent of a directory or archive.
    ///
    /// Children are visited in lexical order, or in a fixed-seed shuffle when
    /// a `budget` is given. Once the budget runs out the remaining siblings
    /// are skipped; only the top-level record carries the `timeout`.
    /// A zero `budget` means no budget at all.
    ///
    /// # Errors
    ///
    /// Returns [`ExtentError`] if no extent was requested, or if `path`
    /// itself cannot be listed or unpacked. Failures below the top level are
    /// logged and the offending child is skipped.
    #[instrument(skip(self, path, options), fields(path = %path.display()))]
    pub async fn walk(
        &self,
        path: &Path,
        options: &ExtractOptions,
        budget: Option<Duration>,
    ) -> Result<ExtentRecord, ExtentError> {
        options.ensure_requested()?;
        info!(
            bbox = options.bbox,
            tbox = options.tbox,
            "Extracting from directory"
        );

        let budget = budget.filter(|limit| !limit.is_zero());
        let mut tree = ExtentTree::default();
        let root = self.open(path, String::new(), None, 0, budget).await?;
        let mut stack = vec![tree.insert(root)];

        loop {
            let Some(&current) = stack.last() else {
                return Err(ExtentError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::other("traversal ended without a result"),
                });
            };

            let Some((child, remaining)) = tree.node_mut(current).next_child() else {
                stack.pop();
                let (parent, name, record) = tree.fold(current, options);
                match parent {
                    Some(parent) => {
                        tree.node_mut(parent).children.insert(name, record);
                        continue;
                    }
                    None => return Ok(record),
                }
            };

            let name = entry_name(&child);
            let depth = tree.node_mut(current).depth + 1;

            if self.is_container(&child).await {
                match self.open(&child, name, Some(current), depth, remaining).await {
                    Ok(node) => stack.push(tree.insert(node)),
                    Err(e) => warn!(path = %child.display(), error = %e, "Skipping entry"),
                }
            } else if let Some(record) = self.extractor.extract(&child, options).await {
                tree.node_mut(current).children.insert(name, record);
            }
        }
    }

    /// Whether `path` is walked as a node rather than extracted as a file.
    async fn is_container(&self, path: &Path) -> bool {
        let archives = Arc::clone(&self.archives);
        let entry = path.to_path_buf();
        tokio::task::spawn_blocking(move || archives.is_archive(&entry) || entry.is_dir())
            .await
            .unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Task join error inspecting entry");
                false
            })
    }

    /// Opens a directory or archive node, unpacking archives first.
    async fn open(
        &self,
        path: &Path,
        name: String,
        parent: Option<NodeId>,
        depth: usize,
        budget: Option<Duration>,
    ) -> Result<DirNode, ExtentError> {
        let budget = budget.map(TimeBudget::start);

        let archives = Arc::clone(&self.archives);
        let source = path.to_path_buf();
        let scratch = tokio::task::spawn_blocking(move || {
            if archives.is_archive(&source) {
                info!(path = %source.display(), "Inspecting archive");
                archives.unpack(&source).map(Some)
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|e| ArchiveError::Corrupted(format!("Task join error: {}", e)))
        .and_then(|r| r)
        .map_err(|source| ExtentError::Archive {
            path: path.to_path_buf(),
            source,
        })?;

        let kind = match &scratch {
            Some(unpacked) => {
                debug!(scratch = %unpacked.path().display(), "Archive unpacked");
                ExtentKind::Archive
            }
            None => ExtentKind::Folder,
        };

        let dir = scratch
            .as_ref()
            .map(|s| s.path().to_path_buf())
            .unwrap_or_else(|| path.to_path_buf());
        let shuffle = budget.is_some();
        let listed = dir.clone();
        let pending = tokio::task::spawn_blocking(move || list_children(&listed, shuffle))
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r)
            .map_err(|source| ExtentError::Io {
                path: dir.clone(),
                source,
            })?;
        debug!(path = %dir.display(), entries = pending.len(), depth, "Listed directory");

        Ok(DirNode {
            name,
            parent,
            depth,
            kind,
            budget,
            pending,
            children: ExtentDetails::new(),
            timed_out: false,
            scratch,
        })
    }
}

/// Lists the immediate children of `dir`, lexically sorted or, under a
/// budget, shuffled with [`SHUFFLE_SEED`].
fn list_children(dir: &Path, shuffle: bool) -> std::io::Result<VecDeque<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    if shuffle {
        let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
        entries.shuffle(&mut rng);
    }

    Ok(entries.into())
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// Tests
// ============================================================================

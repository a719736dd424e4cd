use std::collections::HashSet;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::mem;
use std::path::Path;
use std::path::PathBuf;
use std::slice;
use std::sync::atomic;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bit_vec::BitVec;
use log::debug;
use log::info;
use log::warn;
use parking_lot::Mutex;
use parking_lot::RwLock;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::analyzis::Analyzer;
use crate::config::IndexConfig;
use crate::doc::DocId;
use crate::doc::Document;
use crate::error::Error;
use crate::error::Result;
use crate::inverted::analyze_document;
use crate::inverted::InvertedIndexBuilder;
use crate::manifest::Manifest;
use crate::manifest::SegmentEntry;
use crate::manifest::MANIFEST;
use crate::merge::find_merges;
use crate::merge::DocMap;
use crate::merge::merge_segments;
use crate::reader::IndexReader;
use crate::search::Query;
use crate::search::SearchContext;
use crate::search::TermQuery;
use crate::seg::segment_name_of;
use crate::seg::SegmentAddress;
use crate::seg::SegmentInfo;
use crate::seg::SegmentMeta;
use crate::seg::SegmentReader;
use crate::util::sync_dir;

const WRITE_LOCK: &str = "write.lock";

/// Keeps a segment's files alive for as long as a writer or reader uses it.
pub struct SegRef {
    address: SegmentAddress,
    delete_on_drop: AtomicBool,
}

impl SegRef {
    pub(crate) fn new(address: SegmentAddress) -> SegRef {
        SegRef {
            address,
            delete_on_drop: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &SegmentAddress {
        &self.address
    }
}

impl Drop for SegRef {
    fn drop(&mut self) {
        if self.delete_on_drop.load(atomic::Ordering::SeqCst) {
            match self.address.remove_files() {
                Ok(()) => debug!("Removed segment {}", self.address.name),
                Err(e) => warn!("Could not remove segment {}: {}", self.address.name, e),
            }
        }
    }
}

#[derive(Clone)]
struct ActiveSegment {
    seg_ref: Arc<SegRef>,
    info: SegmentInfo,
}

impl ActiveSegment {
    fn new(info: SegmentInfo) -> ActiveSegment {
        ActiveSegment {
            seg_ref: Arc::new(SegRef::new(info.address.clone())),
            info,
        }
    }
}

/// A merge written to disk but not yet published.
struct MergedSegment {
    address: SegmentAddress,
    output: Option<(SegmentMeta, DocMap)>,
}

struct IndexState {
    docs_to_index: Vec<(DocId, Document)>,
    pending_deletes: Vec<Box<dyn Query>>,
    segments: Vec<ActiveSegment>,
    waiting_merge: HashSet<String>,
    next_doc_id: DocId,
    generation: u64,
}

impl IndexState {
    fn manifest(&self, segments: &[ActiveSegment]) -> Manifest {
        Manifest {
            generation: self.generation + 1,
            next_doc_id: self.next_doc_id,
            segments: segments
                .iter()
                .map(|s| SegmentEntry::from_info(&s.info))
                .collect(),
        }
    }

    fn swap(&mut self, segments: Vec<ActiveSegment>) {
        let kept: HashSet<&str> = segments.iter().map(|s| s.info.address.name.as_str()).collect();
        for old in &self.segments {
            if !kept.contains(old.info.address.name.as_str()) {
                old.seg_ref
                    .delete_on_drop
                    .store(true, atomic::Ordering::SeqCst);
            }
        }
        self.segments = segments;
        self.generation += 1;
    }
}

struct IndexOptions {
    config: IndexConfig,
    auto_commit: bool,
    auto_merge: bool,
    indexing_threads: usize,
}

pub struct IndexBuilder {
    options: IndexOptions,
}

impl IndexBuilder {
    pub fn new() -> IndexBuilder {
        IndexBuilder {
            options: IndexOptions {
                config: IndexConfig::default(),
                auto_commit: true,
                auto_merge: true,
                indexing_threads: 0,
            },
        }
    }

    pub fn config(mut self, config: IndexConfig) -> IndexBuilder {
        self.options.config = config;
        self
    }

    pub fn auto_commit(mut self, val: bool) -> IndexBuilder {
        self.options.auto_commit = val;
        self
    }

    pub fn auto_merge(mut self, val: bool) -> IndexBuilder {
        self.options.auto_merge = val;
        self
    }

    /// Threads used to analyze commits and write merges. 0 picks one per
    /// CPU.
    pub fn indexing_threads(mut self, threads: usize) -> IndexBuilder {
        self.options.indexing_threads = threads;
        self
    }

    /// Creates a new, empty index. Fails if one already exists at `path`.
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<Index> {
        Index::open_with_options(path.as_ref(), self.options, OpenMode::Create)
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Index> {
        Index::open_with_options(path.as_ref(), self.options, OpenMode::Open)
    }

    pub fn open_or_create<P: AsRef<Path>>(self, path: P) -> Result<Index> {
        Index::open_with_options(path.as_ref(), self.options, OpenMode::OpenOrCreate)
    }
}

impl Default for IndexBuilder {
    fn default() -> IndexBuilder {
        IndexBuilder::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    Create,
    Open,
    OpenOrCreate,
}

/// Removes the lock file when the writer goes away.
struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    fn acquire(dir: &Path) -> Result<WriteLock> {
        let path = dir.join(WRITE_LOCK);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id())
                    .map_err(|e| Error::storage(format!("writing {:?}", path), e))?;
                Ok(WriteLock { path })
            }
            Err(ref e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::LockHeld(dir.to_path_buf()))
            }
            Err(e) => Err(Error::storage(format!("creating {:?}", path), e)),
        }
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Could not release {:?}: {}", self.path, e);
        }
    }
}

/// The single writer of an index directory.
pub struct Index {
    options: IndexOptions,
    path: PathBuf,
    analyzer: Box<dyn Analyzer>,
    state: RwLock<IndexState>,
    commit_lock: Mutex<()>,
    rayon_pool: rayon::ThreadPool,
    closed: bool,
    _lock: WriteLock,
}

impl Index {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Index> {
        IndexBuilder::new().open(path)
    }

    pub fn create<P: AsRef<Path>>(path: P) -> Result<Index> {
        IndexBuilder::new().create(path)
    }

    fn open_with_options(path: &Path, options: IndexOptions, mode: OpenMode) -> Result<Index> {
        options.config.validate()?;
        let analyzer = options.config.analysis.build()?;
        if mode == OpenMode::Open && !Manifest::exists(path) {
            return Err(Error::Configuration(format!("no index found at {:?}", path)));
        }
        if mode != OpenMode::Open {
            fs::create_dir_all(path)
                .map_err(|e| Error::storage(format!("creating {:?}", path), e))?;
        }
        let lock = WriteLock::acquire(path)?;
        let manifest = match (mode, Manifest::exists(path)) {
            (OpenMode::Create, true) => {
                return Err(Error::Configuration(format!(
                    "an index already exists at {:?}",
                    path
                )))
            }
            (OpenMode::Open, _) | (OpenMode::OpenOrCreate, true) => Manifest::read(path)?,
            (_, false) => {
                let manifest = Manifest::default();
                manifest.write(path)?;
                manifest
            }
        };
        remove_orphans(path, &manifest)?;
        let segments: Vec<ActiveSegment> = manifest
            .segment_infos(path)?
            .into_iter()
            .map(ActiveSegment::new)
            .collect();
        info!(
            "Opened index at {:?}, generation {} with {} segments",
            path,
            manifest.generation,
            segments.len()
        );
        let rayon_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.indexing_threads)
            .thread_name(|i| format!("counterdex-indexing-{}", i))
            .build()?;
        Ok(Index {
            options,
            path: path.to_path_buf(),
            analyzer,
            state: RwLock::new(IndexState {
                docs_to_index: Vec::new(),
                pending_deletes: Vec::new(),
                segments,
                waiting_merge: HashSet::new(),
                next_doc_id: manifest.next_doc_id,
                generation: manifest.generation,
            }),
            commit_lock: Mutex::new(()),
            rayon_pool,
            closed: false,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &IndexConfig {
        &self.options.config
    }

    pub fn analyzer(&self) -> &dyn Analyzer {
        &*self.analyzer
    }

    pub fn buffered_docs(&self) -> usize {
        self.state.read().docs_to_index.len()
    }

    /// Committed segments, tombstones included.
    pub fn segment_infos(&self) -> Vec<SegmentInfo> {
        self.state
            .read()
            .segments
            .iter()
            .map(|s| s.info.clone())
            .collect()
    }

    /// Buffers `doc` for the next commit. Invalid fields are dropped and
    /// logged; the rest of the document is kept.
    pub fn add_doc(&self, mut doc: Document) -> Result<DocId> {
        doc.retain_valid();
        let mut state = self.state.write();
        let doc_id = state.next_doc_id;
        state.next_doc_id += 1;
        state.docs_to_index.push((doc_id, doc));
        if self.options.auto_commit
            && state.docs_to_index.len() >= self.options.config.max_buffered_docs
        {
            drop(state);
            self.commit()?;
        }
        Ok(doc_id)
    }

    /// Deletes every document matching `query`. Buffered documents are
    /// dropped right away, committed ones at the next commit.
    pub fn delete(&self, query: &dyn Query) -> Result<()> {
        let mut state = self.state.write();
        state.docs_to_index.retain(|(_, doc)| !query.matches(doc));
        state.pending_deletes.push(query.clone_box());
        Ok(())
    }

    pub fn delete_term(&self, field: &str, value: &str) -> Result<()> {
        self.delete(&TermQuery::new(field, value, self.analyzer.clone()))
    }

    /// Writes buffered documents as a new segment and applies pending
    /// deletes. Returns the name of the new segment, if any. On failure the
    /// buffer is restored and the previous commit stays in effect.
    pub fn commit(&self) -> Result<Option<String>> {
        let committed = {
            let _guard = self.commit_lock.lock();
            let (docs, deletes) = {
                let mut state = self.state.write();
                (
                    mem::replace(&mut state.docs_to_index, Vec::new()),
                    mem::replace(&mut state.pending_deletes, Vec::new()),
                )
            };
            if docs.is_empty() && deletes.is_empty() {
                return Ok(None);
            }
            match self.do_commit(&docs, &deletes) {
                Ok(committed) => committed,
                Err(e) => {
                    warn!("Commit failed, keeping {} buffered docs: {}", docs.len(), e);
                    let mut state = self.state.write();
                    let added_since = mem::replace(&mut state.docs_to_index, docs);
                    state.docs_to_index.extend(added_since);
                    let deleted_since = mem::replace(&mut state.pending_deletes, deletes);
                    state.pending_deletes.extend(deleted_since);
                    return Err(e);
                }
            }
        };
        if self.options.auto_merge {
            self.merge()?;
        }
        Ok(committed)
    }

    fn do_commit(
        &self,
        docs: &[(DocId, Document)],
        deletes: &[Box<dyn Query>],
    ) -> Result<Option<String>> {
        let new_segment = if docs.is_empty() {
            None
        } else {
            let address = SegmentAddress::new_random(&self.path);
            let analyzer = &*self.analyzer;
            let analyzed: Vec<_> = self.rayon_pool.install(|| {
                docs.par_iter()
                    .map(|(_, doc)| analyze_document(analyzer, doc))
                    .collect()
            });
            let mut builder = InvertedIndexBuilder::new(self.analyzer.clone());
            for ((doc_id, _), doc) in docs.iter().zip(analyzed) {
                builder.add_analyzed(*doc_id, doc);
            }
            match builder.write(&address) {
                Ok(meta) => Some(SegmentInfo {
                    deleted: BitVec::from_elem(meta.doc_count as usize, false),
                    address,
                    meta,
                }),
                Err(e) => {
                    remove_partial(&address);
                    return Err(e);
                }
            }
        };

        let current: Vec<ActiveSegment> = self.state.read().segments.clone();
        let mut segments = Vec::with_capacity(current.len() + 1);
        let mut deleted_docs = 0;
        for mut segment in current {
            if !deletes.is_empty() {
                match apply_deletes(&mut segment.info, deletes) {
                    Ok(deleted) => deleted_docs += deleted,
                    Err(e) => {
                        if let Some(ref info) = new_segment {
                            remove_partial(&info.address);
                        }
                        return Err(e);
                    }
                }
            }
            if segment.info.live_count() > 0 {
                segments.push(segment);
            }
        }
        let name = new_segment.as_ref().map(|info| info.address.name.clone());
        if let Some(info) = new_segment {
            segments.push(ActiveSegment::new(info));
        }

        let mut state = self.state.write();
        if let Err(e) = state.manifest(&segments).write(&self.path) {
            drop(state);
            if let Some(ref name) = name {
                remove_partial(&SegmentAddress {
                    path: self.path.clone(),
                    name: name.clone(),
                });
            }
            return Err(e);
        }
        state.swap(segments);
        info!(
            "Committed {} docs and {} deletes, generation {}",
            docs.len(),
            deleted_docs,
            state.generation
        );
        Ok(name)
    }

    /// Runs the merges the merge policy asks for.
    pub fn merge(&self) -> Result<()> {
        self.merge_with_cancel(&AtomicBool::new(false))
    }

    /// Like `merge`, but stops before starting another set of segments once
    /// `cancel` is set. A merge that has started always finishes.
    pub fn merge_with_cancel(&self, cancel: &AtomicBool) -> Result<()> {
        let infos = self.mergeable_segments();
        let spec = find_merges(infos, &self.options.config.merge);
        if spec.to_merge.is_empty() {
            return Ok(());
        }
        for segments in &spec.to_merge {
            self.mark_merging(segments);
        }
        // The pool only writes merged segments. Publishing takes the commit
        // lock and happens here, so no pool thread ever waits on a commit.
        let written: Vec<(&Vec<SegmentInfo>, Result<MergedSegment>)> =
            self.rayon_pool.install(|| {
                spec.to_merge
                    .par_iter()
                    .filter(|segments| {
                        let cancelled = cancel.load(atomic::Ordering::SeqCst);
                        if cancelled {
                            debug!("Merge of {} segments cancelled", segments.len());
                        }
                        !cancelled
                    })
                    .map(|segments| (segments, self.write_merged(segments)))
                    .collect()
            });
        let mut result = Ok(());
        for (segments, merged) in written {
            let published = merged.and_then(|merged| self.publish_merge(segments, merged));
            if let Err(e) = published {
                warn!("Merge of {} segments failed: {}", segments.len(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        for segments in &spec.to_merge {
            self.unmark_merging(segments);
        }
        result
    }

    /// Merges every segment into one, also rewriting a single segment with
    /// deletes.
    pub fn force_merge(&self) -> Result<()> {
        let infos = self.mergeable_segments();
        let needed = infos.len() > 1 || infos.iter().any(|i| i.deleted_count() > 0);
        if !needed {
            return Ok(());
        }
        self.mark_merging(&infos);
        let result = self
            .rayon_pool
            .install(|| self.write_merged(&infos))
            .and_then(|merged| self.publish_merge(&infos, merged));
        self.unmark_merging(&infos);
        result
    }

    fn mergeable_segments(&self) -> Vec<SegmentInfo> {
        let state = self.state.read();
        state
            .segments
            .iter()
            .filter(|s| !state.waiting_merge.contains(&s.info.address.name))
            .map(|s| s.info.clone())
            .collect()
    }

    fn mark_merging(&self, segments: &[SegmentInfo]) {
        let mut state = self.state.write();
        for seg in segments {
            state.waiting_merge.insert(seg.address.name.clone());
        }
    }

    fn unmark_merging(&self, segments: &[SegmentInfo]) {
        let mut state = self.state.write();
        for seg in segments {
            state.waiting_merge.remove(&seg.address.name);
        }
    }

    /// Writes the merge of `sources` as a new segment, not yet in the
    /// manifest.
    fn write_merged(&self, sources: &[SegmentInfo]) -> Result<MergedSegment> {
        info!(
            "Merging {} segments with {} live docs",
            sources.len(),
            sources.iter().map(|i| i.live_count()).sum::<u64>()
        );
        let readers = sources
            .iter()
            .cloned()
            .map(SegmentReader::open)
            .collect::<Result<Vec<_>>>()?;
        let address = SegmentAddress::new_random(&self.path);
        match merge_segments(&readers, &address) {
            Ok(output) => Ok(MergedSegment { address, output }),
            Err(e) => {
                remove_partial(&address);
                Err(e)
            }
        }
    }

    /// Replaces `sources` by the merged segment in the manifest.
    fn publish_merge(&self, sources: &[SegmentInfo], merged: MergedSegment) -> Result<()> {
        let MergedSegment { address, output } = merged;
        let _guard = self.commit_lock.lock();
        let current: Vec<ActiveSegment> = self.state.read().segments.clone();
        let mut segments: Vec<ActiveSegment> = current
            .iter()
            .filter(|s| !sources.iter().any(|source| source.address == s.info.address))
            .cloned()
            .collect();
        if let Some((meta, doc_map)) = output {
            let mut info = SegmentInfo {
                deleted: BitVec::from_elem(meta.doc_count as usize, false),
                address: address.clone(),
                meta,
            };
            // Deletes committed while the merge ran.
            for (i, source) in sources.iter().enumerate() {
                let now = current.iter().find(|s| s.info.address == source.address);
                for ordinal in 0..source.doc_count() as u32 {
                    let deleted_now = now.map_or(true, |s| s.info.is_deleted(ordinal));
                    if deleted_now && !source.is_deleted(ordinal) {
                        if let Some(new_ordinal) = doc_map.get(i, ordinal) {
                            info.deleted.set(new_ordinal as usize, true);
                        }
                    }
                }
            }
            if info.live_count() > 0 {
                segments.push(ActiveSegment::new(info));
            } else {
                remove_partial(&address);
            }
        }

        let mut state = self.state.write();
        if let Err(e) = state.manifest(&segments).write(&self.path) {
            drop(state);
            drop(segments);
            remove_partial(&address);
            return Err(e);
        }
        state.swap(segments);
        info!(
            "Merged {} segments, index now has {} segments",
            sources.len(),
            state.segments.len()
        );
        Ok(())
    }

    /// A snapshot of everything committed so far.
    pub fn open_reader(&self) -> Result<IndexReader> {
        let (segments, generation) = {
            let state = self.state.read();
            let segments: Vec<(Arc<SegRef>, SegmentInfo)> = state
                .segments
                .iter()
                .map(|s| (s.seg_ref.clone(), s.info.clone()))
                .collect();
            (segments, state.generation)
        };
        IndexReader::from_segments(segments, self.analyzer.clone(), generation)
    }

    /// Commits, optimizes if configured to, and releases the write lock.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        self.commit()?;
        if self.options.config.optimize_on_close {
            self.force_merge()?;
        }
        info!("Closed index at {:?}", self.path);
        Ok(())
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.shutdown() {
                warn!("Could not close index at {:?}: {}", self.path, e);
            }
        }
    }
}

/// Marks the documents of `info` matching any of `deletes`. Returns how
/// many were newly deleted.
fn apply_deletes(info: &mut SegmentInfo, deletes: &[Box<dyn Query>]) -> Result<u64> {
    let reader = SegmentReader::open(info.clone())?;
    let readers = slice::from_ref(&reader);
    let ctx = SearchContext::new(readers);
    let mut deleted = 0;
    for query in deletes {
        if let Some(mut iter) = query.segment_matches(&reader, &ctx)? {
            while let Some(ordinal) = iter.next_doc()? {
                if !info.is_deleted(ordinal) {
                    info.deleted.set(ordinal as usize, true);
                    deleted += 1;
                }
            }
        }
    }
    if deleted > 0 {
        debug!("Deleted {} docs in segment {}", deleted, info.address.name);
    }
    Ok(deleted)
}

fn remove_partial(address: &SegmentAddress) {
    if let Err(e) = address.remove_files() {
        warn!("Could not remove segment {}: {}", address.name, e);
    }
}

/// Removes files of segments the manifest does not list, left behind by a
/// crash or a failed commit or merge.
fn remove_orphans(path: &Path, manifest: &Manifest) -> Result<()> {
    let tmp = format!("{}.tmp", MANIFEST);
    let mut removed = 0;
    for entry in WalkDir::new(path).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => Error::storage(format!("listing {:?}", path), io),
            None => Error::Configuration(format!("could not list {:?}", path)),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        let orphan = file_name == tmp
            || segment_name_of(&file_name).map_or(false, |name| !manifest.is_listed(name));
        if orphan {
            warn!("Removing orphan file {:?}", entry.path());
            fs::remove_file(entry.path())
                .map_err(|e| Error::storage(format!("removing {:?}", entry.path()), e))?;
            removed += 1;
        }
    }
    if removed > 0 {
        sync_dir(path).map_err(|e| Error::storage(format!("syncing {:?}", path), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Field;
    use crate::search::ValueQuery;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn builder() -> IndexBuilder {
        IndexBuilder::new().auto_commit(false).auto_merge(false)
    }

    fn doc(name: &str) -> Document {
        Document::new()
            .add(Field::exact("_type", "counter"))
            .add(Field::analyzed("name", name))
    }

    #[test]
    fn commit_without_changes_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let index = builder().create(dir.path()).unwrap();
        assert_eq!(None, index.commit().unwrap());
        assert_eq!(0, index.open_reader().unwrap().generation());
    }

    #[test]
    fn ids_are_assigned_in_order_and_persisted() {
        let dir = TempDir::new().unwrap();
        {
            let index = builder().create(dir.path()).unwrap();
            assert_eq!(0, index.add_doc(doc("a")).unwrap());
            assert_eq!(1, index.add_doc(doc("b")).unwrap());
            index.close().unwrap();
        }
        let index = builder().open(dir.path()).unwrap();
        assert_eq!(2, index.add_doc(doc("c")).unwrap());
    }

    #[test]
    fn auto_commit_flushes_full_buffer() {
        let dir = TempDir::new().unwrap();
        let mut config = IndexConfig::default();
        config.max_buffered_docs = 2;
        let index = builder()
            .config(config)
            .auto_commit(true)
            .create(dir.path())
            .unwrap();
        index.add_doc(doc("a")).unwrap();
        assert_eq!(1, index.buffered_docs());
        index.add_doc(doc("b")).unwrap();
        assert_eq!(0, index.buffered_docs());
        assert_eq!(1, index.segment_infos().len());
    }

    #[test]
    fn deleting_buffered_docs_drops_them() {
        let dir = TempDir::new().unwrap();
        let index = builder().create(dir.path()).unwrap();
        index.add_doc(doc("Available Bytes")).unwrap();
        index.add_doc(doc("Cache Faults")).unwrap();
        index.delete_term("name", "bytes").unwrap();
        assert_eq!(1, index.buffered_docs());
        index.commit().unwrap();
        assert_eq!(1, index.open_reader().unwrap().num_docs());
    }

    #[test]
    fn fully_deleted_segments_are_dropped() {
        let dir = TempDir::new().unwrap();
        let index = builder().create(dir.path()).unwrap();
        index.add_doc(doc("gone")).unwrap();
        let name = index.commit().unwrap().unwrap();
        index.delete(&ValueQuery::new("_type", "counter")).unwrap();
        index.commit().unwrap();
        assert!(index.segment_infos().is_empty());
        assert!(!dir.path().join(format!("{}.seg", name)).exists());
    }

    #[test]
    fn commit_during_merge_on_single_thread_pool_finishes() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(builder().indexing_threads(1).create(dir.path()).unwrap());
        for seg in 0..10 {
            for i in 0..1000 {
                index
                    .add_doc(doc(&format!("counter {} of segment {}", i, seg)))
                    .unwrap();
            }
            index.commit().unwrap();
        }

        let (tx, rx) = mpsc::channel();
        let merging = {
            let index = index.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                index.force_merge().unwrap();
                tx.send("merge").unwrap();
            })
        };
        let committing = {
            let index = index.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                index.add_doc(doc("late")).unwrap();
                index.commit().unwrap();
                tx.send("commit").unwrap();
            })
        };
        let mut done = Vec::new();
        for _ in 0..2 {
            done.push(rx.recv_timeout(Duration::from_secs(60)).unwrap());
        }
        done.sort();
        assert_eq!(vec!["commit", "merge"], done);
        merging.join().unwrap();
        committing.join().unwrap();
        assert_eq!(10_001, index.open_reader().unwrap().num_docs());
    }

    #[test]
    fn failed_deletes_remove_the_new_segment() {
        let dir = TempDir::new().unwrap();
        let index = builder().create(dir.path()).unwrap();
        index.add_doc(doc("first")).unwrap();
        let first = index.commit().unwrap().unwrap();
        fs::remove_file(dir.path().join(format!("{}.tid", first))).unwrap();

        index.add_doc(doc("second")).unwrap();
        index.delete_term("name", "first").unwrap();
        assert!(index.commit().is_err());
        assert_eq!(1, index.buffered_docs());
        let seg_files = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".seg"))
            .collect::<Vec<_>>();
        assert_eq!(vec![format!("{}.seg", first)], seg_files);
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let _index = builder().create(dir.path()).unwrap();
        match builder().open(dir.path()) {
            Err(Error::LockHeld(_)) => (),
            Err(e) => panic!("Unexpected error {}", e),
            Ok(_) => panic!("Opened a locked index"),
        }
    }

    #[test]
    fn create_refuses_existing_index() {
        let dir = TempDir::new().unwrap();
        builder().create(dir.path()).unwrap().close().unwrap();
        assert!(builder().create(dir.path()).is_err());
        assert!(builder().open_or_create(dir.path()).is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = IndexConfig::default();
        config.max_buffered_docs = 0;
        match builder().config(config).create(dir.path()) {
            Err(Error::Configuration(_)) => (),
            other => panic!("Unexpected result {:?}", other.map(|_| ())),
        }
    }
}

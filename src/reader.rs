use std::io;
use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::analyzis::Analyzer;
use crate::config::IndexConfig;
use crate::doc::DocId;
use crate::doc::StoredDoc;
use crate::error::Error;
use crate::error::Result;
use crate::index::SegRef;
use crate::manifest::Manifest;
use crate::query_parser::QueryParser;
use crate::search::search;
use crate::search::AllDocsCollector;
use crate::search::CountCollector;
use crate::search::Query;
use crate::search::SearchContext;
use crate::search::TopDocsCollector;
use crate::seg::SegmentInfo;
use crate::seg::SegmentReader;

/// Segments may be merged away between reading the manifest and opening
/// them; opening starts over this many times before giving up.
const OPEN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    pub stored: StoredDoc,
}

/// A point in time view of an index. Later commits and merges are not
/// visible, and the segments it reads stay on disk until it is dropped.
pub struct IndexReader {
    _segment_refs: Vec<Arc<SegRef>>,
    readers: Vec<SegmentReader>,
    analyzer: Box<dyn Analyzer>,
    generation: u64,
}

impl IndexReader {
    pub(crate) fn from_segments(
        segments: Vec<(Arc<SegRef>, SegmentInfo)>,
        analyzer: Box<dyn Analyzer>,
        generation: u64,
    ) -> Result<IndexReader> {
        let mut segment_refs = Vec::with_capacity(segments.len());
        let mut readers = Vec::with_capacity(segments.len());
        for (seg_ref, info) in segments {
            readers.push(SegmentReader::open(info)?);
            segment_refs.push(seg_ref);
        }
        Ok(IndexReader {
            _segment_refs: segment_refs,
            readers,
            analyzer,
            generation,
        })
    }

    /// Opens the last committed state of the index at `path` without taking
    /// the write lock.
    pub fn open(path: &Path, config: &IndexConfig) -> Result<IndexReader> {
        config.validate()?;
        let analyzer = config.analysis.build()?;
        let mut attempt = 1;
        loop {
            match IndexReader::try_open(path, analyzer.clone()) {
                Err(ref e) if is_missing_file(e) && attempt < OPEN_ATTEMPTS => {
                    debug!("Segment disappeared while opening {:?}, retrying: {}", path, e);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn try_open(path: &Path, analyzer: Box<dyn Analyzer>) -> Result<IndexReader> {
        let manifest = Manifest::read(path)?;
        let segments = manifest
            .segment_infos(path)?
            .into_iter()
            .map(|info| {
                (
                    Arc::new(SegRef::new(info.address.clone())),
                    info,
                )
            })
            .collect();
        IndexReader::from_segments(segments, analyzer, manifest.generation)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn segment_readers(&self) -> &[SegmentReader] {
        &self.readers
    }

    pub fn segment_infos(&self) -> Vec<&SegmentInfo> {
        self.readers.iter().map(|r| r.info()).collect()
    }

    /// Live documents, deleted ones excluded.
    pub fn num_docs(&self) -> u64 {
        self.readers.iter().map(|r| r.info().live_count()).sum()
    }

    /// Documents containing an already analyzed term, summed over segments.
    pub fn doc_freq(&self, field: &str, term: &str) -> Result<u64> {
        SearchContext::new(&self.readers).doc_freq(field, term)
    }

    /// The best `top_k` matches, highest score first. Equal scores are
    /// ordered by ascending id.
    pub fn search(&self, query: &dyn Query, top_k: usize) -> Result<Vec<(DocId, f32)>> {
        let mut collector = TopDocsCollector::new(top_k);
        search(&self.readers, query, &mut collector)?;
        Ok(collector
            .into_docs()
            .into_iter()
            .map(|d| (d.doc_id, d.score))
            .collect())
    }

    /// Parses `query` and returns the best matches with their stored fields.
    pub fn search_str(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let parsed = QueryParser::new(self.analyzer.clone()).parse(query)?;
        let mut hits = Vec::new();
        for (doc_id, score) in self.search(&*parsed, top_k)? {
            let stored = self.doc(doc_id)?.unwrap_or_default();
            hits.push(SearchHit {
                doc_id,
                score,
                stored,
            });
        }
        Ok(hits)
    }

    pub fn count(&self, query: &dyn Query) -> Result<u64> {
        let mut collector = CountCollector::new();
        search(&self.readers, query, &mut collector)?;
        Ok(collector.total_count())
    }

    /// Stored fields of every match, in segment order.
    pub fn collect_docs(&self, query: &dyn Query) -> Result<Vec<(DocId, StoredDoc)>> {
        let mut collector = AllDocsCollector::new();
        search(&self.readers, query, &mut collector)?;
        Ok(collector.into_docs())
    }

    /// The stored fields of a live document.
    pub fn doc(&self, doc_id: DocId) -> Result<Option<StoredDoc>> {
        for reader in &self.readers {
            if let Some(ordinal) = reader.ordinal_of(doc_id) {
                if reader.is_deleted(ordinal) {
                    return Ok(None);
                }
                return reader.stored().doc(ordinal).map(Some);
            }
        }
        Ok(None)
    }

    pub fn analyzer(&self) -> &dyn Analyzer {
        &*self.analyzer
    }
}

fn is_missing_file(e: &Error) -> bool {
    match e {
        Error::Storage { source, .. } => source.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

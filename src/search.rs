use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::BinaryHeap;
use std::fmt::Debug;

use crate::analyzis::Analyzer;
use crate::doc::DocId;
use crate::doc::Document;
use crate::doc::IndexingMode;
use crate::doc::StoredDoc;
use crate::doc_iter::AllDocIter;
use crate::doc_iter::AllDocsDocIter;
use crate::doc_iter::AnyDocIter;
use crate::doc_iter::BoostDocIter;
use crate::doc_iter::DocIter;
use crate::doc_iter::ReqOptDocIter;
use crate::doc_iter::TermDocIter;
use crate::error::Result;
use crate::inverted::FieldInfo;
use crate::seg::SegmentReader;
use crate::stored::StoredFieldsCursor;

/// Runs `query` over every segment of a snapshot, skipping deleted docs.
pub fn search<'r>(
    readers: &'r [SegmentReader],
    query: &dyn Query,
    collector: &mut dyn Collector<'r>,
) -> Result<()> {
    let ctx = SearchContext::new(readers);
    for reader in readers {
        collector.set_reader(reader)?;
        if let Some(mut iter) = query.segment_matches(reader, &ctx)? {
            while let Some(ordinal) = iter.next_doc()? {
                if !reader.is_deleted(ordinal) {
                    collector.collect(ordinal, iter.score())?;
                }
            }
        }
    }
    Ok(())
}

/// Statistics over a whole snapshot, so scores do not depend on how
/// documents are spread over segments.
pub struct SearchContext<'r> {
    readers: &'r [SegmentReader],
    num_docs: u64,
    fields: BTreeMap<String, FieldInfo>,
}

impl<'r> SearchContext<'r> {
    pub fn new(readers: &'r [SegmentReader]) -> SearchContext<'r> {
        let mut fields: BTreeMap<String, FieldInfo> = BTreeMap::new();
        for reader in readers {
            for (name, info) in reader.fields() {
                let merged = fields.entry(name.clone()).or_default();
                merged.analyzed |= info.analyzed;
                merged.exact |= info.exact;
            }
        }
        SearchContext {
            readers,
            num_docs: readers.iter().map(|r| r.info().live_count()).sum(),
            fields,
        }
    }

    pub fn num_docs(&self) -> u64 {
        self.num_docs
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldInfo> {
        &self.fields
    }

    pub fn doc_freq(&self, field: &str, term: &str) -> Result<u64> {
        let mut doc_freq = 0;
        for reader in self.readers {
            doc_freq += reader.doc_freq(field, term)?;
        }
        Ok(doc_freq)
    }

    pub fn idf(&self, field: &str, term: &str) -> Result<f32> {
        let doc_freq = self.doc_freq(field, term)?;
        let num_docs = self.num_docs.max(1) as f32;
        Ok(1.0 + (num_docs / (doc_freq as f32 + 1.0)).ln())
    }
}

pub trait Query: QueryClone + Debug + Send + Sync {
    fn segment_matches<'a>(
        &self,
        reader: &'a SegmentReader,
        ctx: &SearchContext,
    ) -> Result<Option<Box<dyn DocIter + 'a>>>;

    /// Whether a document that is not yet indexed would match.
    fn matches(&self, doc: &Document) -> bool;
}

pub trait QueryClone {
    fn clone_box(&self) -> Box<dyn Query>;
}

impl<T> QueryClone for T
where
    T: 'static + Query + Clone,
{
    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Query> {
    fn clone(&self) -> Box<dyn Query> {
        self.clone_box()
    }
}

fn term_iter<'a>(
    reader: &'a SegmentReader,
    ctx: &SearchContext,
    field: &str,
    term: &str,
    boost: f32,
) -> Result<Option<Box<dyn DocIter + 'a>>> {
    match reader.postings(field, term)? {
        Some(postings) => {
            let idf = ctx.idf(field, term)?;
            Ok(Some(Box::new(TermDocIter::new(postings, idf * idf * boost))))
        }
        None => Ok(None),
    }
}

fn all<'a>(mut sub: Vec<Box<dyn DocIter + 'a>>) -> Box<dyn DocIter + 'a> {
    if sub.len() == 1 {
        sub.remove(0)
    } else {
        Box::new(AllDocIter::new(sub))
    }
}

fn any<'a>(mut sub: Vec<Box<dyn DocIter + 'a>>) -> Box<dyn DocIter + 'a> {
    if sub.len() == 1 {
        sub.remove(0)
    } else {
        Box::new(AnyDocIter::new(sub))
    }
}

/// Text matched against one field, or against every indexed field with the
/// field scores summed. Exact fields compare the raw text; analyzed fields
/// require every analyzed term.
#[derive(Clone, Debug)]
pub struct TermQuery {
    field: Option<String>,
    text: String,
    terms: Vec<String>,
    analyzer: Box<dyn Analyzer>,
    boost: f32,
}

impl TermQuery {
    pub fn new<F, T>(field: F, text: T, analyzer: Box<dyn Analyzer>) -> TermQuery
    where
        F: Into<String>,
        T: Into<String>,
    {
        TermQuery::build(Some(field.into()), text.into(), analyzer)
    }

    pub fn any_field<T: Into<String>>(text: T, analyzer: Box<dyn Analyzer>) -> TermQuery {
        TermQuery::build(None, text.into(), analyzer)
    }

    fn build(field: Option<String>, text: String, analyzer: Box<dyn Analyzer>) -> TermQuery {
        let terms = analyzer
            .analyze(&text)
            .map(|t| t.text.into_owned())
            .collect();
        TermQuery {
            field,
            text,
            terms,
            analyzer,
            boost: 1.0,
        }
    }

    pub fn boost(mut self, boost: f32) -> TermQuery {
        self.boost = boost;
        self
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    fn field_matches<'a>(
        &self,
        reader: &'a SegmentReader,
        ctx: &SearchContext,
        field: &str,
        info: &FieldInfo,
    ) -> Result<Vec<Box<dyn DocIter + 'a>>> {
        let mut matches = Vec::new();
        if info.exact {
            if let Some(iter) = term_iter(reader, ctx, field, &self.text, self.boost)? {
                matches.push(iter);
            }
        }
        if info.analyzed && !self.terms.is_empty() {
            let mut sub = Vec::with_capacity(self.terms.len());
            for term in &self.terms {
                match term_iter(reader, ctx, field, term, self.boost)? {
                    Some(iter) => sub.push(iter),
                    None => return Ok(matches),
                }
            }
            matches.push(all(sub));
        }
        Ok(matches)
    }
}

impl Query for TermQuery {
    fn segment_matches<'a>(
        &self,
        reader: &'a SegmentReader,
        ctx: &SearchContext,
    ) -> Result<Option<Box<dyn DocIter + 'a>>> {
        let mut sub = Vec::new();
        for (field, info) in ctx.fields() {
            if self.field.as_ref().map_or(true, |f| f == field) {
                sub.extend(self.field_matches(reader, ctx, field, info)?);
            }
        }
        if sub.is_empty() {
            Ok(None)
        } else {
            Ok(Some(any(sub)))
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        doc.fields()
            .iter()
            .filter(|f| self.field.as_ref().map_or(true, |name| *name == f.name))
            .any(|f| match f.mode {
                IndexingMode::ExactMatch => f.value == self.text,
                IndexingMode::Analyzed => {
                    let tokens: Vec<String> = self
                        .analyzer
                        .analyze(&f.value)
                        .map(|t| t.text.into_owned())
                        .collect();
                    !self.terms.is_empty() && self.terms.iter().all(|t| tokens.contains(t))
                }
                IndexingMode::NotIndexed => false,
            })
    }
}

/// A raw value matched against a single term of `field`, without analysis.
#[derive(Debug, Clone)]
pub struct ValueQuery {
    field: String,
    value: String,
    boost: f32,
}

impl ValueQuery {
    pub fn new<F: Into<String>, V: Into<String>>(field: F, value: V) -> ValueQuery {
        ValueQuery {
            field: field.into(),
            value: value.into(),
            boost: 1.0,
        }
    }

    pub fn boost(mut self, boost: f32) -> ValueQuery {
        self.boost = boost;
        self
    }
}

impl Query for ValueQuery {
    fn segment_matches<'a>(
        &self,
        reader: &'a SegmentReader,
        ctx: &SearchContext,
    ) -> Result<Option<Box<dyn DocIter + 'a>>> {
        term_iter(reader, ctx, &self.field, &self.value, self.boost)
    }

    fn matches(&self, doc: &Document) -> bool {
        doc.fields().iter().any(|f| {
            f.name == self.field && f.mode == IndexingMode::ExactMatch && f.value == self.value
        })
    }
}

#[derive(Clone, Debug)]
pub struct MatchAllDocsQuery;

impl MatchAllDocsQuery {
    pub fn new() -> MatchAllDocsQuery {
        MatchAllDocsQuery {}
    }
}

impl Default for MatchAllDocsQuery {
    fn default() -> MatchAllDocsQuery {
        MatchAllDocsQuery::new()
    }
}

impl Query for MatchAllDocsQuery {
    fn segment_matches<'a>(
        &self,
        reader: &'a SegmentReader,
        _ctx: &SearchContext,
    ) -> Result<Option<Box<dyn DocIter + 'a>>> {
        Ok(Some(Box::new(AllDocsDocIter::new(reader.doc_count(), 1.0))))
    }

    fn matches(&self, _doc: &Document) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    Must,
    Should,
}

/// Every `Must` clause has to match. Without any, at least one `Should`
/// clause has to. Matching clause scores are summed.
#[derive(Debug, Clone)]
pub struct BooleanQuery {
    clauses: Vec<(Occur, Box<dyn Query>)>,
    boost: f32,
}

impl BooleanQuery {
    pub fn new() -> BooleanQuery {
        BooleanQuery {
            clauses: Vec::new(),
            boost: 1.0,
        }
    }

    pub fn add(mut self, occur: Occur, query: Box<dyn Query>) -> BooleanQuery {
        self.clauses.push((occur, query));
        self
    }

    pub fn must(self, query: Box<dyn Query>) -> BooleanQuery {
        self.add(Occur::Must, query)
    }

    pub fn should(self, query: Box<dyn Query>) -> BooleanQuery {
        self.add(Occur::Should, query)
    }

    pub fn boost(mut self, boost: f32) -> BooleanQuery {
        self.boost = boost;
        self
    }

    pub fn clauses(&self) -> &[(Occur, Box<dyn Query>)] {
        &self.clauses
    }
}

impl Default for BooleanQuery {
    fn default() -> BooleanQuery {
        BooleanQuery::new()
    }
}

impl Query for BooleanQuery {
    fn segment_matches<'a>(
        &self,
        reader: &'a SegmentReader,
        ctx: &SearchContext,
    ) -> Result<Option<Box<dyn DocIter + 'a>>> {
        let mut required = Vec::new();
        let mut optional = Vec::new();
        for (occur, query) in &self.clauses {
            match (occur, query.segment_matches(reader, ctx)?) {
                (Occur::Must, Some(iter)) => required.push(iter),
                (Occur::Must, None) => return Ok(None),
                (Occur::Should, Some(iter)) => optional.push(iter),
                (Occur::Should, None) => (),
            }
        }
        let iter = match (required.is_empty(), optional.is_empty()) {
            (true, true) => return Ok(None),
            (true, false) => any(optional),
            (false, true) => all(required),
            (false, false) => Box::new(ReqOptDocIter::new(all(required), any(optional))),
        };
        if (self.boost - 1.0).abs() > f32::EPSILON {
            Ok(Some(Box::new(BoostDocIter::new(iter, self.boost))))
        } else {
            Ok(Some(iter))
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        let mut has_must = false;
        let mut any_should = false;
        for (occur, query) in &self.clauses {
            match occur {
                Occur::Must => {
                    has_must = true;
                    if !query.matches(doc) {
                        return false;
                    }
                }
                Occur::Should => any_should = any_should || query.matches(doc),
            }
        }
        has_must || any_should
    }
}

pub trait Collector<'r> {
    fn set_reader(&mut self, reader: &'r SegmentReader) -> Result<()>;
    fn collect(&mut self, ordinal: u32, score: f32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f32,
}

impl Eq for ScoredDoc {}

/// Better hits order greater: higher score first, then lower doc id.
impl Ord for ScoredDoc {
    fn cmp(&self, other: &ScoredDoc) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.doc_id.cmp(&self.doc_id))
    }
}

impl PartialOrd for ScoredDoc {
    fn partial_cmp(&self, other: &ScoredDoc) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct TopDocsCollector<'r> {
    size: usize,
    heap: BinaryHeap<Reverse<ScoredDoc>>,
    reader: Option<&'r SegmentReader>,
}

impl<'r> TopDocsCollector<'r> {
    pub fn new(size: usize) -> TopDocsCollector<'r> {
        TopDocsCollector {
            size,
            heap: BinaryHeap::with_capacity(size.min(1024) + 1),
            reader: None,
        }
    }

    /// The collected hits, best first.
    pub fn into_docs(self) -> Vec<ScoredDoc> {
        let mut docs: Vec<ScoredDoc> = self.heap.into_iter().map(|Reverse(d)| d).collect();
        docs.sort_by(|a, b| b.cmp(a));
        docs
    }
}

impl<'r> Collector<'r> for TopDocsCollector<'r> {
    fn set_reader(&mut self, reader: &'r SegmentReader) -> Result<()> {
        self.reader = Some(reader);
        Ok(())
    }

    fn collect(&mut self, ordinal: u32, score: f32) -> Result<()> {
        let reader = match self.reader {
            Some(reader) => reader,
            None => return Ok(()),
        };
        let doc = ScoredDoc {
            doc_id: reader.global_id(ordinal),
            score,
        };
        if self.heap.len() < self.size {
            self.heap.push(Reverse(doc));
        } else if let Some(Reverse(worst)) = self.heap.peek() {
            if doc > *worst {
                self.heap.pop();
                self.heap.push(Reverse(doc));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CountCollector {
    count: u64,
}

impl CountCollector {
    pub fn new() -> CountCollector {
        CountCollector { count: 0 }
    }

    pub fn total_count(&self) -> u64 {
        self.count
    }
}

impl<'r> Collector<'r> for CountCollector {
    fn set_reader(&mut self, _reader: &'r SegmentReader) -> Result<()> {
        Ok(())
    }

    fn collect(&mut self, _ordinal: u32, _score: f32) -> Result<()> {
        self.count += 1;
        Ok(())
    }
}

/// Collects the stored fields of every match, in index order.
#[derive(Default)]
pub struct AllDocsCollector<'r> {
    docs: Vec<(DocId, StoredDoc)>,
    reader: Option<&'r SegmentReader>,
    doc_cursor: Option<StoredFieldsCursor<'r>>,
}

impl<'r> AllDocsCollector<'r> {
    pub fn new() -> AllDocsCollector<'r> {
        AllDocsCollector {
            docs: Vec::new(),
            reader: None,
            doc_cursor: None,
        }
    }

    pub fn docs(&self) -> &[(DocId, StoredDoc)] {
        &self.docs
    }

    pub fn into_docs(self) -> Vec<(DocId, StoredDoc)> {
        self.docs
    }
}

impl<'r> Collector<'r> for AllDocsCollector<'r> {
    fn set_reader(&mut self, reader: &'r SegmentReader) -> Result<()> {
        self.reader = Some(reader);
        self.doc_cursor = Some(reader.stored().cursor());
        Ok(())
    }

    fn collect(&mut self, ordinal: u32, _score: f32) -> Result<()> {
        if let (Some(reader), Some(cursor)) = (self.reader, &mut self.doc_cursor) {
            let doc = cursor.read_doc(ordinal)?;
            self.docs.push((reader.global_id(ordinal), doc));
        }
        Ok(())
    }
}

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::str;

use serde::Deserialize;
use serde::Serialize;

use crate::analyzis::Analyzer;
use crate::analyzis::NoopAnalyzer;
use crate::doc::DocId;
use crate::doc::Document;
use crate::doc::IndexingMode;
use crate::doc::StoredDoc;
use crate::error::Result;
use crate::seg::write_seg;
use crate::seg::SegmentAddress;
use crate::seg::SegmentMeta;

/// Separates field name from term text in a term key. Field names may not
/// contain it, so keys sort by field first and term second.
pub const TERM_KEY_SEPARATOR: u8 = 0;

pub fn term_key(field: &str, term: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(field.len() + term.len() + 1);
    key.extend_from_slice(field.as_bytes());
    key.push(TERM_KEY_SEPARATOR);
    key.extend_from_slice(term.as_bytes());
    key
}

pub fn split_term_key(key: &[u8]) -> Option<(&str, &str)> {
    let sep = key.iter().position(|b| *b == TERM_KEY_SEPARATOR)?;
    let field = str::from_utf8(&key[..sep]).ok()?;
    let term = str::from_utf8(&key[sep + 1..]).ok()?;
    Some((field, term))
}

/// How a field name was indexed within a segment. The same name may be used
/// both verbatim and analyzed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub analyzed: bool,
    pub exact: bool,
}

impl FieldInfo {
    fn record(&mut self, mode: IndexingMode) {
        match mode {
            IndexingMode::Analyzed => self.analyzed = true,
            IndexingMode::ExactMatch => self.exact = true,
            IndexingMode::NotIndexed => (),
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.analyzed || self.exact
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub ordinal: u32,
    pub freq: u32,
    pub boost: f32,
    pub positions: Vec<u32>,
}

/// The terms and stored values of a single document, ready to be added to a
/// builder. Producing these is pure, so it can run in parallel.
#[derive(Debug, Clone)]
pub struct AnalyzedDoc {
    terms: BTreeMap<Vec<u8>, (u32, f32, Vec<u32>)>,
    fields: Vec<(String, IndexingMode)>,
    stored: StoredDoc,
}

struct TermAcc {
    freq: u32,
    positions: Vec<u32>,
    omit_freqs: bool,
}

pub fn analyze_document(analyzer: &dyn Analyzer, doc: &Document) -> AnalyzedDoc {
    let exact = NoopAnalyzer;
    let mut accs: BTreeMap<Vec<u8>, TermAcc> = BTreeMap::new();
    let mut boosts: HashMap<&str, f32> = HashMap::new();
    let mut next_position: HashMap<&str, u32> = HashMap::new();
    let mut fields = Vec::new();
    for field in doc.fields() {
        let tokens = match field.mode {
            IndexingMode::Analyzed => analyzer.analyze(&field.value),
            IndexingMode::ExactMatch => exact.analyze(&field.value),
            IndexingMode::NotIndexed => continue,
        };
        fields.push((field.name.clone(), field.mode));
        *boosts.entry(field.name.as_str()).or_insert(1.0) *= field.scoring_boost();
        let base = *next_position.get(field.name.as_str()).unwrap_or(&0);
        let mut last = None;
        for token in tokens {
            let position = base + token.position as u32;
            last = Some(position);
            let acc = accs
                .entry(term_key(&field.name, &token.text))
                .or_insert_with(|| TermAcc {
                    freq: 0,
                    positions: Vec::new(),
                    omit_freqs: false,
                });
            acc.freq += 1;
            acc.positions.push(position);
            acc.omit_freqs |= !field.freqs_and_positions;
        }
        if let Some(last) = last {
            next_position.insert(field.name.as_str(), last + 1);
        }
    }
    let terms = accs
        .into_iter()
        .map(|(key, acc)| {
            let boost = split_term_key(&key)
                .and_then(|(field, _)| boosts.get(field).cloned())
                .unwrap_or(1.0);
            let value = if acc.omit_freqs {
                (1, boost, Vec::new())
            } else {
                (acc.freq, boost, acc.positions)
            };
            (key, value)
        })
        .collect();
    AnalyzedDoc {
        terms,
        fields,
        stored: doc.stored(),
    }
}

/// Accumulates postings for one commit batch in memory. Documents get
/// segment-local ordinals in the order they are added.
pub struct InvertedIndexBuilder {
    analyzer: Box<dyn Analyzer>,
    terms: BTreeMap<Vec<u8>, Vec<Posting>>,
    fields: BTreeMap<String, FieldInfo>,
    stored: Vec<StoredDoc>,
    ids: Vec<DocId>,
}

impl InvertedIndexBuilder {
    pub fn new(analyzer: Box<dyn Analyzer>) -> InvertedIndexBuilder {
        InvertedIndexBuilder {
            analyzer,
            terms: BTreeMap::new(),
            fields: BTreeMap::new(),
            stored: Vec::new(),
            ids: Vec::new(),
        }
    }

    pub fn add_document(&mut self, id: DocId, doc: &Document) -> u32 {
        let analyzed = analyze_document(&*self.analyzer, doc);
        self.add_analyzed(id, analyzed)
    }

    pub fn add_analyzed(&mut self, id: DocId, doc: AnalyzedDoc) -> u32 {
        let ordinal = self.ids.len() as u32;
        for (key, (freq, boost, positions)) in doc.terms {
            let posting = Posting {
                ordinal,
                freq,
                boost,
                positions,
            };
            match self.terms.entry(key) {
                btree_map::Entry::Vacant(vacant) => {
                    vacant.insert(vec![posting]);
                }
                btree_map::Entry::Occupied(mut occupied) => {
                    occupied.get_mut().push(posting);
                }
            }
        }
        for (name, mode) in doc.fields {
            self.fields.entry(name).or_default().record(mode);
        }
        self.stored.push(doc.stored);
        self.ids.push(id);
        ordinal
    }

    pub fn doc_count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn term_freq(&self, field: &str, term: &str, ordinal: u32) -> Option<u32> {
        self.terms
            .get(&term_key(field, term))?
            .iter()
            .find(|p| p.ordinal == ordinal)
            .map(|p| p.freq)
    }

    /// Term keys in `(field, term)` order with their postings.
    pub fn terms(&self) -> impl Iterator<Item = (&[u8], &[Posting])> {
        self.terms.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldInfo> {
        &self.fields
    }

    pub fn stored_docs(&self) -> &[StoredDoc] {
        &self.stored
    }

    pub fn ids(&self) -> &[DocId] {
        &self.ids
    }

    /// Flushes the batch as a segment at `address`.
    pub fn write(&self, address: &SegmentAddress) -> Result<SegmentMeta> {
        write_seg(address, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzis::StandardAnalyzer;
    use crate::doc::Field;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn builder() -> InvertedIndexBuilder {
        InvertedIndexBuilder::new(Box::new(StandardAnalyzer::new()))
    }

    #[test]
    fn records_positions_for_repeated_terms() {
        let mut builder = builder();
        let doc = Document::new().add(Field::analyzed("help", "memory free memory"));
        let ordinal = builder.add_document(7, &doc);
        let postings: Vec<&Posting> = builder
            .terms()
            .filter(|(k, _)| *k == term_key("help", "memori").as_slice())
            .flat_map(|(_, p)| p.iter())
            .collect();
        assert_eq!(1, postings.len());
        assert_eq!(2, postings[0].freq);
        assert_eq!(vec![0, 2], postings[0].positions);
        assert_eq!(Some(2), builder.term_freq("help", "memori", ordinal));
        assert_eq!(&[7], builder.ids());
    }

    #[test]
    fn exact_fields_are_single_raw_terms() {
        let mut builder = builder();
        let doc = Document::new().add(Field::exact("type", "NumberOfItems64"));
        let ordinal = builder.add_document(0, &doc);
        assert_eq!(Some(1), builder.term_freq("type", "NumberOfItems64", ordinal));
        assert_eq!(None, builder.term_freq("type", "numberofitems64", ordinal));
        assert!(builder.fields()["type"].exact);
    }

    #[test]
    fn not_indexed_fields_are_only_stored() {
        let mut builder = builder();
        let doc = Document::new().add(Field::stored_only("machine", "localhost"));
        builder.add_document(0, &doc);
        assert_eq!(0, builder.terms().count());
        assert_eq!(Some("localhost"), builder.stored_docs()[0].get("machine"));
    }

    #[test]
    fn boosts_are_recorded_per_posting() {
        let mut builder = builder();
        let doc = Document::new()
            .add(Field::analyzed("name", "bytes").boost(2.0))
            .add(Field::exact("_type", "counter").boost(3.0));
        builder.add_document(0, &doc);
        for (key, postings) in builder.terms() {
            let expected = match split_term_key(key) {
                Some(("name", _)) => 2.0,
                _ => 1.0,
            };
            assert_eq!(expected, postings[0].boost);
        }
    }

    #[test]
    fn omitted_freqs_record_single_occurrence() {
        let mut builder = builder();
        let doc = Document::new()
            .add(Field::analyzed("type", "timer timer").omit_freqs_and_positions());
        let ordinal = builder.add_document(0, &doc);
        assert_eq!(Some(1), builder.term_freq("type", "timer", ordinal));
    }

    #[test]
    fn term_keys_split_back() {
        assert_eq!(
            Some(("name", "avail")),
            split_term_key(&term_key("name", "avail"))
        );
    }

    proptest! {
        #[test]
        fn term_freq_counts_occurrences(ref words in vec(prop_oneof!["alpha", "beta", "gamma"], 1..30)) {
            let mut builder = InvertedIndexBuilder::new(
                Box::new(StandardAnalyzer::builder().stemmer(crate::analyzis::NoopStemmer).build()));
            let value = words.join(" ");
            let ordinal = builder.add_document(0, &Document::new().add(Field::analyzed("f", value)));
            for word in &["alpha", "beta", "gamma"] {
                let expected = words.iter().filter(|w| w == word).count() as u32;
                let actual = builder.term_freq("f", word, ordinal).unwrap_or(0);
                prop_assert_eq!(expected, actual);
            }
        }
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;

use proptest::collection::vec;
use proptest::collection::SizeRange;
use proptest::prelude::BoxedStrategy;
use proptest::prop_oneof;
use proptest::strategy::Just;
use proptest::strategy::Strategy;
use tempfile::TempDir;

use counterdex::search::Query;
use counterdex::DocId;
use counterdex::Document;
use counterdex::Index;
use counterdex::IndexBuilder;

pub mod query_gen;

#[derive(Debug, Clone)]
pub enum IndexOperation {
    Index(Vec<Document>),
    Commit,
    ReOpen,
    Merge,
    ForceMerge,
    Delete(Box<dyn Query>),
}

fn builder() -> IndexBuilder {
    IndexBuilder::new().auto_commit(false).auto_merge(false)
}

/// Runs `ops` against a real index and an in memory model of it, then checks
/// that every query finds the same documents in both.
pub fn index_and_assert_search_matches(ops: &[IndexOperation], queries: &[Box<dyn Query>]) {
    let index_dir = TempDir::new().unwrap();
    {
        let index = builder()
            .create(index_dir.path())
            .expect("Could not create index.");
        let mut index_test_state = IndexTestState {
            index_path: PathBuf::from(index_dir.path()),
            index: Some(index),
            in_mem_docs: BTreeMap::new(),
            in_mem_seg_docs: Vec::new(),
            deletes_to_apply: Vec::new(),
        };
        index_test_state.apply_ops(ops);
        index_test_state.check_queries_match_same(queries);
    }
    index_dir.close().unwrap();
}

struct IndexTestState {
    index_path: PathBuf,
    index: Option<Index>,
    in_mem_docs: BTreeMap<DocId, Document>,
    in_mem_seg_docs: Vec<(DocId, Document)>,
    deletes_to_apply: Vec<Box<dyn Query>>,
}

impl IndexTestState {
    fn index(&self) -> &Index {
        self.index.as_ref().expect("Index is open.")
    }

    fn apply_ops(&mut self, ops: &[IndexOperation]) {
        for op in ops {
            match op {
                IndexOperation::Index(docs) => {
                    for doc in docs {
                        let doc_id = self.index().add_doc(doc.clone()).unwrap();
                        let mut doc = doc.clone();
                        doc.retain_valid();
                        self.in_mem_seg_docs.push((doc_id, doc));
                    }
                }
                IndexOperation::Commit => {
                    self.index().commit().expect("Could not commit segment.");
                    self.commit_in_mem();
                }
                IndexOperation::Merge => {
                    self.index().merge().expect("Could not merge segments.");
                }
                IndexOperation::ForceMerge => {
                    self.index().force_merge().expect("Could not merge segments.");
                }
                IndexOperation::Delete(query) => {
                    self.index().delete(&**query).expect("Could not delete docs.");
                    self.in_mem_seg_docs.retain(|(_, doc)| !query.matches(doc));
                    self.deletes_to_apply.push(query.clone());
                }
                IndexOperation::ReOpen => {
                    self.index().commit().expect("Could not commit segment.");
                    self.commit_in_mem();
                    if let Some(index) = self.index.take() {
                        index.close().expect("Could not close index.");
                    }
                    let index = builder()
                        .open(&self.index_path)
                        .expect("Could not re-open index.");
                    self.index = Some(index);
                }
            }
        }
    }

    fn commit_in_mem(&mut self) {
        let deletes = std::mem::replace(&mut self.deletes_to_apply, Vec::new());
        self.in_mem_docs
            .retain(|_, doc| !deletes.iter().any(|query| query.matches(doc)));
        self.in_mem_docs.extend(self.in_mem_seg_docs.drain(..));
    }

    fn check_queries_match_same(&self, queries: &[Box<dyn Query>]) {
        let reader = self.index().open_reader().unwrap();
        assert_eq!(self.in_mem_docs.len() as u64, reader.num_docs());
        for query in queries {
            let expected: BTreeMap<DocId, &Document> = self
                .in_mem_docs
                .iter()
                .filter(|(_, doc)| query.matches(doc))
                .map(|(doc_id, doc)| (*doc_id, doc))
                .collect();

            let collected = reader.collect_docs(&**query).unwrap();
            let actual: BTreeMap<DocId, _> = collected.into_iter().collect();
            assert_eq!(
                expected.keys().collect::<Vec<_>>(),
                actual.keys().collect::<Vec<_>>(),
                "Wrong docs for query {:?}",
                query
            );
            for (doc_id, doc) in &expected {
                assert_eq!(doc.stored(), actual[doc_id], "Stored fields of doc {}", doc_id);
            }

            assert_eq!(expected.len() as u64, reader.count(&**query).unwrap());

            let top = reader.search(&**query, expected.len() + 1).unwrap();
            assert_eq!(expected.len(), top.len());
            for pair in top.windows(2) {
                let ((id_a, score_a), (id_b, score_b)) = (pair[0], pair[1]);
                assert!(
                    score_a > score_b || (score_a == score_b && id_a < id_b),
                    "Hits out of order for query {:?}: {:?}",
                    query,
                    top
                );
            }
        }
    }
}

pub fn do_gen(
    num_ops: usize,
    num_docs: impl Into<SizeRange>,
    doc_strategy: BoxedStrategy<Document>,
    num_queries: impl Into<SizeRange>,
    query_strategy: BoxedStrategy<Box<dyn Query>>,
) -> BoxedStrategy<(Vec<IndexOperation>, Vec<Box<dyn Query>>)> {
    let ops = vec(
        arb_index_op(num_docs.into(), doc_strategy, query_strategy.clone()),
        0..num_ops,
    );
    (ops, vec(query_strategy, num_queries.into())).boxed()
}

fn arb_index_op(
    num_docs: SizeRange,
    docs: BoxedStrategy<Document>,
    queries: BoxedStrategy<Box<dyn Query>>,
) -> BoxedStrategy<IndexOperation> {
    prop_oneof![
        4 => vec(docs, num_docs).prop_map(IndexOperation::Index),
        2 => Just(IndexOperation::Commit),
        1 => Just(IndexOperation::Merge),
        1 => Just(IndexOperation::ForceMerge),
        1 => Just(IndexOperation::ReOpen),
        1 => queries.prop_map(IndexOperation::Delete),
    ]
    .boxed()
}

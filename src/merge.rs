use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::BinaryHeap;
use std::collections::VecDeque;

use fst::map::OpBuilder;
use fst::Streamer;
use log::debug;

use crate::config::MergePolicy;
use crate::doc::DocId;
use crate::error::Result;
use crate::inverted::FieldInfo;
use crate::inverted::Posting;
use crate::seg::write_ids;
use crate::seg::write_meta;
use crate::seg::PostingsWriter;
use crate::seg::SegmentAddress;
use crate::seg::SegmentInfo;
use crate::seg::SegmentMeta;
use crate::seg::SegmentReader;
use crate::stored::StoredFieldsWriter;

pub struct MergeSpec {
    pub to_merge: Vec<Vec<SegmentInfo>>,
}

/// Groups segments into size tiers, largest first, and returns the tiers
/// that have grown too large.
pub fn find_merges(mut segments: Vec<SegmentInfo>, policy: &MergePolicy) -> MergeSpec {
    segments.sort_by(|a, b| a.live_count().cmp(&b.live_count()).reverse());
    let mut queue = VecDeque::from(segments);
    let mut to_merge = Vec::new();
    while let Some(head) = queue.pop_front() {
        let threshold = head.live_count() as f64 * policy.size_ratio;
        let mut tier = vec![head];
        while queue
            .front()
            .map_or(false, |info| info.live_count() as f64 > threshold)
        {
            if let Some(info) = queue.pop_front() {
                tier.push(info);
            }
        }
        if tier.len() > policy.max_segments_per_tier {
            to_merge.push(tier);
        }
    }
    MergeSpec { to_merge }
}

/// Where each document of the merged sources ended up.
#[derive(Debug, Clone)]
pub struct DocMap {
    maps: Vec<Vec<Option<u32>>>,
    doc_count: u32,
}

impl DocMap {
    /// The new ordinal of `ordinal` in source `source`, or `None` if it
    /// was dropped as deleted.
    pub fn get(&self, source: usize, ordinal: u32) -> Option<u32> {
        self.maps
            .get(source)
            .and_then(|m| m.get(ordinal as usize))
            .and_then(|o| *o)
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }
}

/// Orders the live documents of all sources by global id. Ids within a
/// source are already ascending.
fn merge_order(sources: &[SegmentReader]) -> (Vec<(usize, u32)>, DocMap) {
    let mut maps: Vec<Vec<Option<u32>>> = sources
        .iter()
        .map(|s| vec![None; s.doc_count() as usize])
        .collect();
    let mut heap: BinaryHeap<Reverse<(DocId, usize, u32)>> = BinaryHeap::new();
    let next_live = |source: &SegmentReader, from: u32| -> Option<u32> {
        (from..source.doc_count()).find(|o| !source.is_deleted(*o))
    };
    for (i, source) in sources.iter().enumerate() {
        if let Some(ordinal) = next_live(source, 0) {
            heap.push(Reverse((source.global_id(ordinal), i, ordinal)));
        }
    }
    let mut order = Vec::new();
    while let Some(Reverse((_, i, ordinal))) = heap.pop() {
        maps[i][ordinal as usize] = Some(order.len() as u32);
        order.push((i, ordinal));
        if let Some(next) = next_live(&sources[i], ordinal + 1) {
            heap.push(Reverse((sources[i].global_id(next), i, next)));
        }
    }
    let doc_count = order.len() as u32;
    (order, DocMap { maps, doc_count })
}

fn merge_terms(
    sources: &[SegmentReader],
    doc_map: &DocMap,
    address: &SegmentAddress,
) -> Result<u64> {
    let mut writer = PostingsWriter::create(address)?;
    let mut op_builder = OpBuilder::new();
    let mut stream_sources = Vec::new();
    for (i, source) in sources.iter().enumerate() {
        if let Some(map) = source.term_map() {
            op_builder.push(map.stream());
            stream_sources.push(i);
        }
    }
    let mut union = op_builder.union();
    let mut postings: Vec<Posting> = Vec::new();
    while let Some((key, term_offsets)) = union.next() {
        postings.clear();
        for term_offset in term_offsets {
            let source = stream_sources[term_offset.index];
            let mut source_postings = sources[source].postings_at(term_offset.value)?;
            while let Some(ordinal) = source_postings.next_posting()? {
                if let Some(new_ordinal) = doc_map.get(source, ordinal) {
                    if let Some(mut posting) = source_postings.read_posting()? {
                        posting.ordinal = new_ordinal;
                        postings.push(posting);
                    }
                }
            }
        }
        postings.sort_by_key(|p| p.ordinal);
        writer.add_term(key, &postings)?;
    }
    writer.finish()
}

fn merge_stored(
    sources: &[SegmentReader],
    order: &[(usize, u32)],
    address: &SegmentAddress,
) -> Result<()> {
    let mut writer = StoredFieldsWriter::create(address)?;
    let mut cursors: Vec<_> = sources.iter().map(|s| s.stored().cursor()).collect();
    for (source, ordinal) in order {
        writer.add(&cursors[*source].read_doc(*ordinal)?)?;
    }
    writer.finish()?;
    write_ids(
        address,
        order
            .iter()
            .map(|(source, ordinal)| sources[*source].global_id(*ordinal)),
    )
}

/// Writes the live documents of `sources` as one new segment. Returns
/// `None` when no live documents are left, in which case nothing is written.
pub fn merge_segments(
    sources: &[SegmentReader],
    address: &SegmentAddress,
) -> Result<Option<(SegmentMeta, DocMap)>> {
    let (order, doc_map) = merge_order(sources);
    if order.is_empty() {
        return Ok(None);
    }
    let (terms, stored) = rayon::join(
        || merge_terms(sources, &doc_map, address),
        || merge_stored(sources, &order, address),
    );
    stored?;
    let mut fields: BTreeMap<String, FieldInfo> = BTreeMap::new();
    for source in sources {
        for (name, info) in source.fields() {
            let merged = fields.entry(name.clone()).or_default();
            merged.analyzed |= info.analyzed;
            merged.exact |= info.exact;
        }
    }
    let meta = SegmentMeta {
        doc_count: u64::from(doc_map.doc_count()),
        term_count: terms?,
        fields,
    };
    write_meta(address, &meta)?;
    debug!(
        "Merged {} segments into {} with {} docs",
        sources.len(),
        address.name,
        meta.doc_count
    );
    Ok(Some((meta, doc_map)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzis::StandardAnalyzer;
    use crate::doc::Document;
    use crate::doc::Field;
    use crate::inverted::InvertedIndexBuilder;
    use crate::seg::write_seg;
    use bit_vec::BitVec;
    use std::path::Path;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn info(name: &str, doc_count: u64, deleted: usize) -> SegmentInfo {
        let mut bits = BitVec::from_elem(doc_count as usize, false);
        for i in 0..deleted {
            bits.set(i, true);
        }
        SegmentInfo {
            address: SegmentAddress {
                path: PathBuf::from("/nonexistent"),
                name: name.to_string(),
            },
            meta: SegmentMeta {
                doc_count,
                term_count: 0,
                fields: BTreeMap::new(),
            },
            deleted: bits,
        }
    }

    #[test]
    fn merges_only_full_tiers() {
        let policy = MergePolicy::default();
        let mut segments: Vec<SegmentInfo> =
            (0..11).map(|i| info(&format!("s{}", i), 100, 0)).collect();
        segments.push(info("big", 10_000, 0));
        let spec = find_merges(segments, &policy);
        assert_eq!(1, spec.to_merge.len());
        assert_eq!(11, spec.to_merge[0].len());
        assert!(spec.to_merge[0].iter().all(|i| i.address.name != "big"));

        let segments: Vec<SegmentInfo> = (0..10).map(|i| info(&format!("s{}", i), 100, 0)).collect();
        assert!(find_merges(segments, &policy).to_merge.is_empty());
    }

    #[test]
    fn tiers_use_live_counts() {
        let policy = MergePolicy {
            size_ratio: 0.6,
            max_segments_per_tier: 1,
        };
        let spec = find_merges(vec![info("a", 100, 0), info("b", 100, 90)], &policy);
        assert!(spec.to_merge.is_empty());
    }

    fn write(dir: &Path, docs: &[(DocId, &str)]) -> SegmentReader {
        let mut builder = InvertedIndexBuilder::new(Box::new(StandardAnalyzer::new()));
        for (id, name) in docs {
            builder.add_document(*id, &Document::new().add(Field::analyzed("name", *name)));
        }
        let address = SegmentAddress::new_random(dir);
        let meta = write_seg(&address, &builder).unwrap();
        let deleted = BitVec::from_elem(meta.doc_count as usize, false);
        SegmentReader::open(SegmentInfo {
            address,
            meta,
            deleted,
        })
        .unwrap()
    }

    fn reopen(address: &SegmentAddress) -> SegmentReader {
        let meta = address.read_meta().unwrap();
        let deleted = BitVec::from_elem(meta.doc_count as usize, false);
        SegmentReader::open(SegmentInfo {
            address: address.clone(),
            meta,
            deleted,
        })
        .unwrap()
    }

    #[test]
    fn merge_interleaves_by_global_id_and_drops_deleted() {
        let dir = TempDir::new().unwrap();
        let first = write(dir.path(), &[(0, "cache bytes"), (3, "page faults")]);
        let mut second_info = write(dir.path(), &[(1, "cache faults"), (2, "cache hits")])
            .info()
            .clone();
        second_info.deleted.set(1, true);
        let second = SegmentReader::open(second_info).unwrap();

        let address = SegmentAddress::new_random(dir.path());
        let (meta, doc_map) = merge_segments(&[first, second], &address)
            .unwrap()
            .unwrap();
        assert_eq!(3, meta.doc_count);
        assert_eq!(Some(0), doc_map.get(0, 0));
        assert_eq!(Some(2), doc_map.get(0, 1));
        assert_eq!(Some(1), doc_map.get(1, 0));
        assert_eq!(None, doc_map.get(1, 1));

        let merged = reopen(&address);
        assert_eq!(vec![0, 1, 3], (0..3).map(|o| merged.global_id(o)).collect::<Vec<_>>());
        assert_eq!(2, merged.doc_freq("name", "cach").unwrap());
        assert_eq!(0, merged.doc_freq("name", "hit").unwrap());
        let mut faults = merged.postings("name", "fault").unwrap().unwrap();
        assert_eq!(Some(1), faults.next_posting().unwrap());
        assert_eq!(Some(2), faults.next_posting().unwrap());
        assert_eq!(vec![1], faults.positions().unwrap());
        assert_eq!(Some("page faults"), merged.stored().doc(2).unwrap().get("name"));
    }

    #[test]
    fn merging_only_deleted_docs_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut info = write(dir.path(), &[(0, "gone")]).info().clone();
        info.deleted.set(0, true);
        let source = SegmentReader::open(info).unwrap();
        let address = SegmentAddress::new_random(dir.path());
        assert!(merge_segments(&[source], &address).unwrap().is_none());
        assert!(!address.file_path("seg").exists());
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use bit_vec::BitVec;
use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use fst::IntoStreamer;
use fst::Map;
use fst::MapBuilder;
use fst::Streamer;
use log::debug;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use crate::doc::DocId;
use crate::error::Error;
use crate::error::Result;
use crate::inverted::split_term_key;
use crate::inverted::term_key;
use crate::inverted::FieldInfo;
use crate::inverted::InvertedIndexBuilder;
use crate::inverted::Posting;
use crate::inverted::TERM_KEY_SEPARATOR;
use crate::stored;
use crate::stored::StoredFieldsReader;
use crate::stored::StoredFieldsWriter;
use crate::util::read_vint;
use crate::util::write_vint;
use crate::util::MappedFile;

const SEGMENT_META: &str = "seg";
const TERMS: &str = "tid";
const POSTINGS: &str = "pst";
const POSITIONS: &str = "pos";
const IDS: &str = "ids";

const FILE_ENDINGS: [&str; 7] = [
    SEGMENT_META,
    TERMS,
    POSTINGS,
    POSITIONS,
    IDS,
    stored::OFFSETS,
    stored::VALUES,
];

/// The name of the segment a file in the index directory belongs to, if
/// it is a segment file at all.
pub fn segment_name_of(file_name: &str) -> Option<&str> {
    let mut parts = file_name.splitn(2, '.');
    let name = parts.next()?;
    let ending = parts.next()?;
    if !name.is_empty() && FILE_ENDINGS.contains(&ending) {
        Some(name)
    } else {
        None
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SegmentAddress {
    pub path: PathBuf,
    pub name: String,
}

impl SegmentAddress {
    pub fn new_random(path: &Path) -> SegmentAddress {
        let name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();
        SegmentAddress {
            path: PathBuf::from(path),
            name,
        }
    }

    pub fn file_path(&self, ending: &str) -> PathBuf {
        self.path.join(format!("{}.{}", self.name, ending))
    }

    pub fn create_file(&self, ending: &str) -> Result<File> {
        if !self.path.exists() {
            fs::create_dir_all(&self.path)
                .map_err(|e| Error::storage(format!("creating {:?}", self.path), e))?;
        }
        let path = self.file_path(ending);
        File::create(&path).map_err(|e| Error::storage(format!("creating {:?}", path), e))
    }

    pub fn remove_files(&self) -> io::Result<()> {
        let prefix = format!("{}.", self.name);
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_string_lossy().starts_with(&prefix)
            {
                fs::remove_file(&entry.path())?
            }
        }
        Ok(())
    }

    pub fn read_meta(&self) -> Result<SegmentMeta> {
        let path = self.file_path(SEGMENT_META);
        let bytes =
            fs::read(&path).map_err(|e| Error::storage(format!("reading {:?}", path), e))?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SegmentMeta {
    pub doc_count: u64,
    pub term_count: u64,
    pub fields: BTreeMap<String, FieldInfo>,
}

/// A segment as seen by one manifest: its files, its meta and the
/// tombstones recorded for it.
#[derive(Clone, Debug)]
pub struct SegmentInfo {
    pub address: SegmentAddress,
    pub meta: SegmentMeta,
    pub deleted: BitVec,
}

impl SegmentInfo {
    pub fn doc_count(&self) -> u64 {
        self.meta.doc_count
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted.iter().filter(|b| *b).count() as u64
    }

    pub fn live_count(&self) -> u64 {
        self.doc_count() - self.deleted_count()
    }

    pub fn is_deleted(&self, ordinal: u32) -> bool {
        self.deleted.get(ordinal as usize).unwrap_or(false)
    }
}

/// Writes the terms dictionary, postings and positions of a segment.
/// Terms must be added in key order and postings in ordinal order.
pub struct PostingsWriter {
    terms: MapBuilder<BufWriter<File>>,
    postings: BufWriter<File>,
    positions: BufWriter<File>,
    postings_offset: u64,
    positions_offset: u64,
    term_count: u64,
}

impl PostingsWriter {
    pub fn create(address: &SegmentAddress) -> Result<PostingsWriter> {
        Ok(PostingsWriter {
            terms: MapBuilder::new(BufWriter::new(address.create_file(TERMS)?))?,
            postings: BufWriter::new(address.create_file(POSTINGS)?),
            positions: BufWriter::new(address.create_file(POSITIONS)?),
            postings_offset: 0,
            positions_offset: 0,
            term_count: 0,
        })
    }

    pub fn add_term(&mut self, key: &[u8], postings: &[Posting]) -> Result<()> {
        if postings.is_empty() {
            return Ok(());
        }
        self.terms.insert(key, self.postings_offset)?;
        self.term_count += 1;
        self.postings_offset += write_vint(&mut self.postings, postings.len() as u64)? as u64;
        let mut prev_ordinal = 0u32;
        let mut prev_pos_offset = 0u64;
        for posting in postings {
            self.postings_offset +=
                write_vint(&mut self.postings, u64::from(posting.ordinal - prev_ordinal))? as u64;
            self.postings_offset += write_vint(&mut self.postings, u64::from(posting.freq))? as u64;
            self.postings.write_f32::<LittleEndian>(posting.boost)?;
            self.postings_offset += 4;
            self.postings_offset += write_vint(
                &mut self.postings,
                self.positions_offset - prev_pos_offset,
            )? as u64;
            prev_pos_offset = self.positions_offset;
            self.positions_offset +=
                write_vint(&mut self.positions, posting.positions.len() as u64)? as u64;
            let mut last_pos = 0u32;
            for pos in &posting.positions {
                self.positions_offset +=
                    write_vint(&mut self.positions, u64::from(*pos - last_pos))? as u64;
                last_pos = *pos;
            }
            prev_ordinal = posting.ordinal;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<u64> {
        let terms = self.terms.into_inner()?;
        sync(terms)?;
        sync(self.postings)?;
        sync(self.positions)?;
        Ok(self.term_count)
    }
}

pub fn write_ids(address: &SegmentAddress, ids: impl Iterator<Item = DocId>) -> Result<()> {
    let mut writer = BufWriter::new(address.create_file(IDS)?);
    for id in ids {
        writer.write_u64::<BigEndian>(id)?;
    }
    sync(writer)
}

pub fn write_meta(address: &SegmentAddress, meta: &SegmentMeta) -> Result<()> {
    let mut file = address.create_file(SEGMENT_META)?;
    file.write_all(&rmp_serde::to_vec(meta)?)?;
    file.sync_all()?;
    Ok(())
}

fn sync(writer: BufWriter<File>) -> Result<()> {
    let file = writer
        .into_inner()
        .map_err(|e| Error::storage("flushing segment file", e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Writes everything buffered in `builder` as an immutable segment. The
/// meta file is written last, after every other file is synced.
pub fn write_seg(address: &SegmentAddress, builder: &InvertedIndexBuilder) -> Result<SegmentMeta> {
    let (term_count, stored) = rayon::join(
        || -> Result<u64> {
            let mut postings = PostingsWriter::create(address)?;
            for (key, term_postings) in builder.terms() {
                postings.add_term(key, term_postings)?;
            }
            postings.finish()
        },
        || -> Result<()> {
            let mut stored = StoredFieldsWriter::create(address)?;
            for doc in builder.stored_docs() {
                stored.add(doc)?;
            }
            stored.finish()?;
            write_ids(address, builder.ids().iter().cloned())
        },
    );
    stored?;
    let meta = SegmentMeta {
        doc_count: builder.doc_count() as u64,
        term_count: term_count?,
        fields: builder.fields().clone(),
    };
    write_meta(address, &meta)?;
    debug!(
        "Wrote segment {} with {} docs and {} terms",
        address.name, meta.doc_count, meta.term_count
    );
    Ok(meta)
}

pub struct SegmentReader {
    info: SegmentInfo,
    terms: Option<Map<MappedFile>>,
    postings: MappedFile,
    positions: MappedFile,
    ids: MappedFile,
    stored: StoredFieldsReader,
}

impl SegmentReader {
    pub fn open(info: SegmentInfo) -> Result<SegmentReader> {
        let open = |ending: &str| -> Result<MappedFile> {
            let path = info.address.file_path(ending);
            MappedFile::open(&path).map_err(|e| Error::storage(format!("opening {:?}", path), e))
        };
        let terms = if info.meta.term_count > 0 {
            Some(Map::new(open(TERMS)?)?)
        } else {
            None
        };
        let postings = if terms.is_some() {
            open(POSTINGS)?
        } else {
            MappedFile::empty()
        };
        let positions = if terms.is_some() {
            open(POSITIONS)?
        } else {
            MappedFile::empty()
        };
        let ids = open(IDS)?;
        let stored = StoredFieldsReader::open(&info.address)?;
        Ok(SegmentReader {
            info,
            terms,
            postings,
            positions,
            ids,
            stored,
        })
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn doc_count(&self) -> u32 {
        self.info.meta.doc_count as u32
    }

    pub fn is_deleted(&self, ordinal: u32) -> bool {
        self.info.is_deleted(ordinal)
    }

    pub fn field_info(&self, field: &str) -> Option<&FieldInfo> {
        self.info.meta.fields.get(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldInfo> {
        &self.info.meta.fields
    }

    pub fn stored(&self) -> &StoredFieldsReader {
        &self.stored
    }

    pub fn global_id(&self, ordinal: u32) -> DocId {
        let start = ordinal as usize * 8;
        BigEndian::read_u64(&self.ids[start..start + 8])
    }

    /// Ids are written in ascending order, so this is a binary search.
    pub fn ordinal_of(&self, id: DocId) -> Option<u32> {
        let (mut low, mut high) = (0usize, self.doc_count() as usize);
        while low < high {
            let mid = (low + high) / 2;
            let mid_id = self.global_id(mid as u32);
            if mid_id == id {
                return Some(mid as u32);
            } else if mid_id < id {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        None
    }

    fn term_offset(&self, key: &[u8]) -> Option<u64> {
        match self.terms {
            Some(ref m) => m.get(key),
            None => None,
        }
    }

    pub fn postings(&self, field: &str, term: &str) -> Result<Option<TermPostings>> {
        self.postings_for_key(&term_key(field, term))
    }

    pub fn postings_for_key(&self, key: &[u8]) -> Result<Option<TermPostings>> {
        match self.term_offset(key) {
            None => Ok(None),
            Some(offset) => Ok(Some(self.postings_at(offset)?)),
        }
    }

    /// Postings starting at `offset`, as stored in the terms dictionary.
    pub fn postings_at(&self, offset: u64) -> Result<TermPostings> {
        let mut postings = self
            .postings
            .get(offset as usize..)
            .ok_or_else(|| Error::Codec(format!("postings offset {} out of range", offset)))?;
        let doc_freq = read_vint(&mut postings)?;
        Ok(TermPostings {
            postings,
            positions: &self.positions,
            left: doc_freq,
            doc_freq,
            ordinal: None,
            freq: 0,
            boost: 0.0,
            pos_offset: 0,
        })
    }

    pub fn doc_freq(&self, field: &str, term: &str) -> Result<u64> {
        Ok(self
            .postings(field, term)?
            .map(|p| p.doc_freq())
            .unwrap_or(0))
    }

    /// All terms of `field`, in order. A range scan over the dictionary.
    pub fn terms(&self, field: &str) -> Vec<String> {
        let map = match self.terms {
            Some(ref m) => m,
            None => return Vec::new(),
        };
        let mut start = field.as_bytes().to_vec();
        start.push(TERM_KEY_SEPARATOR);
        let mut end = field.as_bytes().to_vec();
        end.push(TERM_KEY_SEPARATOR + 1);
        let mut stream = map.range().ge(&start).lt(&end).into_stream();
        let mut terms = Vec::new();
        while let Some((key, _)) = stream.next() {
            if let Some((_, term)) = split_term_key(key) {
                terms.push(term.to_string());
            }
        }
        terms
    }

    pub fn term_map(&self) -> Option<&Map<MappedFile>> {
        self.terms.as_ref()
    }
}

/// Cursor over the postings of one term in one segment.
pub struct TermPostings<'a> {
    postings: &'a [u8],
    positions: &'a [u8],
    left: u64,
    doc_freq: u64,
    ordinal: Option<u32>,
    freq: u32,
    boost: f32,
    pos_offset: u64,
}

impl<'a> TermPostings<'a> {
    pub fn doc_freq(&self) -> u64 {
        self.doc_freq
    }

    pub fn ordinal(&self) -> Option<u32> {
        self.ordinal
    }

    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn next_posting(&mut self) -> Result<Option<u32>> {
        if self.left == 0 {
            self.ordinal = None;
            return Ok(None);
        }
        self.left -= 1;
        let delta = read_vint(&mut self.postings)? as u32;
        let ordinal = self.ordinal.unwrap_or(0) + delta;
        self.freq = read_vint(&mut self.postings)? as u32;
        self.boost = self.postings.read_f32::<LittleEndian>()?;
        self.pos_offset += read_vint(&mut self.postings)?;
        self.ordinal = Some(ordinal);
        Ok(Some(ordinal))
    }

    pub fn positions(&self) -> Result<Vec<u32>> {
        let mut positions = self
            .positions
            .get(self.pos_offset as usize..)
            .ok_or_else(|| Error::Codec("positions offset out of range".to_string()))?;
        let count = read_vint(&mut positions)?;
        let mut result = Vec::with_capacity(count as usize);
        let mut current = 0u32;
        for _ in 0..count {
            current += read_vint(&mut positions)? as u32;
            result.push(current);
        }
        Ok(result)
    }

    pub fn read_posting(&self) -> Result<Option<Posting>> {
        match self.ordinal {
            Some(ordinal) => Ok(Some(Posting {
                ordinal,
                freq: self.freq,
                boost: self.boost,
                positions: self.positions()?,
            })),
            None => Ok(None),
        }
    }
}

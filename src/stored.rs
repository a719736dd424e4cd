use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::mem;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::WriteBytesExt;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use serde::Serialize;

use crate::doc::StoredDoc;
use crate::error::Error;
use crate::error::Result;
use crate::seg::SegmentAddress;
use crate::util::MappedFile;

pub(crate) const OFFSETS: &str = "fdo";
pub(crate) const VALUES: &str = "fdv";

/// Documents per compressed block. Must fit in the low 12 bits of an offset.
const BLOCK_SIZE: u64 = 128;

trait Offsets {
    fn new(file_offset: u64, block_offset: u64) -> Self;
    fn file_offset(&self) -> u64;
    fn block_offset(&self) -> u64;
}

impl Offsets for u64 {
    fn new(file_offset: u64, block_offset: u64) -> Self {
        (file_offset << 12) + block_offset
    }

    fn file_offset(&self) -> u64 {
        self >> 12
    }
    fn block_offset(&self) -> u64 {
        self & 0xFFF
    }
}

/// Writes stored documents as gzip compressed blocks of msgpack, with a
/// fixed width offset entry per document.
pub struct StoredFieldsWriter {
    offsets: BufWriter<File>,
    values: BufWriter<File>,
    block: GzEncoder<Vec<u8>>,
    block_offset: u64,
    file_offset: u64,
}

impl StoredFieldsWriter {
    pub fn create(address: &SegmentAddress) -> Result<StoredFieldsWriter> {
        Ok(StoredFieldsWriter {
            offsets: BufWriter::new(address.create_file(OFFSETS)?),
            values: BufWriter::new(address.create_file(VALUES)?),
            block: GzEncoder::new(Vec::new(), Compression::default()),
            block_offset: 0,
            file_offset: 0,
        })
    }

    pub fn add(&mut self, doc: &StoredDoc) -> Result<()> {
        self.offsets
            .write_u64::<BigEndian>(Offsets::new(self.file_offset, self.block_offset))?;
        doc.serialize(&mut rmp_serde::Serializer::new(&mut self.block))?;
        self.block_offset += 1;
        if self.block_offset == BLOCK_SIZE {
            self.finish_block()?;
        }
        Ok(())
    }

    fn finish_block(&mut self) -> Result<()> {
        let block = mem::replace(
            &mut self.block,
            GzEncoder::new(Vec::new(), Compression::default()),
        );
        let bytes = block.finish()?;
        self.values.write_all(&bytes)?;
        self.file_offset += bytes.len() as u64;
        self.block_offset = 0;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        if self.block_offset > 0 {
            self.finish_block()?;
        }
        sync(self.offsets)?;
        sync(self.values)
    }
}

fn sync(writer: BufWriter<File>) -> Result<()> {
    let file = writer
        .into_inner()
        .map_err(|e| Error::storage("flushing stored fields", e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

pub struct StoredFieldsReader {
    offsets: MappedFile,
    values: MappedFile,
}

impl StoredFieldsReader {
    pub fn open(address: &SegmentAddress) -> Result<StoredFieldsReader> {
        Ok(StoredFieldsReader {
            offsets: MappedFile::open(&address.file_path(OFFSETS))?,
            values: MappedFile::open(&address.file_path(VALUES))?,
        })
    }

    pub fn cursor(&self) -> StoredFieldsCursor {
        StoredFieldsCursor {
            reader: self,
            curr_block: None,
            docs: Vec::new(),
        }
    }

    pub fn doc(&self, ordinal: u32) -> Result<StoredDoc> {
        self.cursor().read_doc(ordinal)
    }
}

/// Reads documents, keeping the last decoded block around. Reading
/// documents in ascending order decodes each block once.
pub struct StoredFieldsCursor<'a> {
    reader: &'a StoredFieldsReader,
    curr_block: Option<u64>,
    docs: Vec<StoredDoc>,
}

impl<'a> StoredFieldsCursor<'a> {
    pub fn read_doc(&mut self, ordinal: u32) -> Result<StoredDoc> {
        let start = ordinal as usize * 8;
        let entry = self
            .reader
            .offsets
            .get(start..start + 8)
            .ok_or_else(|| Error::Codec(format!("no stored fields for doc {}", ordinal)))?;
        let offsets = BigEndian::read_u64(entry);
        if self.curr_block != Some(offsets.file_offset()) {
            let first_in_block = ordinal as u64 - offsets.block_offset();
            let total = (self.reader.offsets.len() / 8) as u64;
            let count = BLOCK_SIZE.min(total - first_in_block);
            self.load_block(offsets.file_offset(), count)?;
        }
        self.docs
            .get(offsets.block_offset() as usize)
            .cloned()
            .ok_or_else(|| Error::Codec(format!("stored block too short for doc {}", ordinal)))
    }

    fn load_block(&mut self, file_offset: u64, count: u64) -> Result<()> {
        let bytes = self
            .reader
            .values
            .get(file_offset as usize..)
            .ok_or_else(|| Error::Codec("stored block offset out of range".to_string()))?;
        let mut deserializer = rmp_serde::Deserializer::new(GzDecoder::new(bytes));
        self.docs.clear();
        self.curr_block = None;
        for _ in 0..count {
            self.docs.push(StoredDoc::deserialize(&mut deserializer)?);
        }
        self.curr_block = Some(file_offset);
        Ok(())
    }
}

use std::fs;
use std::io;
use std::path::Path;

use bit_vec::BitVec;
use log::debug;
use serde::Deserialize;
use serde::Serialize;

use crate::doc::DocId;
use crate::error::Error;
use crate::error::Result;
use crate::seg::SegmentAddress;
use crate::seg::SegmentInfo;
use crate::util::write_atomic;

pub const MANIFEST: &str = "manifest";

/// The commit point of an index. Segments not listed here do not exist.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub generation: u64,
    pub next_doc_id: DocId,
    pub segments: Vec<SegmentEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub name: String,
    pub doc_count: u64,
    /// Tombstones as a bitmap, one bit per segment-local ordinal.
    pub deleted: Vec<u8>,
}

impl SegmentEntry {
    pub fn from_info(info: &SegmentInfo) -> SegmentEntry {
        SegmentEntry {
            name: info.address.name.clone(),
            doc_count: info.doc_count(),
            deleted: info.deleted.to_bytes(),
        }
    }

    pub fn deleted(&self) -> BitVec {
        let mut deleted = BitVec::from_bytes(&self.deleted);
        deleted.truncate(self.doc_count as usize);
        if deleted.len() < self.doc_count as usize {
            deleted.grow(self.doc_count as usize - deleted.len(), false);
        }
        deleted
    }
}

impl Manifest {
    pub fn exists(path: &Path) -> bool {
        path.join(MANIFEST).exists()
    }

    pub fn read(path: &Path) -> Result<Manifest> {
        let file = path.join(MANIFEST);
        let bytes = match fs::read(&file) {
            Ok(bytes) => bytes,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::Configuration(format!(
                    "no index found at {:?}",
                    path
                )))
            }
            Err(e) => return Err(Error::storage(format!("reading {:?}", file), e)),
        };
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = rmp_serde::to_vec(self)?;
        write_atomic(path, MANIFEST, &bytes)
            .map_err(|e| Error::storage(format!("writing manifest in {:?}", path), e))?;
        debug!(
            "Wrote manifest generation {} with {} segments",
            self.generation,
            self.segments.len()
        );
        Ok(())
    }

    /// Reads the meta of every listed segment.
    pub fn segment_infos(&self, path: &Path) -> Result<Vec<SegmentInfo>> {
        self.segments
            .iter()
            .map(|entry| {
                let address = SegmentAddress {
                    path: path.to_path_buf(),
                    name: entry.name.clone(),
                };
                let meta = address.read_meta()?;
                Ok(SegmentInfo {
                    address,
                    meta,
                    deleted: entry.deleted(),
                })
            })
            .collect()
    }

    pub fn is_listed(&self, segment_name: &str) -> bool {
        self.segments.iter().any(|s| s.name == segment_name)
    }
}

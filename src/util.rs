use std::fs;
use std::fs::File;
use std::io::Error;
use std::io::Read;
use std::io::Write;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

#[inline]
pub fn write_vint(write: &mut dyn Write, mut value: u64) -> Result<u32, Error> {
    let mut count = 1;
    while (value & !0x7F) != 0 {
        write.write_all(&[((value & 0x7F) | 0x80) as u8])?;
        value >>= 7;
        count += 1;
    }
    write.write_all(&[(value as u8)])?;
    Result::Ok(count)
}

#[inline]
pub fn read_vint(read: &mut dyn Read) -> Result<u64, Error> {
    let mut buf = [1];
    read.read_exact(&mut buf)?;
    let mut res: u64 = u64::from(buf[0] & 0x7F);
    let mut shift = 7;
    while (buf[0] & 0x80) != 0 {
        read.read_exact(&mut buf)?;
        res |= u64::from(buf[0] & 0x7F) << shift;
        shift += 7
    }
    Ok(res as u64)
}

/// Replaces `target` with `bytes` so that readers see either the old or the
/// new content, never a partial write.
pub fn write_atomic(dir: &Path, target: &str, bytes: &[u8]) -> Result<(), Error> {
    let tmp_path = dir.join(format!("{}.tmp", target));
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, dir.join(target))?;
    sync_dir(dir)
}

/// Makes renames and unlinks in `dir` durable.
pub fn sync_dir(dir: &Path) -> Result<(), Error> {
    if cfg!(unix) {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

/// A read-only view of a whole file. Empty files are not mapped. The view
/// stays valid after the file is unlinked.
pub struct MappedFile {
    map: Option<Mmap>,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<MappedFile, Error> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(MappedFile { map: None });
        }
        // Segment files are immutable once written, which keeps the mapping valid.
        let map = unsafe { Mmap::map(&file)? };
        Ok(MappedFile { map: Some(map) })
    }

    pub fn empty() -> MappedFile {
        MappedFile { map: None }
    }
}

impl Deref for MappedFile {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.map {
            Some(ref map) => &map[..],
            None => &[],
        }
    }
}

impl AsRef<[u8]> for MappedFile {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

#[cfg(test)]
mod tests {

    use super::read_vint;
    use super::write_atomic;
    use super::write_vint;
    use proptest::prelude::*;
    use proptest::test_runner::Config;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(Config::with_cases(10_000))]
        #[test]
        fn read_write_correct(num in any::<u64>()) {
            let mut write = Cursor::new(vec![0 as u8; 100]);
            write_vint(&mut write, num).unwrap();
            write.set_position(0);
            assert!(num == read_vint(&mut write).unwrap())
        }
    }

    #[test]
    fn vint_reads_advance_slice() {
        let mut buf = Vec::new();
        write_vint(&mut buf, 300).unwrap();
        write_vint(&mut buf, 5).unwrap();
        let mut slice: &[u8] = &buf;
        assert_eq!(300, read_vint(&mut slice).unwrap());
        assert_eq!(5, read_vint(&mut slice).unwrap());
        assert!(slice.is_empty());
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        write_atomic(dir.path(), "manifest", b"first").unwrap();
        write_atomic(dir.path(), "manifest", b"second").unwrap();
        assert_eq!(b"second".to_vec(), fs::read(dir.path().join("manifest")).unwrap());
        assert!(!dir.path().join("manifest.tmp").exists());
    }
}

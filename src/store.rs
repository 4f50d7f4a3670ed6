//! On-disk, append-only, sparse pair-keyed binary store.
//!
//! Backs both [`crate::ccm::ClusterMatrix`] and [`crate::cmx::CorrelationMatrix`].
//! Rows are appended in strictly increasing pair-ordinal order during a
//! single analytic pass; a pair with no surviving cluster is simply never
//! written (an "absent" pair), costing no storage. The index mapping
//! ordinal -> byte offset is built in memory during the write pass and
//! sealed into the file by [`PairedMatrixStore::finish`].
//!
//! File layout (all little-endian), per the binary format in the design:
//! ```text
//! magic[8]   version u16   typeTag u16   geneCount u32
//! payloadDescriptor (type-specific, 32 bytes, zero-padded)
//! dataOffset u64   indexOffset u64   indexCount u64
//! -- payload region (rows, row_stride bytes each) --
//! -- index block: indexCount * (pairOrdinal u64, offset u64), sorted ascending --
//! ```

use crate::error::{KincError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

const DESCRIPTOR_SIZE: usize = 32;
const HEADER_FIXED_SIZE: u64 = 8 + 2 + 2 + 4; // magic + version + typeTag + geneCount
const HEADER_SIZE: u64 = HEADER_FIXED_SIZE + DESCRIPTOR_SIZE as u64 + 8 + 8 + 8;

/// A codec that knows how to describe, serialize and parse the
/// fixed-width payload rows of one matrix kind (CCM or CMX).
///
/// This is the "capability set" the design collapses the original
/// virtual-inheritance hierarchy into: one [`PairedMatrixStore`] generic
/// over a `PayloadCodec`, rather than a base/derived class pair.
pub trait PayloadCodec: Sized {
    /// Row type produced by [`PayloadCodec::decode`] and consumed by
    /// [`PayloadCodec::encode`].
    type Row;

    /// 8-byte file magic identifying this matrix kind.
    const MAGIC: &'static [u8; 8];

    /// Format version written to new files.
    const VERSION: u16;

    /// Numeric type tag written to new files.
    const TYPE_TAG: u16;

    /// Row stride in bytes. Canonicalized as bytes (not float/element
    /// count) per the design's resolution of the row-stride ambiguity.
    fn row_stride(&self) -> u64;

    /// Serializes this codec's type-specific parameters into the fixed
    /// 32-byte descriptor block.
    fn descriptor(&self) -> [u8; DESCRIPTOR_SIZE];

    /// Reconstructs a codec from a descriptor block and the gene count
    /// read from the header.
    fn from_descriptor(bytes: &[u8; DESCRIPTOR_SIZE], gene_count: u32) -> Result<Self>;

    fn encode(&self, row: &Self::Row, out: &mut Vec<u8>);

    fn decode(&self, bytes: &[u8]) -> Result<Self::Row>;
}

enum Backing {
    Writing {
        file: BufWriter<File>,
        /// Byte offset of the next row to be appended.
        cursor: u64,
        last_ordinal: Option<u64>,
    },
    Reading {
        file: BufReader<File>,
    },
}

/// A sparse, pair-indexed binary matrix store.
pub struct PairedMatrixStore<C: PayloadCodec> {
    path: std::path::PathBuf,
    gene_count: u32,
    codec: C,
    /// (ordinal, offset) pairs. Built incrementally while writing, loaded
    /// wholesale from the trailing index block when opened for reading.
    index: Vec<(u64, u64)>,
    data_offset: u64,
    backing: Backing,
}

impl<C: PayloadCodec> PairedMatrixStore<C> {
    /// Creates a new store file, writing a placeholder header. The file
    /// is tentative (not safely readable by another process) until
    /// [`PairedMatrixStore::finish`] is called.
    pub fn create<P: AsRef<Path>>(path: P, gene_count: u32, codec: C) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);

        write_header(
            &mut writer,
            C::MAGIC,
            C::VERSION,
            C::TYPE_TAG,
            gene_count,
            &codec.descriptor(),
            0,
            0,
            0,
        )?;
        writer.flush()?;

        Ok(PairedMatrixStore {
            path,
            gene_count,
            codec,
            index: Vec::new(),
            data_offset: HEADER_SIZE,
            backing: Backing::Writing {
                file: writer,
                cursor: HEADER_SIZE,
                last_ordinal: None,
            },
        })
    }

    /// Appends a row at the current end of the payload region.
    ///
    /// Requires `ordinal` to be strictly greater than every previously
    /// written ordinal; violating this fails with
    /// [`KincError::Ordering`], matching the store's append-only,
    /// ordinal-increasing contract.
    pub fn write(&mut self, ordinal: u64, row: &C::Row) -> Result<()> {
        let (file, cursor, last_ordinal) = match &mut self.backing {
            Backing::Writing {
                file,
                cursor,
                last_ordinal,
            } => (file, cursor, last_ordinal),
            Backing::Reading { .. } => {
                return Err(KincError::ordering(
                    "cannot write to a store that has been sealed or opened read-only",
                ))
            }
        };

        if let Some(last) = *last_ordinal {
            if ordinal <= last {
                return Err(KincError::ordering(format!(
                    "pair ordinals must be strictly increasing: got {ordinal} after {last}"
                )));
            }
        }

        let mut buf = Vec::with_capacity(self.codec.row_stride() as usize);
        self.codec.encode(row, &mut buf);
        if buf.len() as u64 != self.codec.row_stride() {
            return Err(KincError::format(format!(
                "encoded row size {} does not match row stride {}",
                buf.len(),
                self.codec.row_stride()
            )));
        }

        let offset = *cursor;
        file.write_all(&buf)?;
        *cursor += buf.len() as u64;
        self.index.push((ordinal, offset));
        *last_ordinal = Some(ordinal);

        Ok(())
    }

    /// Binary-searches the index for `ordinal`, returning its byte offset
    /// if present.
    pub fn find(&self, ordinal: u64) -> Option<u64> {
        self.index
            .binary_search_by_key(&ordinal, |(o, _)| *o)
            .ok()
            .map(|pos| self.index[pos].1)
    }

    /// Positioned read of one row at `offset`.
    pub fn read_payload(&mut self, offset: u64) -> Result<C::Row> {
        let stride = self.codec.row_stride() as usize;
        let mut buf = vec![0u8; stride];

        match &mut self.backing {
            Backing::Reading { file } => {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buf).map_err(|e| {
                    KincError::Io(std::io::Error::new(
                        e.kind(),
                        format!("short read at offset {offset}: {e}"),
                    ))
                })?;
            }
            Backing::Writing { file, .. } => {
                file.flush()?;
                let mut f = File::open(&self.path)?;
                f.seek(SeekFrom::Start(offset))?;
                f.read_exact(&mut buf).map_err(|e| {
                    KincError::Io(std::io::Error::new(
                        e.kind(),
                        format!("short read at offset {offset}: {e}"),
                    ))
                })?;
            }
        }

        self.codec.decode(&buf)
    }

    /// Reads the payload for a pair ordinal, or `Ok(None)` if absent.
    pub fn read_pair(&mut self, ordinal: u64) -> Result<Option<C::Row>> {
        match self.find(ordinal) {
            Some(offset) => Ok(Some(self.read_payload(offset)?)),
            None => Ok(None),
        }
    }

    /// Flushes payload data, appends the sorted index block, rewrites the
    /// header with the index location/count, and fsyncs. Consumes the
    /// store: once sealed it is read-only, enforced by the type system
    /// (there is no further `write` call possible on the returned value).
    pub fn finish(self) -> Result<()> {
        let (mut file, cursor) = match self.backing {
            Backing::Writing { file, cursor, .. } => (file, cursor),
            Backing::Reading { .. } => {
                return Err(KincError::ordering("store is already sealed"))
            }
        };

        // Index must already be in ordinal order: writes are ordinal-increasing.
        debug_assert!(self.index.windows(2).all(|w| w[0].0 < w[1].0));

        let index_offset = cursor;
        for (ord, off) in &self.index {
            file.write_u64::<LittleEndian>(*ord)?;
            file.write_u64::<LittleEndian>(*off)?;
        }
        file.flush()?;
        file.get_ref().sync_all()?;

        // Rewrite the header in place with the final offsets/count.
        let mut f = file.into_inner().map_err(|e| e.into_error())?;
        f.seek(SeekFrom::Start(0))?;
        write_header(
            &mut f,
            C::MAGIC,
            C::VERSION,
            C::TYPE_TAG,
            self.gene_count,
            &self.codec.descriptor(),
            self.data_offset,
            index_offset,
            self.index.len() as u64,
        )?;
        f.flush()?;
        f.sync_all()?;

        Ok(())
    }

    /// Opens an existing, sealed store for random-access reads.
    ///
    /// Verifies the magic, version, and that the trailing index block's
    /// size matches the recorded count.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(|e| {
            KincError::Io(std::io::Error::new(e.kind(), "truncated header"))
        })?;
        if &magic != C::MAGIC {
            return Err(KincError::format(format!(
                "bad magic: expected {:?}, got {:?}",
                C::MAGIC,
                magic
            )));
        }

        let version = reader.read_u16::<LittleEndian>()?;
        if version != C::VERSION {
            return Err(KincError::format(format!(
                "unsupported version {version}, expected {}",
                C::VERSION
            )));
        }

        let type_tag = reader.read_u16::<LittleEndian>()?;
        if type_tag != C::TYPE_TAG {
            return Err(KincError::format(format!(
                "type tag mismatch: expected {}, got {type_tag}",
                C::TYPE_TAG
            )));
        }

        let gene_count = reader.read_u32::<LittleEndian>()?;

        let mut descriptor = [0u8; DESCRIPTOR_SIZE];
        reader.read_exact(&mut descriptor)?;
        let codec = C::from_descriptor(&descriptor, gene_count)?;

        let data_offset = reader.read_u64::<LittleEndian>()?;
        let index_offset = reader.read_u64::<LittleEndian>()?;
        let index_count = reader.read_u64::<LittleEndian>()?;

        let file_len = reader.get_ref().metadata()?.len();
        let expected_index_bytes = index_count * 16;
        if index_offset + expected_index_bytes != file_len {
            return Err(KincError::format(format!(
                "trailing index block size mismatch: expected {expected_index_bytes} bytes at offset {index_offset}, file is {file_len} bytes"
            )));
        }

        reader.seek(SeekFrom::Start(index_offset))?;
        let mut index = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let ord = reader.read_u64::<LittleEndian>()?;
            let off = reader.read_u64::<LittleEndian>()?;
            index.push((ord, off));
        }
        if !index.windows(2).all(|w| w[0].0 < w[1].0) {
            return Err(KincError::format(
                "index block is not strictly increasing in pair ordinal",
            ));
        }

        Ok(PairedMatrixStore {
            path,
            gene_count,
            codec,
            index,
            data_offset,
            backing: Backing::Reading { file: reader },
        })
    }

    pub fn gene_count(&self) -> u32 {
        self.gene_count
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }
}

/// Deletes a store file that never reached `finish()`. Before `finish()`
/// the file holds no valid index block, so it carries no recoverable
/// state beyond what the analytic already has in memory; this makes the
/// tentative-state discard explicit rather than a bare `remove_file`.
pub fn discard_tentative<P: AsRef<Path>>(path: P) -> Result<()> {
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_header<W: Write>(
    w: &mut W,
    magic: &[u8; 8],
    version: u16,
    type_tag: u16,
    gene_count: u32,
    descriptor: &[u8; DESCRIPTOR_SIZE],
    data_offset: u64,
    index_offset: u64,
    index_count: u64,
) -> Result<()> {
    w.write_all(magic)?;
    w.write_u16::<LittleEndian>(version)?;
    w.write_u16::<LittleEndian>(type_tag)?;
    w.write_u32::<LittleEndian>(gene_count)?;
    w.write_all(descriptor)?;
    w.write_u64::<LittleEndian>(data_offset)?;
    w.write_u64::<LittleEndian>(index_offset)?;
    w.write_u64::<LittleEndian>(index_count)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct TestCodec {
        width: usize,
    }

    impl PayloadCodec for TestCodec {
        type Row = Vec<f32>;
        const MAGIC: &'static [u8; 8] = b"TESTSTOR";
        const VERSION: u16 = 1;
        const TYPE_TAG: u16 = 42;

        fn row_stride(&self) -> u64 {
            (self.width * 4) as u64
        }

        fn descriptor(&self) -> [u8; DESCRIPTOR_SIZE] {
            let mut d = [0u8; DESCRIPTOR_SIZE];
            d[0..4].copy_from_slice(&(self.width as u32).to_le_bytes());
            d
        }

        fn from_descriptor(bytes: &[u8; DESCRIPTOR_SIZE], _gene_count: u32) -> Result<Self> {
            let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
            Ok(TestCodec { width })
        }

        fn encode(&self, row: &Self::Row, out: &mut Vec<u8>) {
            for v in row {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }

        fn decode(&self, bytes: &[u8]) -> Result<Self::Row> {
            Ok(bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect())
        }
    }

    #[test]
    fn tiny_store_round_trips_and_reports_absent() {
        let dir = std::env::temp_dir().join(format!("kinc_store_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tiny.cmx");

        let mut store = PairedMatrixStore::create(&path, 4, TestCodec { width: 2 }).unwrap();
        store.write(0, &vec![0.1, 0.2]).unwrap();
        store.write(2, &vec![0.3, f32::NAN]).unwrap();
        store.write(5, &vec![0.9, 0.8]).unwrap();
        store.finish().unwrap();

        let mut reopened = PairedMatrixStore::<TestCodec>::open(&path).unwrap();
        assert!(reopened.read_pair(1).unwrap().is_none());
        let row = reopened.read_pair(5).unwrap().unwrap();
        assert_eq!(row, vec![0.9, 0.8]);
        let row0 = reopened.read_pair(0).unwrap().unwrap();
        assert_eq!(row0, vec![0.1, 0.2]);
        let row2 = reopened.read_pair(2).unwrap().unwrap();
        assert_eq!(row2[0], 0.3);
        assert!(row2[1].is_nan());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_requires_strictly_increasing_ordinals() {
        let dir = std::env::temp_dir().join(format!("kinc_store_test_ord_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ordering.cmx");

        let mut store = PairedMatrixStore::create(&path, 4, TestCodec { width: 1 }).unwrap();
        store.write(3, &vec![1.0]).unwrap();
        let err = store.write(3, &vec![2.0]).unwrap_err();
        assert!(matches!(err, KincError::Ordering(_)));
        let err = store.write(1, &vec![2.0]).unwrap_err();
        assert!(matches!(err, KincError::Ordering(_)));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reopen_rejects_bad_magic() {
        let dir = std::env::temp_dir().join(format!("kinc_store_test_magic_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.cmx");
        std::fs::write(&path, b"not a kinc store at all, far too short").unwrap();

        let err = PairedMatrixStore::<TestCodec>::open(&path).unwrap_err();
        assert!(matches!(err, KincError::Format(_)) || matches!(err, KincError::Io(_)));

        std::fs::remove_file(&path).ok();
    }
}

use std::fs::File;
use std::path::Path;

use anyhow::Result;
use byteorder::{ByteOrder, NativeEndian};
use located_error::*;
use log::{debug, info};
use memmap2::Mmap;

use crate::{MAGIC, FORMAT_VERSION};
use crate::assignment::Assignment;
use crate::partition::{PartitionMeta, TipData};
use config::{DataType, ProtModel};

mod error;
pub use error::ReaderError;

/// The per-worker view of a binary alignment: global metadata, plus one
/// materialized [`SliceBlock`] per requested assignment.
///
/// Loading is windowed. When an assignment covers its whole partition the
/// tip data is read as one sequential block; otherwise one seek-and-read per
/// taxon extracts the assigned column window.
#[derive(Debug)]
pub struct AlignmentStore {
    pub taxa_count: usize,
    pub pattern_count: usize,
    pub gappiness: f64,
    pub taxa_names: Vec<String>,
    pub partitions: Vec<PartitionMeta>,
    pub blocks: Vec<SliceBlock>,
}

/// The materialized data of one assignment: pattern weights and tip
/// observations over the window `[offset, offset + width)` of a partition.
#[derive(Debug, Clone)]
pub struct SliceBlock {
    pub partition: usize,
    pub offset: usize,
    pub width: usize,
    pub weights: Vec<i32>,
    pub tips: TipData,
}

impl AlignmentStore {
    /// Read the header, taxa, partition metadata and the tip windows named
    /// by `assignments` from the binary alignment at `path`.
    ///
    /// # Errors
    /// - the compatibility gate: wrong host word size, version or magic;
    /// - shape violations (zero states, state-count mismatch, assignments
    ///   beyond a partition's range);
    /// - tip bytes outside a partition's alphabet;
    /// - any I/O failure.
    pub fn load(path: &Path, assignments: &[Assignment]) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| ReaderError::OpenFile(path.to_path_buf(), e))
            .loc("While opening binary alignment")?;
        let mmap = unsafe {
            Mmap::map(&file)
                .map_err(|e| ReaderError::Mmap(path.to_path_buf(), e))
                .loc("While mapping binary alignment")?
        };

        let store = Self::decode(&mmap, assignments)
            .with_loc(|| format!("While decoding binary alignment {path:?}"))?;

        info!("Loaded binary alignment {path:?}: {} taxa, {} patterns, {} partitions, gappiness {:.3}",
            store.taxa_count, store.pattern_count, store.partitions.len(), store.gappiness);
        Ok(store)
    }

    /// Decode from an in-memory byte image (the mapped file).
    pub fn decode(buf: &[u8], assignments: &[Assignment]) -> Result<Self, ReaderError> {
        let mut cursor = Cursor { buf, pos: 0 };

        // ---- compatibility gate
        let word = cursor.read_u32()?;
        let host = std::mem::size_of::<usize>() as u32;
        if word != host {
            return Err(ReaderError::WordSize { file: word, host })
        }
        let version = cursor.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(ReaderError::Version { file: version, expected: FORMAT_VERSION })
        }
        let magic = cursor.read_u32()?;
        if magic != MAGIC {
            return Err(ReaderError::Magic { found: magic, expected: MAGIC })
        }

        // ---- header
        let taxa_count = cursor.read_u32()? as usize;
        let pattern_count = cursor.read_size()?;
        let partition_count = cursor.read_u32()? as usize;
        let gappiness = cursor.read_f64()?;

        // ---- pattern weights: remember the position, skip the block
        let weights_pos = cursor.pos;
        cursor.skip(pattern_count * std::mem::size_of::<i32>())?;

        // ---- taxa names
        let mut taxa_names = Vec::with_capacity(taxa_count);
        for _ in 0..taxa_count {
            taxa_names.push(cursor.read_string()?);
        }

        // ---- partition metadata
        let mut partitions = Vec::with_capacity(partition_count);
        for _ in 0..partition_count {
            partitions.push(read_partition_meta(&mut cursor)?);
        }
        let aln_pos = cursor.pos;

        // ---- byte offset of each partition's tip block
        let mut starts = Vec::with_capacity(partition_count);
        let mut start = aln_pos;
        for meta in &partitions {
            starts.push(start);
            start += taxa_count * meta.full_width() * site_size(meta);
        }

        // ---- materialize the requested windows
        let mut blocks = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let block = read_block(&cursor, &partitions, &starts, weights_pos, taxa_count, assignment)?;
            blocks.push(block);
        }

        Ok(Self { taxa_count, pattern_count, gappiness, taxa_names, partitions, blocks })
    }
}

/// Bytes one site occupies in a partition's tip block.
fn site_size(meta: &PartitionMeta) -> usize {
    if meta.data_type.is_pomo() {
        meta.states() * std::mem::size_of::<f64>()
    } else {
        std::mem::size_of::<u8>()
    }
}

fn read_partition_meta(cursor: &mut Cursor) -> Result<PartitionMeta, ReaderError> {
    let states = cursor.read_i32()?;
    let _max_tip_states = cursor.read_i32()?;
    let lower = cursor.read_size()?;
    let upper = cursor.read_size()?;
    let _width = cursor.read_size()?; // parse-time artifact, always recomputed
    let data_type = DataType::from_code(cursor.read_i32()?)?;
    let prot_model = ProtModel::from_code(cursor.read_i32()?)?;
    let prot_freqs = cursor.read_i32()? != 0;
    let non_gtr = cursor.read_i32()? != 0;
    let optimize_freqs = cursor.read_i32()? != 0;
    let name = cursor.read_string()?;

    if states == 0 {
        return Err(ReaderError::EmptyStates { name })
    }
    if states as usize != data_type.states() {
        return Err(ReaderError::StateCount { name, found: states, expected: data_type.states() })
    }

    let mut frequencies = vec![0.0; states as usize];
    cursor.read_f64_into(&mut frequencies)?;

    let mut meta = PartitionMeta::new(&name, data_type, lower, upper);
    meta.prot_model = prot_model;
    meta.prot_freqs = prot_freqs;
    meta.non_gtr = non_gtr;
    meta.optimize_freqs = optimize_freqs;
    meta.frequencies = frequencies;
    Ok(meta)
}

fn read_block(
    cursor: &Cursor,
    partitions: &[PartitionMeta],
    starts: &[usize],
    weights_pos: usize,
    taxa_count: usize,
    assignment: &Assignment,
) -> Result<SliceBlock, ReaderError> {
    let Some(meta) = partitions.get(assignment.partition) else {
        return Err(ReaderError::UnknownPartition {
            partition: assignment.partition, count: partitions.len(),
        })
    };
    let full_width = meta.full_width();
    if assignment.offset + assignment.width > full_width {
        return Err(ReaderError::BadAssignment {
            assignment: assignment.to_string(), partition: assignment.partition, full_width,
        })
    }

    debug!("Reading {assignment} of partition '{}'", meta.name);

    // ---- pattern weights of the window
    let mut weights = vec![0i32; assignment.width];
    let wpos = weights_pos + (meta.lower + assignment.offset) * std::mem::size_of::<i32>();
    cursor.at(wpos).read_i32_into(&mut weights)?;

    // ---- tip data
    let site = site_size(meta);
    let start = starts[assignment.partition];
    let tips = if meta.data_type.is_pomo() {
        let row_len = assignment.width * meta.states();
        let mut rows = Vec::with_capacity(taxa_count);
        if assignment.covers(full_width) {
            // one sequential block, split into per-species rows
            let mut all = vec![0.0; taxa_count * row_len];
            cursor.at(start).read_f64_into(&mut all)?;
            for chunk in all.chunks_exact(row_len) {
                rows.push(chunk.to_vec());
            }
        } else {
            for taxon in 0..taxa_count {
                let pos = start + (taxon * full_width + assignment.offset) * site;
                let mut row = vec![0.0; row_len];
                cursor.at(pos).read_f64_into(&mut row)?;
                rows.push(row);
            }
        }
        TipData::Clvs(rows)
    } else {
        let mut rows = Vec::with_capacity(taxa_count);
        for taxon in 0..taxa_count {
            let pos = start + taxon * full_width + assignment.offset;
            let row = cursor.at(pos).read_bytes(assignment.width)?.to_vec();
            for (i, &code) in row.iter().enumerate() {
                if !meta.data_type.valid_tip_code(code) {
                    return Err(ReaderError::InvalidTipState {
                        name: meta.name.clone(),
                        taxon,
                        pattern: meta.lower + assignment.offset + i,
                        code,
                    })
                }
            }
            rows.push(row);
        }
        TipData::Bytes(rows)
    };

    Ok(SliceBlock {
        partition: assignment.partition,
        offset: assignment.offset,
        width: assignment.width,
        weights,
        tips,
    })
}

/// Bounds-checked reading position over the mapped file.
#[derive(Clone, Copy)]
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at(mut self, pos: usize) -> Self {
        self.pos = pos;
        self
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReaderError> {
        if self.pos + n > self.buf.len() {
            return Err(ReaderError::Truncated { at: self.pos, needed: n, len: self.buf.len() })
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), ReaderError> {
        self.take(n).map(|_| ())
    }

    fn read_u32(&mut self) -> Result<u32, ReaderError> {
        Ok(NativeEndian::read_u32(self.take(4)?))
    }

    fn read_i32(&mut self) -> Result<i32, ReaderError> {
        Ok(NativeEndian::read_i32(self.take(4)?))
    }

    fn read_f64(&mut self) -> Result<f64, ReaderError> {
        Ok(NativeEndian::read_f64(self.take(8)?))
    }

    fn read_size(&mut self) -> Result<usize, ReaderError> {
        let bytes = self.take(std::mem::size_of::<usize>())?;
        Ok(usize::from_ne_bytes(bytes.try_into().expect("word-sized slice")))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ReaderError> {
        self.take(n)
    }

    fn read_i32_into(&mut self, out: &mut [i32]) -> Result<(), ReaderError> {
        let bytes = self.take(out.len() * std::mem::size_of::<i32>())?;
        NativeEndian::read_i32_into(bytes, out);
        Ok(())
    }

    fn read_f64_into(&mut self, out: &mut [f64]) -> Result<(), ReaderError> {
        let bytes = self.take(out.len() * std::mem::size_of::<f64>())?;
        NativeEndian::read_f64_into(bytes, out);
        Ok(())
    }

    /// Length-prefixed, NUL-terminated string; the prefix counts the NUL.
    fn read_string(&mut self) -> Result<String, ReaderError> {
        let at = self.pos;
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        let name = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        String::from_utf8(name.to_vec()).map_err(|e| ReaderError::BadName(at, e))
    }
}

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Result;
use byteorder::{NativeEndian, WriteBytesExt};
use located_error::*;
use log::{debug, info};

use crate::{MAGIC, FORMAT_VERSION};
use crate::partition::{PartitionMeta, TipData};

mod error;
pub use error::WriterError;

/// A full alignment ready to be serialized: pattern weights, taxa names,
/// and per-partition metadata plus tip data over the complete column range.
///
/// The producing side of the format. The consumer is
/// [`crate::read::AlignmentStore`], which only ever materializes windows.
#[derive(Debug, Clone)]
pub struct BinaryAlignment {
    pub taxa_names: Vec<String>,
    /// Pattern compression weights, one per pattern column.
    pub weights: Vec<i32>,
    /// Partitions in `lower` order, each with its full-range tip data.
    pub partitions: Vec<(PartitionMeta, TipData)>,
}

impl BinaryAlignment {
    /// Total number of pattern columns across partitions.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.partitions.iter().map(|(meta, _)| meta.full_width()).sum()
    }

    /// Fraction of tip bytes holding the undetermined code, over the
    /// byte-coded partitions. CLV-bearing partitions do not contribute.
    #[must_use]
    pub fn gappiness(&self) -> f64 {
        let mut total = 0usize;
        let mut gaps  = 0usize;
        for (meta, tips) in &self.partitions {
            let TipData::Bytes(rows) = tips else { continue };
            let Some(undetermined) = meta.data_type.undetermined_code() else { continue };
            for row in rows {
                total += row.len();
                gaps  += row.iter().filter(|&&code| code == undetermined).count();
            }
        }
        if total == 0 { 0.0 } else { gaps as f64 / total as f64 }
    }

    /// Check the shape invariants the format relies on: partitions tile
    /// `[0, pattern_count)`, every partition carries one tip row per taxon
    /// of the right length and kind, and the weight vector spans all
    /// patterns.
    pub fn validate(&self) -> Result<(), WriterError> {
        let mut expected = 0usize;
        for (meta, tips) in &self.partitions {
            if meta.lower != expected {
                return Err(WriterError::NonContiguous {
                    name: meta.name.clone(), lower: meta.lower, expected,
                })
            }
            if meta.upper <= meta.lower {
                return Err(WriterError::EmptyPartition {
                    name: meta.name.clone(), lower: meta.lower, upper: meta.upper,
                })
            }
            expected = meta.upper;

            if meta.frequencies.len() != meta.states() {
                return Err(WriterError::FrequencyCount {
                    name: meta.name.clone(), got: meta.frequencies.len(), states: meta.states(),
                })
            }

            let row_len = match (meta.data_type.is_pomo(), tips) {
                (false, TipData::Bytes(_)) => meta.full_width(),
                (true,  TipData::Clvs(_))  => meta.full_width() * meta.states(),
                _ => return Err(WriterError::TipDataKind { name: meta.name.clone() }),
            };
            if tips.rows() != self.taxa_names.len() {
                return Err(WriterError::RowCountMismatch {
                    name: meta.name.clone(), rows: tips.rows(), taxa: self.taxa_names.len(),
                })
            }
            for row in 0..tips.rows() {
                let len = match tips {
                    TipData::Bytes(rows) => rows[row].len(),
                    TipData::Clvs(rows)  => rows[row].len(),
                };
                if len != row_len {
                    return Err(WriterError::RowLengthMismatch {
                        name: meta.name.clone(), row, len, expected: row_len,
                    })
                }
            }
        }
        if self.weights.len() != expected {
            return Err(WriterError::WeightCount { got: self.weights.len(), patterns: expected })
        }
        Ok(())
    }

    /// Serialize to `path` in the byte order of this host.
    ///
    /// # Errors
    /// - any shape violation caught by [`BinaryAlignment::validate`];
    /// - I/O failures while creating or writing the file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        self.validate().loc("While validating alignment before encoding")?;

        let file = File::create(path)
            .map_err(|e| WriterError::CreateFile(path.to_path_buf(), e))
            .loc("While creating binary alignment")?;
        let mut writer = BufWriter::new(file);

        self.encode(&mut writer)
            .with_loc(|| format!("While encoding binary alignment {path:?}"))?;

        info!("Wrote binary alignment to {path:?} ({} taxa, {} patterns, {} partitions)",
            self.taxa_names.len(), self.pattern_count(), self.partitions.len());
        Ok(())
    }

    /// Serialize to an arbitrary writer.
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), WriterError> {
        // ---- header
        writer.write_u32::<NativeEndian>(std::mem::size_of::<usize>() as u32)?;
        writer.write_u32::<NativeEndian>(FORMAT_VERSION)?;
        writer.write_u32::<NativeEndian>(MAGIC)?;
        writer.write_u32::<NativeEndian>(self.taxa_names.len() as u32)?;
        write_size(writer, self.pattern_count())?;
        writer.write_u32::<NativeEndian>(self.partitions.len() as u32)?;
        writer.write_f64::<NativeEndian>(self.gappiness())?;

        // ---- pattern weights
        for &weight in &self.weights {
            writer.write_i32::<NativeEndian>(weight)?;
        }

        // ---- taxa names
        for name in &self.taxa_names {
            write_string(writer, name)?;
        }

        // ---- partition metadata
        for (meta, _) in &self.partitions {
            writer.write_i32::<NativeEndian>(meta.states() as i32)?;
            writer.write_i32::<NativeEndian>(meta.max_tip_states() as i32)?;
            write_size(writer, meta.lower)?;
            write_size(writer, meta.upper)?;
            write_size(writer, 0)?; // width: recomputed from the assignment at load time
            writer.write_i32::<NativeEndian>(meta.data_type.code())?;
            writer.write_i32::<NativeEndian>(meta.prot_model.code())?;
            writer.write_i32::<NativeEndian>(i32::from(meta.prot_freqs))?;
            writer.write_i32::<NativeEndian>(i32::from(meta.non_gtr))?;
            writer.write_i32::<NativeEndian>(i32::from(meta.optimize_freqs))?;
            write_string(writer, &meta.name)?;
            for &freq in &meta.frequencies {
                writer.write_f64::<NativeEndian>(freq)?;
            }
        }

        // ---- tip data, partition-major, taxon-major within a partition
        for (meta, tips) in &self.partitions {
            debug!("Encoding tip data of partition '{}'", meta.name);
            match tips {
                TipData::Bytes(rows) => {
                    for row in rows {
                        writer.write_all(row)?;
                    }
                }
                TipData::Clvs(rows) => {
                    for row in rows {
                        for &value in row {
                            writer.write_f64::<NativeEndian>(value)?;
                        }
                    }
                }
            }
        }
        writer.flush()?;
        Ok(())
    }
}

fn write_size<W: Write>(writer: &mut W, value: usize) -> Result<(), WriterError> {
    writer.write_all(&value.to_ne_bytes())?;
    Ok(())
}

/// Length-prefixed, NUL-terminated string; the prefix counts the NUL.
fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), WriterError> {
    writer.write_u32::<NativeEndian>(value.len() as u32 + 1)?;
    writer.write_all(value.as_bytes())?;
    writer.write_u8(0)?;
    Ok(())
}

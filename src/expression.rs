//! Dense gene x sample expression matrix.
//!
//! Loaded once from a tab-separated text file and read-only from then on.
//! Storage is row-major `f32`, row stride `sample_count * 4` bytes, exactly
//! as the design requires. Missing values are NaN.

use crate::config::ExpressionMatrixMeta;
use crate::error::{KincError, Result};
use csv::ReaderBuilder;
use std::path::Path;

/// Elementwise transform optionally applied to the raw expression values
/// at load time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    None,
    Ln,
    Log2,
    Log10,
}

impl Transform {
    fn apply(self, value: f32) -> f32 {
        if self == Transform::None {
            return value;
        }
        if value <= 0.0 {
            return f32::NAN;
        }
        match self {
            Transform::Ln => value.ln(),
            Transform::Log2 => value.log2(),
            Transform::Log10 => value.log10(),
            Transform::None => value,
        }
    }
}

/// A dense gene x sample expression matrix.
pub struct ExpressionMatrix {
    gene_count: u32,
    sample_count: u32,
    transform: Transform,
    gene_names: Vec<String>,
    sample_names: Vec<String>,
    /// Row-major `gene_count * sample_count` buffer.
    data: Vec<f32>,
}

impl ExpressionMatrix {
    pub fn row_count(&self) -> u32 {
        self.gene_count
    }

    pub fn column_count(&self) -> u32 {
        self.sample_count
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn at(&self, gene: u32, sample: u32) -> f32 {
        self.data[(gene as usize) * (self.sample_count as usize) + sample as usize]
    }

    pub fn gene_name(&self, gene: u32) -> &str {
        &self.gene_names[gene as usize]
    }

    pub fn sample_name(&self, sample: u32) -> &str {
        &self.sample_names[sample as usize]
    }

    pub fn gene_names(&self) -> &[String] {
        &self.gene_names
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    /// Returns the full expression row for a gene.
    pub fn gene(&self, gene: u32) -> &[f32] {
        let start = (gene as usize) * (self.sample_count as usize);
        &self.data[start..start + self.sample_count as usize]
    }

    /// Loads a tab-separated expression matrix.
    ///
    /// Line 1: sample names (first cell is an ignored corner/"gene"
    /// header). Lines 2..G+1: gene name, then `S` float cells. Cells equal
    /// to `meta.nan_token` (case-sensitive) or empty become NaN. If
    /// `meta.transform` is not `None`, it is applied elementwise to
    /// positive values; values `<= 0` become NaN instead of being
    /// transformed.
    pub fn load_text<P: AsRef<Path>>(path: P, meta: &ExpressionMatrixMeta) -> Result<Self> {
        let transform = meta.transform;
        let nan_token = meta.nan_token.as_str();
        let path = path.as_ref();
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| KincError::format(format!("cannot open '{}': {e}", path.display())))?;

        let mut records = reader.records();

        let header = records
            .next()
            .ok_or_else(|| KincError::format("expression file is empty"))?
            .map_err(|e| KincError::format(format!("malformed header row: {e}")))?;

        let sample_names: Vec<String> = header.iter().skip(1).map(|s| s.to_string()).collect();
        let sample_count = sample_names.len();
        if sample_count == 0 {
            return Err(KincError::domain("expression file has no sample columns"));
        }

        let mut gene_names = Vec::new();
        let mut data = Vec::new();

        for (line_idx, record) in records.enumerate() {
            let record = record.map_err(|e| {
                KincError::format(format!("malformed row {}: {e}", line_idx + 2))
            })?;

            if record.iter().all(|cell| cell.trim().is_empty()) {
                // Trailing blank lines are ignored.
                continue;
            }

            let mut cells = record.iter();
            let gene_name = cells
                .next()
                .ok_or_else(|| {
                    KincError::format(format!("row {} is missing a gene name", line_idx + 2))
                })?
                .to_string();

            let mut row = Vec::with_capacity(sample_count);
            for (col_idx, cell) in cells.enumerate() {
                let trimmed = cell.trim();
                let raw: f32 = if trimmed.is_empty() || trimmed == nan_token {
                    f32::NAN
                } else {
                    fast_float::parse(trimmed).map_err(|_| {
                        KincError::format(format!(
                            "row {} column {} has an invalid value '{}'",
                            line_idx + 2,
                            col_idx + 2,
                            trimmed
                        ))
                    })?
                };
                row.push(transform.apply(raw));
            }

            if row.len() != sample_count {
                return Err(KincError::format(format!(
                    "row {} ('{}') has {} samples, expected {}",
                    line_idx + 2,
                    gene_name,
                    row.len(),
                    sample_count
                )));
            }

            gene_names.push(gene_name);
            data.extend(row);
        }

        let gene_count = gene_names.len();
        if gene_count == 0 {
            return Err(KincError::domain("expression file has no gene rows"));
        }

        Ok(ExpressionMatrix {
            gene_count: gene_count as u32,
            sample_count: sample_count as u32,
            transform,
            gene_names,
            sample_names,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "kinc_expr_test_{}_{}.tsv",
            std::process::id(),
            contents.len()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn meta(transform: Transform) -> ExpressionMatrixMeta {
        ExpressionMatrixMeta {
            transform,
            nan_token: "NA".to_string(),
        }
    }

    #[test]
    fn loads_plain_matrix() {
        let path = write_temp("corner\tS1\tS2\tS3\nG1\t1\t2\t3\nG2\t4\tNA\t6\n");
        let emx = ExpressionMatrix::load_text(&path, &meta(Transform::None)).unwrap();
        assert_eq!(emx.row_count(), 2);
        assert_eq!(emx.column_count(), 3);
        assert_eq!(emx.at(0, 0), 1.0);
        assert!(emx.at(1, 1).is_nan());
        assert_eq!(emx.gene_name(0), "G1");
        assert_eq!(emx.sample_name(2), "S3");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn log2_transform_maps_non_positive_to_nan() {
        let path = write_temp("corner\tS1\tS2\tS3\nG1\t4\t0\t-2\n");
        let emx = ExpressionMatrix::load_text(&path, &meta(Transform::Log2)).unwrap();
        assert_eq!(emx.at(0, 0), 2.0);
        assert!(emx.at(0, 1).is_nan());
        assert!(emx.at(0, 2).is_nan());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn trailing_blank_lines_are_ignored() {
        let path = write_temp("corner\tS1\tS2\nG1\t1\t2\n\n\n");
        let emx = ExpressionMatrix::load_text(&path, &meta(Transform::None)).unwrap();
        assert_eq!(emx.row_count(), 1);
        std::fs::remove_file(&path).ok();
    }
}

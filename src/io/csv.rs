//! Delimited-text readers for count tables and sample sheets

use std::path::Path;

use ndarray::Array2;
use serde::Deserialize;

use crate::data::{normalize_label, sample_id_from_path, ConditionAssignment, CountMatrix};
use crate::error::{Result, VoomError};

/// Strip surrounding quotes from a string
fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\''))) {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn detect_delimiter(header_line: &str) -> u8 {
    if header_line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// Reader over `content` with the delimiter taken from its first line
fn delimited_reader(content: &str, flexible: bool) -> ::csv::Reader<&[u8]> {
    let delimiter = detect_delimiter(content.lines().next().unwrap_or_default());
    ::csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(flexible)
        .trim(::csv::Trim::All)
        .from_reader(content.as_bytes())
}

/// Read a count matrix from a CSV or TSV file.
///
/// Expected format: first column is gene IDs, first row is sample IDs.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(VoomError::InvalidCountMatrix {
            reason: "Empty count file".to_string(),
        });
    }

    let mut reader = delimited_reader(&content, true);
    let header = reader.headers()?.clone();
    if header.len() < 2 {
        return Err(VoomError::InvalidCountMatrix {
            reason: "Not enough columns in header".to_string(),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(strip_quotes).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids: Vec<String> = Vec::new();
    let mut values: Vec<f64> = Vec::new();

    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        if record.len() != n_samples + 1 {
            return Err(VoomError::InvalidCountMatrix {
                reason: format!("Row has {} columns, expected {}", record.len(), n_samples + 1),
            });
        }

        gene_ids.push(strip_quotes(&record[0]));
        for field in record.iter().skip(1) {
            let val = strip_quotes(field);
            values.push(val.parse::<f64>().map_err(|_| VoomError::InvalidCountMatrix {
                reason: format!("Invalid count value: {}", val),
            })?);
        }
    }

    if gene_ids.is_empty() {
        return Err(VoomError::InvalidCountMatrix {
            reason: "No genes found in count matrix".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        VoomError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    CountMatrix::new(counts, gene_ids, sample_ids)
}

#[derive(Debug, Deserialize)]
struct SampleRecord {
    file: String,
    group: String,
}

/// Read a sample sheet with `file` and `group` columns.
///
/// Sample IDs are derived from the file paths and labels are normalized.
pub fn read_sample_sheet<P: AsRef<Path>>(path: P) -> Result<ConditionAssignment> {
    let content = std::fs::read_to_string(path)?;
    let mut reader = delimited_reader(&content, false);

    let mut sample_ids = Vec::new();
    let mut labels = Vec::new();
    for record in reader.deserialize() {
        let record: SampleRecord = record?;
        sample_ids.push(sample_id_from_path(&record.file));
        labels.push(normalize_label(&record.group));
    }

    if sample_ids.is_empty() {
        return Err(VoomError::InvalidInput {
            reason: "No samples found in sample sheet".to_string(),
        });
    }

    ConditionAssignment::new(sample_ids, labels)
}

/// Read a count table and a sample sheet, with the count columns put in sheet order.
pub fn read_count_table<P: AsRef<Path>, Q: AsRef<Path>>(
    counts_path: P,
    sheet_path: Q,
) -> Result<(CountMatrix, ConditionAssignment)> {
    let counts = read_count_matrix(counts_path)?;
    let conditions = read_sample_sheet(sheet_path)?;
    let counts = counts.reorder_samples(conditions.sample_ids())?;
    log::info!(
        "Loaded {} genes x {} samples from count table",
        counts.n_genes(),
        counts.n_samples()
    );
    Ok((counts, conditions))
}

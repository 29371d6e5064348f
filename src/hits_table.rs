/// Ranked and best-hit tables
///
/// Layout (tab-separated): qseqid, sseqid, pident, pident_gc, qcov, alnlen,
/// mapq, tpr. The table is written with a header line; when reading, the
/// header is optional.
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use crate::error::PipelineError;
use crate::paf::open_input;
use crate::ranking::RankedHit;

pub const COLUMNS: [&str; 8] = [
    "qseqid",
    "sseqid",
    "pident",
    "pident_gc",
    "qcov",
    "alnlen",
    "mapq",
    "tpr",
];

/// The part of a hit the membership join needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitLink {
    pub query_id: String,
    /// None when the row carries no target (`*` or empty)
    pub target_id: Option<String>,
}

impl From<&RankedHit> for HitLink {
    fn from(hit: &RankedHit) -> Self {
        HitLink {
            query_id: hit.query_id().to_string(),
            target_id: Some(hit.target_id().to_string()),
        }
    }
}

fn format_row(hit: &RankedHit) -> String {
    let rec = &hit.record;
    let gc = rec
        .gap_compressed_identity
        .map(|v| format!("{v:.4}"))
        .unwrap_or_default();
    format!(
        "{}\t{}\t{:.4}\t{}\t{:.4}\t{}\t{}\t{}",
        rec.query_id,
        rec.target_id,
        rec.percent_identity,
        gc,
        rec.query_coverage,
        rec.alignment_length,
        rec.mapping_quality,
        if rec.is_primary { 'P' } else { 'S' },
    )
}

pub fn write_hits<W: Write>(writer: &mut W, hits: &[&RankedHit]) -> std::io::Result<()> {
    writeln!(writer, "{}", COLUMNS.join("\t"))?;
    for hit in hits {
        writeln!(writer, "{}", format_row(hit))?;
    }
    Ok(())
}

/// Write a hits table to a file
pub fn write_hits_file<P: AsRef<Path>>(path: P, hits: &[&RankedHit]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create hits table {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_hits(&mut writer, hits)?;
    writer.flush()?;
    log::info!("Wrote {} hits to {}", hits.len(), path.display());
    Ok(())
}

/// Read query/target pairs from a hits table
pub fn read_hit_links<R: BufRead>(
    reader: R,
    path: &Path,
) -> std::result::Result<Vec<HitLink>, PipelineError> {
    let mut links = Vec::new();
    let mut query_col = 0;
    let mut target_col = 1;
    let mut first = true;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Vec<&str> = line.split('\t').collect();

        if first {
            first = false;
            let columns: HashMap<String, usize> = row
                .iter()
                .enumerate()
                .map(|(i, c)| (c.trim().to_lowercase(), i))
                .collect();
            if let (Some(&q), Some(&t)) = (columns.get("qseqid"), columns.get("sseqid")) {
                if row.len() != COLUMNS.len() {
                    return Err(PipelineError::parse(
                        path,
                        idx + 1,
                        format!("hits header has {} columns, expected {}", row.len(), COLUMNS.len()),
                    ));
                }
                query_col = q;
                target_col = t;
                continue;
            }
        }

        if row.len() != COLUMNS.len() {
            return Err(PipelineError::parse(
                path,
                idx + 1,
                format!(
                    "hits row has {} columns, expected {} ({})",
                    row.len(),
                    COLUMNS.len(),
                    COLUMNS.join(",")
                ),
            ));
        }

        let query_id = row[query_col].trim();
        if query_id.is_empty() {
            return Err(PipelineError::parse(path, idx + 1, "empty query id"));
        }
        let target = row[target_col].trim();
        links.push(HitLink {
            query_id: query_id.to_string(),
            target_id: match target {
                "" | "*" => None,
                t => Some(t.to_string()),
            },
        });
    }

    Ok(links)
}

pub fn read_hits_file<P: AsRef<Path>>(path: P) -> Result<Vec<HitLink>> {
    let path = path.as_ref();
    let input = open_input(path)
        .with_context(|| format!("Failed to open hits table {}", path.display()))?;
    let links = read_hit_links(input, path)?;
    log::info!("Read {} hits from {}", links.len(), path.display());
    Ok(links)
}

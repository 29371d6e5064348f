use crate::error::{PipelineError, Result};
use flate2::read::MultiGzDecoder;
use noodles::bgzf;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Mapping quality value minimap2 uses for "not available"
pub const MAPQ_UNAVAILABLE: u8 = 255;

/// Open a file and auto-detect compression, returning a boxed BufRead
///
/// `.bgz` goes through the bgzf reader, `.gz` through a multi-member gzip
/// decoder (which also accepts bgzf data).
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let file = File::open(path)?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("bgz") => Ok(Box::new(BufReader::new(bgzf::io::reader::Reader::new(file)))),
        Some("gz") => Ok(Box::new(BufReader::new(MultiGzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

/// Alignment type from the `tp:A:` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentClass {
    Primary,
    Secondary,
    Inversion,
}

impl AlignmentClass {
    fn from_tag(value: &str) -> Option<Self> {
        match value {
            "P" => Some(AlignmentClass::Primary),
            "S" => Some(AlignmentClass::Secondary),
            "I" | "i" => Some(AlignmentClass::Inversion),
            _ => None,
        }
    }
}

/// One candidate alignment of a query against a reference
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub query_id: String,
    pub target_id: String,
    /// 100 * matches / block length
    pub percent_identity: f64,
    /// 100 * (1 - de), absent when the aligner did not report `de:f`
    pub gap_compressed_identity: Option<f64>,
    /// Percentage of the query covered by the alignment
    pub query_coverage: f64,
    pub alignment_length: u32,
    pub mapping_quality: u8,
    pub is_primary: bool,
}

impl AlignmentRecord {
    /// Identity used for ranking: gap-compressed when reported, raw otherwise
    pub fn effective_identity(&self) -> f64 {
        self.gap_compressed_identity.unwrap_or(self.percent_identity)
    }
}

/// Streaming PAF reader producing typed alignment records
///
/// Inversion alignments are skipped. Anything else that does not parse
/// is an error carrying the line number.
pub struct PafReader<R: BufRead> {
    reader: R,
    path: PathBuf,
    line_number: usize,
    skipped: usize,
}

impl PafReader<Box<dyn BufRead + Send>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let input = open_input(&path)?;
        Ok(PafReader::new(input, path.as_ref()))
    }
}

impl<R: BufRead> PafReader<R> {
    pub fn new<P: Into<PathBuf>>(reader: R, path: P) -> Self {
        PafReader {
            reader,
            path: path.into(),
            line_number: 0,
            skipped: 0,
        }
    }

    /// Number of inversion lines dropped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn read_record(&mut self) -> Result<Option<AlignmentRecord>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match parse_paf_line(trimmed) {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => self.skipped += 1,
                Err(message) => {
                    return Err(PipelineError::parse(&self.path, self.line_number, message))
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<AlignmentRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], idx: usize, name: &str) -> std::result::Result<T, String> {
    fields[idx]
        .parse()
        .map_err(|_| format!("invalid {name} '{}'", fields[idx]))
}

/// Parse one PAF line. `Ok(None)` means the line is an inversion and not a hit.
pub fn parse_paf_line(line: &str) -> std::result::Result<Option<AlignmentRecord>, String> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() < 12 {
        return Err(format!(
            "PAF line has {} fields, at least 12 required",
            fields.len()
        ));
    }

    let query_len: u64 = parse_field(&fields, 1, "query length")?;
    let query_start: u64 = parse_field(&fields, 2, "query start")?;
    let query_end: u64 = parse_field(&fields, 3, "query end")?;
    let matches: u64 = parse_field(&fields, 9, "residue match count")?;
    let block_len: u32 = parse_field(&fields, 10, "alignment block length")?;
    let quality: u8 = parse_field(&fields, 11, "mapping quality")?;

    let mut class = AlignmentClass::Primary;
    let mut gap_compressed_identity = None;

    for field in &fields[12..] {
        if let Some(value) = field.strip_prefix("tp:A:") {
            class = AlignmentClass::from_tag(value)
                .ok_or_else(|| format!("unknown alignment type 'tp:A:{value}'"))?;
        } else if let Some(value) = field.strip_prefix("de:f:") {
            let divergence: f64 = value
                .parse()
                .ok()
                .filter(|d: &f64| (0.0..=1.0).contains(d))
                .ok_or_else(|| format!("invalid gap-compressed divergence '{value}'"))?;
            gap_compressed_identity = Some((1.0 - divergence) * 100.0);
        }
    }

    if class == AlignmentClass::Inversion {
        return Ok(None);
    }

    if query_start > query_end || query_end > query_len {
        return Err(format!(
            "query interval {query_start}-{query_end} does not fit query length {query_len}"
        ));
    }

    let percent_identity = if block_len > 0 {
        matches as f64 / block_len as f64 * 100.0
    } else {
        0.0
    };

    let query_coverage = if query_len > 0 {
        (query_end - query_start) as f64 / query_len as f64 * 100.0
    } else {
        0.0
    };

    let mapping_quality = if quality == MAPQ_UNAVAILABLE { 0 } else { quality };

    Ok(Some(AlignmentRecord {
        query_id: fields[0].to_string(),
        target_id: fields[5].to_string(),
        percent_identity,
        gap_compressed_identity,
        query_coverage,
        alignment_length: block_len,
        mapping_quality,
        is_primary: class == AlignmentClass::Primary,
    }))
}

/// Read every hit of a PAF file (auto-detects compression)
pub fn read_paf_file<P: AsRef<Path>>(path: P) -> Result<Vec<AlignmentRecord>> {
    let mut reader = PafReader::open(&path)?;
    let records = reader.read_all()?;
    log::info!(
        "Read {} alignments from {} ({} inversion lines skipped)",
        records.len(),
        path.as_ref().display(),
        reader.skipped()
    );
    Ok(records)
}

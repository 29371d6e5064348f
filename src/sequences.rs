//! Sequence sources and id lookup
//!
//! Reference and query FASTA files are loaded into id → sequence tables and
//! merged into one lookup. On an id present in both, the query sequence wins.

use anyhow::{Context, Result};
use noodles::fasta;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::error::PipelineError;
use crate::paf::open_input;

/// Where a sequence came from; the discriminant is its priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SequenceSource {
    Reference = 0,
    Query = 1,
}

impl SequenceSource {
    pub fn priority(self) -> u8 {
        self as u8
    }
}

/// Sequences of one source keyed by id, ids unique within the source
#[derive(Debug, Clone, Default)]
pub struct SequenceTable {
    sequences: HashMap<String, String>,
}

impl SequenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sequence; returns false (and keeps the old one) on a duplicate id
    pub fn insert(&mut self, id: String, sequence: String) -> bool {
        use std::collections::hash_map::Entry;
        match self.sequences.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(sequence);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.sequences.get(id).map(|s| s.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sequences.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl<S: Into<String>, T: Into<String>> FromIterator<(S, T)> for SequenceTable {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        let mut table = SequenceTable::new();
        for (id, seq) in iter {
            table.insert(id.into(), seq.into());
        }
        table
    }
}

/// Parse FASTA records into a table. Record ids are the header text up to
/// the first whitespace; a repeated id is an error.
pub fn read_fasta<R: BufRead>(
    reader: R,
    path: &Path,
) -> std::result::Result<SequenceTable, PipelineError> {
    let mut fasta_reader = fasta::io::Reader::new(reader);
    let mut table = SequenceTable::new();

    for (idx, result) in fasta_reader.records().enumerate() {
        let record = result.map_err(|e| {
            PipelineError::fasta_record(
                path,
                idx + 1,
                format!("failed to parse FASTA record: {e}"),
            )
        })?;

        let id = String::from_utf8_lossy(record.name()).to_string();
        let sequence = String::from_utf8_lossy(record.sequence().as_ref()).to_string();

        if !table.insert(id.clone(), sequence) {
            return Err(PipelineError::fasta_record(
                path,
                idx + 1,
                format!("duplicate sequence id '{id}'"),
            ));
        }
    }

    Ok(table)
}

/// Load a FASTA file (plain, gzip or bgzip)
pub fn read_fasta_file<P: AsRef<Path>>(path: P) -> Result<SequenceTable> {
    let path = path.as_ref();
    let input =
        open_input(path).with_context(|| format!("Failed to open FASTA: {}", path.display()))?;
    let table = read_fasta(input, path)?;
    log::info!("Loaded {} sequences from {}", table.len(), path.display());
    Ok(table)
}

#[derive(Debug, Clone)]
struct ResolvedSequence {
    sequence: String,
    source: SequenceSource,
}

/// Single id → sequence lookup over both sources
#[derive(Debug, Clone, Default)]
pub struct SequenceResolver {
    sequences: HashMap<String, ResolvedSequence>,
}

impl SequenceResolver {
    /// Merge the two sources. The query table goes in last and, having the
    /// higher priority, replaces any reference sequence with the same id.
    pub fn new(reference: SequenceTable, query: SequenceTable) -> Self {
        let mut sequences: HashMap<String, ResolvedSequence> =
            HashMap::with_capacity(reference.len() + query.len());
        let mut overridden = 0usize;

        for (source, table) in [
            (SequenceSource::Reference, reference),
            (SequenceSource::Query, query),
        ] {
            for (id, sequence) in table.sequences {
                let candidate = ResolvedSequence { sequence, source };
                match sequences.get_mut(&id) {
                    Some(existing) => {
                        if candidate.source.priority() > existing.source.priority() {
                            *existing = candidate;
                            overridden += 1;
                        }
                    }
                    None => {
                        sequences.insert(id, candidate);
                    }
                }
            }
        }

        if overridden > 0 {
            log::info!("{overridden} reference ids shadowed by query sequences with the same id");
        }

        SequenceResolver { sequences }
    }

    /// Sequence for `id`; a missing id is a referential integrity error
    pub fn resolve(&self, id: &str, cluster_id: &str) -> std::result::Result<&str, PipelineError> {
        self.sequences
            .get(id)
            .map(|r| r.sequence.as_str())
            .ok_or_else(|| PipelineError::MissingSequence {
                id: id.to_string(),
                cluster_id: cluster_id.to_string(),
            })
    }

    pub fn source_of(&self, id: &str) -> Option<SequenceSource> {
        self.sequences.get(id).map(|r| r.source)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

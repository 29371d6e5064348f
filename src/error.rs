/// Error taxonomy for a hitclust run
///
/// Every variant except `Io` maps to one failure class of the pipeline.
/// None of them are retried: the caller re-runs the whole batch after a fix.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad option value detected before any input is read
    #[error("invalid parameter: {0}")]
    Validation(String),

    /// Malformed alignment, membership, hit-table or FASTA record
    #[error("{}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// FASTA input positions are counted in records, not lines
    #[error("{}: record {record}: {message}", .path.display())]
    FastaRecord {
        path: PathBuf,
        record: usize,
        message: String,
    },

    /// A cluster member has no sequence in either source
    #[error("no sequence for member '{id}' of cluster '{cluster_id}'")]
    MissingSequence { id: String, cluster_id: String },

    #[error(
        "query sequence conservation failed: {input} input queries, {output} written (delta {delta:+})"
    )]
    ConservationMismatch {
        input: usize,
        output: usize,
        delta: i64,
    },

    /// Fragmented cluster output that could not be merged back into one file
    #[error("failed to merge fragmented output of cluster {cluster}: {source}")]
    FragmentMerge {
        cluster: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn parse<P: Into<PathBuf>>(path: P, line: usize, message: impl Into<String>) -> Self {
        PipelineError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn fasta_record<P: Into<PathBuf>>(
        path: P,
        record: usize,
        message: impl Into<String>,
    ) -> Self {
        PipelineError::FastaRecord {
            path: path.into(),
            record,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

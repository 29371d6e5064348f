/// Run configuration shared by the pipeline stages
use std::num::NonZeroUsize;

use crate::error::PipelineError;

/// Default memory hint when none is given
pub const DEFAULT_MEMORY_LIMIT: &str = "2G";

/// Smallest per-task write buffer regardless of the memory hint
pub const MIN_CHUNK_BYTES: u64 = 64 * 1024;

/// Parse a number that may have metric suffix (k/K=1000, m/M=1e6, g/G=1e9)
pub fn parse_metric_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty string".to_string());
    }

    let (num_part, suffix) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - c.len_utf8()], Some(c)),
        _ => (s, None),
    };

    let base: f64 = num_part
        .parse()
        .map_err(|e| format!("Invalid number: {e}"))?;

    let multiplier = match suffix {
        Some('k') | Some('K') => 1e3,
        Some('m') | Some('M') => 1e6,
        Some('g') | Some('G') => 1e9,
        Some(c) => {
            return Err(format!(
                "Unknown suffix '{c}'. Use k/K (1000), m/M (1e6), or g/G (1e9)"
            ))
        }
        None => 1.0,
    };

    let result = base * multiplier;

    if !result.is_finite() || result < 0.0 {
        return Err(format!("Value {result} is not a valid size"));
    }
    if result > u64::MAX as f64 {
        return Err(format!("Value {result} too large"));
    }

    Ok(result as u64)
}

/// Parse a strictly positive count (threads, top-N)
pub fn parse_positive_count(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("value must be a positive integer".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("Invalid number: {e}")),
    }
}

/// Parse a strictly positive size such as `512M` or `4G`
pub fn parse_memory_limit(s: &str) -> Result<u64, String> {
    match parse_metric_number(s)? {
        0 => Err("memory limit must be positive".to_string()),
        n => Ok(n),
    }
}

/// Validated parameters of one run
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub top_n: NonZeroUsize,
    pub threads: NonZeroUsize,
    pub memory_limit: u64,
}

impl RunConfig {
    /// Hits kept per query unless configured otherwise
    pub const DEFAULT_TOP_N: usize = 10;

    pub fn new(threads: usize, memory_limit: u64) -> Result<Self, PipelineError> {
        let threads = NonZeroUsize::new(threads)
            .ok_or_else(|| PipelineError::Validation("thread count must be positive".into()))?;
        if memory_limit == 0 {
            return Err(PipelineError::Validation("memory limit must be positive".into()));
        }
        Ok(RunConfig {
            top_n: NonZeroUsize::new(Self::DEFAULT_TOP_N).unwrap_or(NonZeroUsize::MIN),
            threads,
            memory_limit,
        })
    }

    pub fn with_top_n(mut self, top_n: usize) -> Result<Self, PipelineError> {
        self.top_n = NonZeroUsize::new(top_n)
            .ok_or_else(|| PipelineError::Validation("top-N must be a positive integer".into()))?;
        Ok(self)
    }

    /// Bytes one cluster writer may buffer before spilling a chunk
    pub fn chunk_budget(&self) -> u64 {
        (self.memory_limit / self.threads.get() as u64).max(MIN_CHUNK_BYTES)
    }
}

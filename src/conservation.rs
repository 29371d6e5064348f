/// End-to-end query conservation check
///
/// Every input query must come out in exactly one cluster file. Counting is
/// done over query members of the written clusters, never over FASTA lines,
/// since reference records share the files.
use std::collections::{BTreeSet, HashSet};

use crate::error::PipelineError;
use crate::partition::WrittenCluster;

/// How many example ids to log per problem category
const MAX_REPORTED_IDS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConservationReport {
    /// Distinct ids in the input query set
    pub input_queries: usize,
    /// Query members across all written clusters, duplicates included
    pub output_queries: usize,
    /// Queries written to more than one cluster
    pub duplicated: Vec<String>,
    /// Input queries not written anywhere
    pub missing: Vec<String>,
    /// Written query ids not present in the input
    pub unexpected: Vec<String>,
}

impl ConservationReport {
    pub fn delta(&self) -> i64 {
        self.output_queries as i64 - self.input_queries as i64
    }

    pub fn is_conserved(&self) -> bool {
        self.input_queries == self.output_queries
            && self.duplicated.is_empty()
            && self.missing.is_empty()
            && self.unexpected.is_empty()
    }
}

/// Compare input query ids against the query members of written clusters
pub fn check_conservation<'a, I>(input_query_ids: I, written: &[WrittenCluster]) -> ConservationReport
where
    I: IntoIterator<Item = &'a str>,
{
    let input: HashSet<&str> = input_query_ids.into_iter().collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut duplicated = BTreeSet::new();
    let mut output_queries = 0usize;

    for cluster in written {
        for id in &cluster.query_ids {
            output_queries += 1;
            if !seen.insert(id.as_str()) {
                duplicated.insert(id.to_string());
            }
        }
    }

    let missing: BTreeSet<String> = input
        .iter()
        .filter(|id| !seen.contains(*id))
        .map(|id| id.to_string())
        .collect();
    let unexpected: BTreeSet<String> = seen
        .iter()
        .filter(|id| !input.contains(*id))
        .map(|id| id.to_string())
        .collect();

    ConservationReport {
        input_queries: input.len(),
        output_queries,
        duplicated: duplicated.into_iter().collect(),
        missing: missing.into_iter().collect(),
        unexpected: unexpected.into_iter().collect(),
    }
}

fn log_examples(label: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    let shown: Vec<&str> = ids.iter().take(MAX_REPORTED_IDS).map(|s| s.as_str()).collect();
    let more = if ids.len() > shown.len() { ", ..." } else { "" };
    log::error!("{} {label}: {}{more}", ids.len(), shown.join(", "));
}

/// Fail unless the written clusters conserve the input query set exactly
pub fn validate_conservation<'a, I>(
    input_query_ids: I,
    written: &[WrittenCluster],
) -> Result<ConservationReport, PipelineError>
where
    I: IntoIterator<Item = &'a str>,
{
    let report = check_conservation(input_query_ids, written);

    if !report.is_conserved() {
        log_examples("queries missing from output", &report.missing);
        log_examples("queries written to several clusters", &report.duplicated);
        log_examples("written queries absent from input", &report.unexpected);
        return Err(PipelineError::ConservationMismatch {
            input: report.input_queries,
            output: report.output_queries,
            delta: report.delta(),
        });
    }

    log::info!(
        "Conservation check passed: {} query sequences in, {} out",
        report.input_queries,
        report.output_queries
    );
    Ok(report)
}

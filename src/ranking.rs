/// Per-query hit ranking
///
/// All candidate alignments of a query compete with each other; the
/// comparator below decides the order and the list is cut to the top N.
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use crate::paf::AlignmentRecord;

/// An alignment together with its 1-based position among the query's hits
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub record: AlignmentRecord,
    pub rank: usize,
}

impl RankedHit {
    pub fn query_id(&self) -> &str {
        &self.record.query_id
    }

    pub fn target_id(&self) -> &str {
        &self.record.target_id
    }
}

/// Order two hits of the same query, best first.
///
/// Keys, in order: primary before secondary, effective identity (descending),
/// query coverage (descending), alignment length (descending), mapping
/// quality (ascending). Lower mapping quality winning the last tie is the
/// long-standing behaviour downstream tools were calibrated against; keep it.
pub fn compare_hits(a: &AlignmentRecord, b: &AlignmentRecord) -> Ordering {
    b.is_primary
        .cmp(&a.is_primary)
        .then_with(|| OrderedFloat(b.effective_identity()).cmp(&OrderedFloat(a.effective_identity())))
        .then_with(|| OrderedFloat(b.query_coverage).cmp(&OrderedFloat(a.query_coverage)))
        .then_with(|| b.alignment_length.cmp(&a.alignment_length))
        .then_with(|| a.mapping_quality.cmp(&b.mapping_quality))
}

/// Ranks hits per query and keeps the best `top_n` of each
#[derive(Debug, Clone, Copy)]
pub struct HitRanker {
    top_n: NonZeroUsize,
}

impl HitRanker {
    pub fn new(top_n: NonZeroUsize) -> Self {
        HitRanker { top_n }
    }

    /// Ranker that keeps only the single best hit per query
    pub fn best_hit() -> Self {
        HitRanker {
            top_n: NonZeroUsize::MIN,
        }
    }

    pub fn top_n(&self) -> usize {
        self.top_n.get()
    }

    /// Rank all hits. Output is grouped by query id (ascending), rank order
    /// within each group. Equal hits keep their input order.
    pub fn rank(&self, records: Vec<AlignmentRecord>) -> Vec<RankedHit> {
        let mut by_query: BTreeMap<String, Vec<AlignmentRecord>> = BTreeMap::new();
        for record in records {
            by_query
                .entry(record.query_id.clone())
                .or_default()
                .push(record);
        }

        let top_n = self.top_n.get();
        let groups: Vec<Vec<AlignmentRecord>> = by_query.into_values().collect();

        let ranked: Vec<Vec<RankedHit>> = groups
            .into_par_iter()
            .map(|mut group| {
                // sort_by is stable, so full ties stay in input order
                group.sort_by(compare_hits);
                group.truncate(top_n);
                group
                    .into_iter()
                    .enumerate()
                    .map(|(i, record)| RankedHit { record, rank: i + 1 })
                    .collect()
            })
            .collect();

        let hits: Vec<RankedHit> = ranked.into_iter().flatten().collect();
        log::debug!("Ranked {} hits (top {} per query)", hits.len(), top_n);
        hits
    }
}

/// Rank-1 hits only, one per query
pub fn best_hits(hits: &[RankedHit]) -> Vec<&RankedHit> {
    hits.iter().filter(|h| h.rank == 1).collect()
}

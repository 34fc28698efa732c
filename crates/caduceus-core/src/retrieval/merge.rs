//! Merging and agreement over settled backend results.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::EvidenceItem;

/// Items returned by one backend, in that backend's rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResults {
    pub backend: String,
    pub items: Vec<EvidenceItem>,
}

impl BackendResults {
    pub fn new(backend: impl Into<String>, items: Vec<EvidenceItem>) -> Self {
        Self {
            backend: backend.into(),
            items,
        }
    }

    fn hash_set(&self) -> BTreeSet<&str> {
        self.items.iter().map(|item| item.doc_hash.as_str()).collect()
    }
}

/// Single-backend path: items are propagated unmodified, truncated to `top_k`.
pub fn passthrough(results: BackendResults, top_k: usize) -> Vec<EvidenceItem> {
    let mut items = results.items;
    items.truncate(top_k);
    items
}

struct Group {
    representative: EvidenceItem,
    best_rank: usize,
    scores: Vec<f64>,
}

/// Merge several backends' results into one ranked list.
///
/// Items are grouped by `doc_hash`. A hash seen by k backends scores the
/// arithmetic mean of its k scores. Within one backend only the first
/// (best-ranked) occurrence of a hash counts. Output is sorted by score
/// descending, then by smallest backend rank, then by hash, and truncated to
/// `top_k`.
pub fn merge(results: &[BackendResults], top_k: usize) -> Vec<EvidenceItem> {
    let mut groups: BTreeMap<&str, Group> = BTreeMap::new();

    for backend in results {
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for (rank, item) in backend.items.iter().enumerate() {
            let hash = item.doc_hash.as_str();
            if !seen.insert(hash) {
                continue;
            }

            match groups.get_mut(hash) {
                Some(group) => {
                    group.scores.push(item.score);
                    if rank < group.best_rank {
                        group.best_rank = rank;
                        group.representative = item.clone();
                    }
                }
                None => {
                    groups.insert(
                        hash,
                        Group {
                            representative: item.clone(),
                            best_rank: rank,
                            scores: vec![item.score],
                        },
                    );
                }
            }
        }
    }

    let mut merged: Vec<(usize, EvidenceItem)> = groups
        .into_values()
        .map(|group| {
            let mut item = group.representative;
            item.score = mean(&group.scores);
            (group.best_rank, item)
        })
        .collect();

    merged.sort_by(|(rank_a, a), (rank_b, b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| rank_a.cmp(rank_b))
            .then_with(|| a.doc_hash.cmp(&b.doc_hash))
    });

    merged
        .into_iter()
        .take(top_k)
        .map(|(_, item)| item)
        .collect()
}

/// Mean pairwise Jaccard similarity of the backends' doc-hash sets.
///
/// Only backends that returned at least one item take part. With fewer than
/// two such backends there is nothing to disagree about and the score is 1.0.
pub fn agreement_score(results: &[BackendResults]) -> f64 {
    let sets: Vec<BTreeSet<&str>> = results
        .iter()
        .filter(|r| !r.items.is_empty())
        .map(BackendResults::hash_set)
        .collect();

    if sets.len() < 2 {
        return 1.0;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;

    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            total += jaccard(&sets[i], &sets[j]);
            pairs += 1;
        }
    }

    total / pairs as f64
}

fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

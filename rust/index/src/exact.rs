use std::collections::HashSet;

use docsim_distance::squared_euclidean;
use rayon::prelude::*;

use crate::types::{DocumentId, Neighbor};

/// Brute-force k nearest neighbors over raw vectors, nearest first. Equal
/// distances keep input order. Used as ground truth when measuring recall.
pub fn exact_search<V: AsRef<[f32]> + Sync>(
    corpus: &[(DocumentId, V)],
    query: &[f32],
    k: usize,
) -> Vec<Neighbor> {
    let mut scored: Vec<(usize, f32)> = corpus
        .par_iter()
        .enumerate()
        .map(|(position, (_, vector))| (position, squared_euclidean(query, vector.as_ref())))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    scored
        .into_iter()
        .take(k)
        .map(|(position, distance)| Neighbor {
            doc_id: corpus[position].0.clone(),
            distance,
        })
        .collect()
}

/// Fraction of the first `k` ground-truth ids that appear among the first `k`
/// approximate results. Empty ground truth counts as full recall.
pub fn recall_at_k(ground_truth: &[Neighbor], approximate: &[Neighbor], k: usize) -> f64 {
    let expected: HashSet<&DocumentId> = ground_truth.iter().take(k).map(|n| &n.doc_id).collect();
    if expected.is_empty() {
        return 1.0;
    }
    let found = approximate
        .iter()
        .take(k)
        .filter(|n| expected.contains(&n.doc_id))
        .count();
    found as f64 / expected.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(id: &str) -> Neighbor {
        Neighbor {
            doc_id: id.into(),
            distance: 0.0,
        }
    }

    #[test]
    fn test_exact_search_orders_by_distance() {
        let corpus = vec![
            (DocumentId::from("far"), vec![5.0f32, 5.0]),
            (DocumentId::from("near"), vec![1.0, 0.0]),
            (DocumentId::from("tie"), vec![0.0, 1.0]),
            (DocumentId::from("self"), vec![0.0, 0.0]),
        ];
        let results = exact_search(&corpus, &[0.0, 0.0], 3);
        let ids: Vec<&str> = results.iter().map(|n| n.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["self", "near", "tie"]);
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(exact_search(&corpus, &[0.0, 0.0], 10).len(), 4);
    }

    #[test]
    fn test_recall_at_k() {
        let truth = vec![neighbor("a"), neighbor("b"), neighbor("c")];
        assert_eq!(recall_at_k(&truth, &[neighbor("b"), neighbor("a")], 2), 1.0);
        assert_eq!(recall_at_k(&truth, &[neighbor("a"), neighbor("c")], 2), 0.5);
        assert_eq!(recall_at_k(&truth, &[], 3), 0.0);
        assert_eq!(recall_at_k(&[], &[neighbor("a")], 3), 1.0);
    }
}

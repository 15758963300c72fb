use std::sync::Arc;

use docsim_index::{exact_search, recall_at_k, DocumentId, IvfPqIndex, IvfPqParams, KMeansParams};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_items(rng: &mut StdRng, n: usize, dim: usize) -> Vec<(DocumentId, Vec<f32>)> {
    (0..n)
        .map(|i| {
            let vector = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            (DocumentId::from(format!("doc-{}", i)), vector)
        })
        .collect()
}

fn build(params: IvfPqParams, items: &[(DocumentId, Vec<f32>)]) -> IvfPqIndex {
    let samples: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();
    let mut index = IvfPqIndex::new(params).unwrap();
    index.train_index(&samples, None).unwrap();
    let outcome = index.add_batch(items).unwrap();
    assert_eq!(outcome.added, items.len());
    index
}

#[test]
fn test_recall_grows_with_nprobe() {
    // One byte per dimension and exactly 2^nbits training vectors: every
    // sub-codebook memorizes its training values, so codes are lossless and
    // only partition pruning costs recall.
    let mut rng = StdRng::seed_from_u64(7);
    let items = random_items(&mut rng, 256, 8);
    let nlist = 8;
    let index = build(IvfPqParams::new(8, nlist, 8, 8), &items);
    let queries = random_items(&mut rng, 20, 8);
    let k = 10;

    let mut previous = vec![0.0; queries.len()];
    for nprobe in 1..=nlist {
        for (q, (_, query)) in queries.iter().enumerate() {
            let truth = exact_search(&items, query, k);
            let found = index.search(query, k, nprobe).unwrap();
            let recall = recall_at_k(&truth, &found, k);
            assert!(
                recall >= previous[q],
                "recall dropped from {} to {} at nprobe {}",
                previous[q],
                recall,
                nprobe
            );
            previous[q] = recall;
        }
    }
    assert!(previous.iter().all(|recall| *recall == 1.0));
}

#[test]
fn test_results_are_sorted_and_bounded() {
    let mut rng = StdRng::seed_from_u64(11);
    let items = random_items(&mut rng, 500, 16);
    let index = build(IvfPqParams::new(16, 10, 4, 4), &items);
    for (_, query) in random_items(&mut rng, 10, 16) {
        let results = index.search(&query, 25, 3).unwrap();
        assert!(results.len() <= 25);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(results.iter().all(|n| n.distance >= 0.0));
    }
    assert_eq!(index.search(&items[0].1, 1000, 10).unwrap().len(), 500);
}

#[test]
fn test_reloaded_index_answers_identically() {
    let mut rng = StdRng::seed_from_u64(3);
    let items = random_items(&mut rng, 300, 12);
    let index = build(IvfPqParams::new(12, 6, 3, 5), &items);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docsim.idx");
    index.save(&path).unwrap();
    let loaded = IvfPqIndex::load(&path).unwrap();

    assert_eq!(loaded.len(), index.len());
    assert_eq!(loaded.partition_sizes().unwrap(), index.partition_sizes().unwrap());
    for (_, query) in random_items(&mut rng, 15, 12) {
        for nprobe in [1, 3, 6] {
            assert_eq!(
                loaded.search(&query, 7, nprobe).unwrap(),
                index.search(&query, 7, nprobe).unwrap()
            );
        }
    }

    // New entries keep sorting after the loaded ones on ties.
    loaded.add("late".into(), &items[0].1).unwrap();
    let results = loaded.search(&items[0].1, 301, 6).unwrap();
    let position = |id: &str| results.iter().position(|n| n.doc_id.as_str() == id).unwrap();
    assert!(position(items[0].0.as_str()) < position("late"));
}

#[test]
fn test_concurrent_add_and_search() {
    let mut rng = StdRng::seed_from_u64(21);
    let training = random_items(&mut rng, 400, 8);
    let samples: Vec<&[f32]> = training.iter().map(|(_, v)| v.as_slice()).collect();
    let mut index = IvfPqIndex::new(IvfPqParams::new(8, 8, 4, 4)).unwrap();
    index.train_index(&samples, None).unwrap();
    let index = Arc::new(index);

    let writers: Vec<_> = (0..4)
        .map(|worker| {
            let index = index.clone();
            let batch = training[worker * 100..(worker + 1) * 100].to_vec();
            std::thread::spawn(move || {
                for (doc_id, vector) in batch {
                    index.add(doc_id, &vector).unwrap();
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..4)
        .map(|reader| {
            let index = index.clone();
            let query = training[reader].1.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let results = index.search(&query, 5, 4).unwrap();
                    assert!(results.len() <= 5);
                    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
                }
            })
        })
        .collect();
    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    assert_eq!(index.len(), 400);
    assert_eq!(index.partition_sizes().unwrap().iter().sum::<usize>(), 400);
}

#[test]
fn test_same_seed_same_index() {
    let mut rng = StdRng::seed_from_u64(5);
    let items = random_items(&mut rng, 200, 8);
    let params =
        IvfPqParams::new(8, 4, 2, 4).with_kmeans(KMeansParams::default().with_seed(99));
    let a = build(params.clone(), &items);
    let b = build(params, &items);
    assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());
}

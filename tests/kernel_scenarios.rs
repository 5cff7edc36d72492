//! End-to-end scenarios over the full stack: binary alignment on disk,
//! model composition, engine assembly, evaluation, reduction.

mod common;

use common::*;

use float_cmp::assert_approx_eq;
use pretty_assertions::assert_eq as assert_eq_pretty;

use phylik::{
    pomo, AlignmentStore, BinaryAlignment, DataType, EigenDecomp, KernelConfig, LikelihoodEngine,
    PartitionMeta, PartitionModel, RateHet, RateModel, TipData, Tree,
};

#[test]
fn binary_alignment_round_trips_through_a_file() {
    let alignment = dna_alignment(
        &["Homo", "Pan", "Gorilla", "Pongo"],
        vec![vec![A, C, N], vec![A, C, G], vec![T, C, G], vec![T, N, G]],
        vec![3, 1, 2],
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alignment.phy.bin");
    alignment.write_to(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let store = AlignmentStore::decode(
        &bytes,
        &[phylik::Assignment { partition: 0, offset: 0, width: 3 }],
    ).unwrap();

    // re-encode what was decoded: bit-identical on the same host
    let decoded = BinaryAlignment {
        taxa_names: store.taxa_names.clone(),
        weights: store.blocks[0].weights.clone(),
        partitions: vec![(store.partitions[0].clone(), store.blocks[0].tips.clone())],
    };
    let mut re_encoded = Vec::new();
    decoded.encode(&mut re_encoded).unwrap();
    assert_eq_pretty!(bytes, re_encoded);

    // and the mapped loader agrees with the in-memory decoder
    let loaded = AlignmentStore::load(
        &path,
        &[phylik::Assignment { partition: 0, offset: 0, width: 3 }],
    ).unwrap();
    assert_eq!(loaded.taxa_names, store.taxa_names);
    assert_eq!(loaded.blocks[0].tips, store.blocks[0].tips);
}

#[test]
fn reduction_is_deterministic_across_worker_counts() {
    // a fixed-seed random alignment wide enough to split 8 ways
    let mut rng = fastrand::Rng::with_seed(42);
    let width = 64;
    let codes = [A, C, G, T, N];
    let columns: Vec<Vec<u8>> = (0..4)
        .map(|_| (0..width).map(|_| codes[rng.usize(..codes.len())]).collect())
        .collect();
    let weights: Vec<i32> = (0..width).map(|_| rng.i32(1..4)).collect();
    let alignment = dna_alignment(&["a", "b", "c", "d"], columns, weights);
    let tree = quartet([0.1, 0.2, 0.15, 0.3], 0.25);
    let model = || PartitionModel::jc69(RateModel::gamma(0.8).unwrap()).unwrap();
    let kernel_config = KernelConfig::default();

    let mut reference = None;
    for workers in [1usize, 2, 4, 8] {
        let (store, assignments) = in_memory_store(&alignment, workers);
        let mut engine = LikelihoodEngine::single_rank(
            tree.clone(), store, vec![model()], &kernel_config, &assignments,
        ).unwrap();
        let ll = engine.evaluate((4, 5), true).unwrap();

        match reference {
            None => reference = Some(ll),
            Some(expected) => {
                // site terms are bit-identical across splits; only the fold
                // order differs, so deviations stay within a few ulps
                let tolerance = 1e-12 * expected.abs();
                assert!((ll - expected).abs() <= tolerance,
                    "workers={workers}: {ll} deviates from {expected}");
            }
        }
    }
}

#[test]
fn all_gap_column_contributes_nothing_under_plain() {
    let base = dna_alignment(
        &["a", "b", "c", "d"],
        vec![vec![A, C], vec![G, C], vec![C, T], vec![C, A]],
        vec![1, 1],
    );
    let gappy = dna_alignment(
        &["a", "b", "c", "d"],
        vec![vec![A, C, N], vec![G, C, N], vec![C, T, N], vec![C, A, N]],
        vec![1, 1, 7],
    );
    let tree = quartet([0.1, 0.15, 0.2, 0.12], 0.3);
    let kernel_config = KernelConfig { rate_het: RateHet::Plain, ..Default::default() };

    let mut lls = Vec::new();
    for alignment in [&base, &gappy] {
        let (store, assignments) = in_memory_store(alignment, 1);
        let model = PartitionModel::jc69(RateModel::plain()).unwrap();
        let mut engine = LikelihoodEngine::single_rank(
            tree.clone(), store, vec![model], &kernel_config, &assignments,
        ).unwrap();
        lls.push(engine.evaluate((4, 5), true).unwrap());
    }
    // likelihood 1 at the gap column: zero contribution whatever its weight
    assert_approx_eq!(f64, lls[0], lls[1], epsilon = 1e-12);
}

#[test]
fn memory_saving_reproduces_the_plain_path() {
    let columns = vec![
        vec![A, N, G, N, A, C],
        vec![A, N, G, N, T, C],
        vec![A, N, N, C, T, T],
        vec![C, N, N, C, T, T],
    ];
    let alignment = dna_alignment(&["a", "b", "c", "d"], columns, vec![1, 3, 1, 2, 1, 1]);
    let tree = quartet([0.1, 0.2, 0.15, 0.3], 0.25);
    let model = || PartitionModel::jc69(RateModel::gamma(0.8).unwrap()).unwrap();

    let mut lls = Vec::new();
    for save_memory in [false, true] {
        let kernel_config = KernelConfig { save_memory, ..Default::default() };
        let (store, assignments) = in_memory_store(&alignment, 1);
        let mut engine = LikelihoodEngine::single_rank(
            tree.clone(), store, vec![model()], &kernel_config, &assignments,
        ).unwrap();
        lls.push(engine.evaluate((4, 5), true).unwrap());
    }
    assert_approx_eq!(f64, lls[0], lls[1], epsilon = 1e-12);
}

#[test]
fn partition_additivity() {
    let columns = [
        vec![A, C, G, T, A, C],
        vec![A, C, G, T, T, C],
        vec![A, G, G, C, T, T],
        vec![C, G, T, C, T, T],
    ];
    let weights = [1, 2, 1, 1, 3, 1];
    let taxa = ["a", "b", "c", "d"];
    let tree = quartet([0.1, 0.2, 0.15, 0.3], 0.25);
    let kernel_config = KernelConfig::default();
    let model = || PartitionModel::jc69(RateModel::gamma(1.2).unwrap()).unwrap();

    // one partition over all six columns
    let whole = dna_alignment(&taxa, columns.to_vec(), weights.to_vec());
    let (store, assignments) = in_memory_store(&whole, 1);
    let mut engine = LikelihoodEngine::single_rank(
        tree.clone(), store, vec![model()], &kernel_config, &assignments,
    ).unwrap();
    let whole_ll = engine.evaluate((4, 5), true).unwrap();

    // the same columns as two contiguous half-partitions
    let halves = BinaryAlignment {
        taxa_names: taxa.iter().map(ToString::to_string).collect(),
        weights: weights.to_vec(),
        partitions: vec![
            (
                PartitionMeta::new("first", DataType::Dna, 0, 3),
                TipData::Bytes(columns.iter().map(|row| row[..3].to_vec()).collect()),
            ),
            (
                PartitionMeta::new("second", DataType::Dna, 3, 6),
                TipData::Bytes(columns.iter().map(|row| row[3..].to_vec()).collect()),
            ),
        ],
    };
    let (store, assignments) = in_memory_store(&halves, 1);
    let mut engine = LikelihoodEngine::single_rank(
        tree, store, vec![model(), model()], &kernel_config, &assignments,
    ).unwrap();
    let split_ll = engine.evaluate((4, 5), true).unwrap();

    assert_approx_eq!(f64, whole_ll, split_ll, epsilon = 1e-10);
    assert_approx_eq!(
        f64,
        split_ll,
        engine.per_partition_ll(0) + engine.per_partition_ll(1),
        epsilon = 1e-12
    );
}

#[test]
fn per_partition_branch_lengths_decouple_partitions() {
    let taxa = ["a", "b", "c", "d"];
    let columns_one = vec![vec![A, C], vec![G, C], vec![C, T], vec![C, A]];
    let columns_two = vec![vec![T, G], vec![T, G], vec![A, G], vec![C, C]];
    let model = || PartitionModel::jc69(RateModel::gamma(0.9).unwrap()).unwrap();

    let times_one = [0.1, 0.2, 0.15, 0.3, 0.25];
    let times_two = [0.5, 0.4, 0.3, 0.2, 0.1];
    let edges = [(0usize, 4usize), (1, 4), (2, 5), (3, 5), (4, 5)];

    // joint engine: two partitions, one branch length each
    let joint = BinaryAlignment {
        taxa_names: taxa.iter().map(ToString::to_string).collect(),
        weights: vec![1; 4],
        partitions: vec![
            (PartitionMeta::new("one", DataType::Dna, 0, 2), TipData::Bytes(columns_one.clone())),
            (PartitionMeta::new("two", DataType::Dna, 2, 4), TipData::Bytes(columns_two.clone())),
        ],
    };
    let mut tree = Tree::new(4, 2).unwrap();
    for (edge, (a, b)) in edges.iter().enumerate() {
        tree.connect_nodes(*a, *b, &[zvar(times_one[edge]), zvar(times_two[edge])]).unwrap();
    }
    let kernel_config = KernelConfig { per_partition_branch_lengths: true, ..Default::default() };
    let (store, assignments) = in_memory_store(&joint, 1);
    let mut engine = LikelihoodEngine::single_rank(
        tree, store, vec![model(), model()], &kernel_config, &assignments,
    ).unwrap();
    let joint_ll = engine.evaluate((4, 5), true).unwrap();

    // reference: two single-partition engines, each on its own lengths
    let mut separate_ll = 0.0;
    for (columns, times) in [(columns_one, times_one), (columns_two, times_two)] {
        let alignment = dna_alignment(&taxa, columns, vec![1; 2]);
        let mut tree = Tree::new(4, 1).unwrap();
        for (edge, (a, b)) in edges.iter().enumerate() {
            tree.connect_nodes(*a, *b, &[zvar(times[edge])]).unwrap();
        }
        let (store, assignments) = in_memory_store(&alignment, 1);
        let mut engine = LikelihoodEngine::single_rank(
            tree, store, vec![model()], &KernelConfig::default(), &assignments,
        ).unwrap();
        separate_ll += engine.evaluate((4, 5), true).unwrap();
    }
    assert_approx_eq!(f64, joint_ll, separate_ll, epsilon = 1e-10);
}

#[test]
fn per_site_categories_rescale_branches() {
    // CAT with rates (1, 2): a site in category 1 behaves exactly like a
    // unit-rate site across branches of doubled time
    let taxa = ["a", "b", "c", "d"];
    let columns = vec![vec![A, A], vec![G, G], vec![C, C], vec![C, C]];
    let times = [0.1, 0.2, 0.15, 0.3];
    let internal = 0.25;

    let alignment = dna_alignment(&taxa, columns.clone(), vec![1, 1]);
    let kernel_config = KernelConfig { rate_het: RateHet::Cat, ..Default::default() };
    let model = PartitionModel::jc69(RateModel::cat(vec![1.0, 2.0]).unwrap()).unwrap();
    let (store, assignments) = in_memory_store(&alignment, 1);
    let mut engine = LikelihoodEngine::single_rank(
        quartet(times, internal), store, vec![model], &kernel_config, &assignments,
    ).unwrap();
    engine.set_site_categories(0, &[0, 1]).unwrap();
    let cat_ll = engine.evaluate((4, 5), true).unwrap();

    // reference: identical single sites under PLAIN at rate-scaled times
    let mut expected = 0.0;
    for factor in [1.0, 2.0] {
        let single = dna_alignment(
            &taxa,
            columns.iter().map(|row| row[..1].to_vec()).collect(),
            vec![1],
        );
        let scaled: [f64; 4] = std::array::from_fn(|i| times[i] * factor);
        let (store, assignments) = in_memory_store(&single, 1);
        let plain = PartitionModel::jc69(RateModel::plain()).unwrap();
        let plain_config = KernelConfig { rate_het: RateHet::Plain, ..Default::default() };
        let mut engine = LikelihoodEngine::single_rank(
            quartet(scaled, internal * factor), store, vec![plain], &plain_config, &assignments,
        ).unwrap();
        expected += engine.evaluate((4, 5), true).unwrap();
    }
    assert_approx_eq!(f64, cat_ll, expected, epsilon = 1e-10);
}

#[test]
fn pomo_two_species_likelihood() {
    // species one: ten individuals, five A and five C; species two: three A
    // and seven G at the same single site
    let individuals: Vec<Vec<u8>> = std::iter::empty()
        .chain(std::iter::repeat(vec![A]).take(5))
        .chain(std::iter::repeat(vec![C]).take(5))
        .chain(std::iter::repeat(vec![A]).take(3))
        .chain(std::iter::repeat(vec![G]).take(7))
        .collect();
    let species = [
        pomo::Species { name: "one".into(), individuals: (0..10).collect() },
        pomo::Species { name: "two".into(), individuals: (10..20).collect() },
    ];
    let clvs = pomo::compile_tip_clvs(DataType::Pomo16, 1, &individuals, &species).unwrap();

    let frequencies = vec![1.0 / 16.0; 16];
    let exchangeabilities = vec![1.0; 16 * 15 / 2];
    let eigen = EigenDecomp::from_gtr(&frequencies, &exchangeabilities).unwrap();

    let alignment = BinaryAlignment {
        taxa_names: vec!["one".into(), "two".into()],
        weights: vec![1],
        partitions: vec![(
            PartitionMeta::new("pomo", DataType::Pomo16, 0, 1),
            TipData::Clvs(clvs.clone()),
        )],
    };
    let rates = RateModel::gamma(1.0).unwrap();
    let gamma_rates: Vec<f64> = rates.rates().to_vec();
    let model = PartitionModel::gtr(
        DataType::Pomo16, &frequencies, &exchangeabilities, rates,
    ).unwrap();

    let t = 0.2;
    let mut tree = Tree::new(2, 1).unwrap();
    tree.connect_nodes(0, 1, &[zvar(t)]).unwrap();

    let (store, assignments) = in_memory_store(&alignment, 1);
    let mut engine = LikelihoodEngine::single_rank(
        tree, store, vec![model], &KernelConfig::default(), &assignments,
    ).unwrap();
    let ll = engine.evaluate((0, 1), true).unwrap();
    assert!(ll.is_finite());
    assert!(ll < 0.0);

    // reference: Σ_r w_r · Σ_ab x1[a] · x2[b] · π_a P_ab(t·r)
    let expected: f64 = gamma_rates.iter().map(|r| {
        0.25 * (0..16).map(|a| {
            (0..16).map(|b| clvs[0][a] * clvs[1][b] * joint_prob(&eigen, a, b, t * r)).sum::<f64>()
        }).sum::<f64>()
    }).sum::<f64>().ln();
    assert_approx_eq!(f64, ll, expected, epsilon = 1e-10);
}

#[test]
fn binary_data_matches_direct_pruning() {
    let frequencies = [0.6, 0.4];
    let eigen = EigenDecomp::from_gtr(&frequencies, &[1.0]).unwrap();
    let alignment = BinaryAlignment {
        taxa_names: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        weights: vec![1, 2],
        partitions: vec![(
            PartitionMeta::new("bin", DataType::Binary, 0, 2),
            // codes 1 and 2 denote states 0 and 1
            TipData::Bytes(vec![vec![1, 2], vec![1, 2], vec![2, 2], vec![2, 1]]),
        )],
    };
    let model = PartitionModel::gtr(
        DataType::Binary, &frequencies, &[1.0], RateModel::plain(),
    ).unwrap();
    let kernel_config = KernelConfig { rate_het: RateHet::Plain, ..Default::default() };

    let pendants = [0.3, 0.1, 0.2, 0.4];
    let internal = 0.2;
    let tree = quartet(pendants, internal);

    let (store, assignments) = in_memory_store(&alignment, 1);
    let mut engine = LikelihoodEngine::single_rank(
        tree, store, vec![model], &kernel_config, &assignments,
    ).unwrap();
    let ll = engine.evaluate((4, 5), true).unwrap();

    let transition = |a: usize, b: usize, t: f64| joint_prob(&eigen, a, b, t) / frequencies[a];
    let site = |observed: [usize; 4]| -> f64 {
        (0..2).map(|x| {
            let left = transition(x, observed[0], pendants[0])
                * transition(x, observed[1], pendants[1]);
            let right: f64 = (0..2).map(|y| {
                transition(x, y, internal)
                    * transition(y, observed[2], pendants[2])
                    * transition(y, observed[3], pendants[3])
            }).sum();
            frequencies[x] * left * right
        }).sum()
    };
    let expected = site([0, 0, 1, 1]).ln() + 2.0 * site([1, 1, 1, 0]).ln();
    assert_approx_eq!(f64, ll, expected, epsilon = 1e-10);
}

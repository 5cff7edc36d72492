//! Kernel-level likelihood checks against closed-form Jukes-Cantor values
//! and the traversal/scaling invariants.

use float_cmp::assert_approx_eq;
use itertools::izip;

use alignment::{assignment, Assignment, AlignmentStore, BinaryAlignment, PartitionMeta, TipData};
use config::{DataType, KernelConfig, RateHet};
use kernel::{LikelihoodEngine, Tree};
use substmodel::{EigenDecomp, PartitionModel, RateModel};

const A: u8 = 1;
const C: u8 = 2;
const G: u8 = 4;
const T: u8 = 8;

/// Branch variable of an elapsed time t.
fn zvar(t: f64) -> f64 {
    (-t).exp()
}

fn dna_alignment(taxa: &[&str], columns: Vec<Vec<u8>>, weights: Vec<i32>) -> BinaryAlignment {
    let width = columns[0].len();
    BinaryAlignment {
        taxa_names: taxa.iter().map(ToString::to_string).collect(),
        weights,
        partitions: vec![(
            PartitionMeta::new("dna", DataType::Dna, 0, width),
            TipData::Bytes(columns),
        )],
    }
}

fn store(alignment: &BinaryAlignment, workers: usize) -> (AlignmentStore, Vec<Vec<Assignment>>) {
    let widths: Vec<usize> = alignment.partitions.iter().map(|(m, _)| m.full_width()).collect();
    let assignments = assignment::balance(&widths, workers);
    let flat: Vec<Assignment> = assignments.iter().flatten().copied().collect();
    let mut buf = Vec::new();
    alignment.encode(&mut buf).unwrap();
    (AlignmentStore::decode(&buf, &flat).unwrap(), assignments)
}

/// `π_a · P_ab(t)` under any reversible model, from the decomposition.
fn joint_prob(eigen: &EigenDecomp, a: usize, b: usize, t: f64) -> f64 {
    (0..eigen.states())
        .map(|j| eigen.ev_row(a)[j] * eigen.ev_row(b)[j] * (-eigen.eign[j] * t).exp())
        .sum()
}

/// A caterpillar over `n` tips: inner node `n` joins tips 0 and 1, each
/// following inner node picks up the next tip, the last one closes with
/// tip `n - 1`. Every branch carries the same variable `z`.
fn caterpillar(n: usize, z: f64) -> Tree {
    let mut tree = Tree::new(n, 1).unwrap();
    tree.connect_nodes(0, n, &[z]).unwrap();
    tree.connect_nodes(1, n, &[z]).unwrap();
    for inner in n + 1..2 * n - 2 {
        tree.connect_nodes(inner - 1, inner, &[z]).unwrap();
        tree.connect_nodes(inner - n + 1, inner, &[z]).unwrap();
    }
    tree.connect_nodes(n - 1, 2 * n - 3, &[z]).unwrap();
    tree
}

fn identical_tip_alignment(n: usize) -> BinaryAlignment {
    BinaryAlignment {
        taxa_names: (0..n).map(|i| format!("t{i}")).collect(),
        weights: vec![1],
        partitions: vec![(
            PartitionMeta::new("dna", DataType::Dna, 0, 1),
            TipData::Bytes(vec![vec![A]; n]),
        )],
    }
}

#[test]
fn two_taxon_gamma_matches_closed_form() {
    let alignment = dna_alignment(&["left", "right"], vec![vec![A], vec![A]], vec![1]);
    let (store, assignments) = store(&alignment, 1);

    let rates = RateModel::gamma(0.5).unwrap();
    let gamma_rates: Vec<f64> = rates.rates().to_vec();
    let model = PartitionModel::jc69(rates).unwrap();
    let kernel_config = KernelConfig::default();

    let t = 0.1;
    let mut tree = Tree::new(2, 1).unwrap();
    tree.connect_nodes(0, 1, &[zvar(t)]).unwrap();

    let mut engine =
        LikelihoodEngine::single_rank(tree, store, vec![model], &kernel_config, &assignments).unwrap();
    let ll = engine.evaluate((0, 1), true).unwrap();

    // Σ_r 0.25 · π_A · P_AA(t · r) in closed form
    let expected: f64 = gamma_rates.iter()
        .map(|r| 0.25 * (1.0 / 16.0) * (1.0 + 3.0 * (-4.0 / 3.0 * t * r).exp()))
        .sum::<f64>()
        .ln();
    assert_approx_eq!(f64, ll, expected, epsilon = 1e-12);
    assert!(ll < 0.0);
    assert_approx_eq!(f64, engine.per_partition_ll(0), ll);
}

#[test]
fn three_taxon_plain_matches_direct_pruning() {
    // tips 0, 1, 2 around the single inner node 3
    let alignment = dna_alignment(
        &["a", "b", "c"],
        vec![vec![A, G], vec![A, G], vec![C, T]],
        vec![1, 1],
    );
    let (store, assignments) = store(&alignment, 1);
    let eigen = EigenDecomp::jc69();

    let model = PartitionModel::jc69(RateModel::plain()).unwrap();
    let kernel_config = KernelConfig { rate_het: RateHet::Plain, ..Default::default() };

    let times = [0.3, 0.11, 0.47];
    let mut tree = Tree::new(3, 1).unwrap();
    for (tip, t) in times.iter().enumerate() {
        tree.connect_nodes(tip, 3, &[zvar(*t)]).unwrap();
    }

    let mut engine =
        LikelihoodEngine::single_rank(tree, store, vec![model], &kernel_config, &assignments).unwrap();
    let ll = engine.evaluate((3, 2), true).unwrap();

    // direct pruning: L = Σ_x π_x · Π_i P_x→si(t_i)
    let site = |observed: [usize; 3]| -> f64 {
        (0..4).map(|x| {
            let product: f64 = izip!(observed.iter(), times.iter())
                .map(|(&s, &t)| joint_prob(&eigen, x, s, t) / 0.25)
                .product();
            0.25 * product
        }).sum()
    };
    let expected = site([0, 0, 1]).ln() + site([2, 2, 3]).ln();
    assert_approx_eq!(f64, ll, expected, epsilon = 1e-10);

    // root invariance: the same value from every branch around node 3
    for tip in 0..3 {
        let swapped = engine.evaluate((3, tip), true).unwrap();
        assert_approx_eq!(f64, ll, swapped, epsilon = 1e-12);
    }
}

#[test]
fn quartet_gamma_matches_direct_pruning() {
    // ((0,1)4,(2,3)5) with distinct pendant branches
    let alignment = dna_alignment(
        &["a", "b", "c", "d"],
        vec![vec![A, C, G], vec![A, T, G], vec![C, C, T], vec![C, G, T]],
        vec![2, 1, 3],
    );
    let (store, assignments) = store(&alignment, 1);
    let eigen = EigenDecomp::jc69();
    let rates = RateModel::gamma(1.0).unwrap();
    let gamma_rates: Vec<f64> = rates.rates().to_vec();
    let model = PartitionModel::jc69(rates).unwrap();
    let kernel_config = KernelConfig::default();

    let pendants = [0.1, 0.2, 0.3, 0.4];
    let internal = 0.25;
    let mut tree = Tree::new(4, 1).unwrap();
    tree.connect_nodes(0, 4, &[zvar(pendants[0])]).unwrap();
    tree.connect_nodes(1, 4, &[zvar(pendants[1])]).unwrap();
    tree.connect_nodes(2, 5, &[zvar(pendants[2])]).unwrap();
    tree.connect_nodes(3, 5, &[zvar(pendants[3])]).unwrap();
    tree.connect_nodes(4, 5, &[zvar(internal)]).unwrap();

    let mut engine =
        LikelihoodEngine::single_rank(tree, store, vec![model], &kernel_config, &assignments).unwrap();
    let ll = engine.evaluate((4, 5), true).unwrap();

    // reference: gamma-weighted four-taxon pruning sum
    let transition = |a: usize, b: usize, t: f64| joint_prob(&eigen, a, b, t) / 0.25;
    let site = |observed: [usize; 4]| -> f64 {
        gamma_rates.iter().map(|r| {
            0.25 * (0..4).map(|x| {
                let left = transition(x, observed[0], pendants[0] * r)
                    * transition(x, observed[1], pendants[1] * r);
                let right: f64 = (0..4).map(|y| {
                    transition(x, y, internal * r)
                        * transition(y, observed[2], pendants[2] * r)
                        * transition(y, observed[3], pendants[3] * r)
                }).sum();
                0.25 * left * right
            }).sum::<f64>()
        }).sum()
    };
    // observed states per column: A/A/C/C, C/T/C/G, G/G/T/T
    let expected = 2.0 * site([0, 0, 1, 1]).ln()
        + site([1, 3, 1, 2]).ln()
        + 3.0 * site([2, 2, 3, 3]).ln();
    assert_approx_eq!(f64, ll, expected, epsilon = 1e-9);
}

#[test]
fn root_branch_flip_is_bit_exact() {
    let alignment = dna_alignment(
        &["a", "b", "c", "d"],
        vec![vec![A, C], vec![G, C], vec![C, T], vec![C, A]],
        vec![1, 2],
    );
    let (aln_store, assignments) = store(&alignment, 1);
    let model = PartitionModel::jc69(RateModel::gamma(0.7).unwrap()).unwrap();
    let kernel_config = KernelConfig::default();

    let mut tree = Tree::new(4, 1).unwrap();
    for (a, b, t) in [(0, 4, 0.1), (1, 4, 0.15), (2, 5, 0.2), (3, 5, 0.12), (4, 5, 0.3)] {
        tree.connect_nodes(a, b, &[zvar(t)]).unwrap();
    }

    let mut engine =
        LikelihoodEngine::single_rank(tree, aln_store, vec![model], &kernel_config, &assignments).unwrap();
    let forward = engine.evaluate((4, 5), true).unwrap();
    let backward = engine.evaluate((5, 4), true).unwrap();
    assert_eq!(forward.to_bits(), backward.to_bits());
}

#[test]
fn partial_equals_full_reevaluation() {
    let alignment = dna_alignment(
        &["a", "b", "c", "d"],
        vec![vec![A, C, T], vec![G, C, T], vec![C, T, A], vec![C, A, A]],
        vec![1, 1, 4],
    );
    let (aln_store, assignments) = store(&alignment, 1);
    let model = PartitionModel::jc69(RateModel::gamma(0.3).unwrap()).unwrap();
    let kernel_config = KernelConfig::default();

    let mut tree = Tree::new(4, 1).unwrap();
    for (a, b, t) in [(0, 4, 0.1), (1, 4, 0.15), (2, 5, 0.2), (3, 5, 0.12), (4, 5, 0.3)] {
        tree.connect_nodes(a, b, &[zvar(t)]).unwrap();
    }

    let mut engine =
        LikelihoodEngine::single_rank(tree, aln_store, vec![model], &kernel_config, &assignments).unwrap();
    let full = engine.evaluate((4, 5), true).unwrap();
    let partial = engine.evaluate((4, 5), false).unwrap();
    assert_approx_eq!(f64, full, partial, epsilon = 1e-12);
}

#[test]
fn newview_is_idempotent() {
    let alignment = dna_alignment(
        &["a", "b", "c", "d"],
        vec![vec![A, C], vec![G, C], vec![C, T], vec![C, A]],
        vec![1, 1],
    );
    let (aln_store, assignments) = store(&alignment, 1);
    let model = PartitionModel::jc69(RateModel::gamma(0.7).unwrap()).unwrap();
    let kernel_config = KernelConfig::default();

    let mut tree = Tree::new(4, 1).unwrap();
    for (a, b, t) in [(0, 4, 0.1), (1, 4, 0.15), (2, 5, 0.2), (3, 5, 0.12), (4, 5, 0.3)] {
        tree.connect_nodes(a, b, &[zvar(t)]).unwrap();
    }

    let mut engine =
        LikelihoodEngine::single_rank(tree, aln_store, vec![model], &kernel_config, &assignments).unwrap();
    let slot = engine.tree().slot_between(4, 5).unwrap();
    engine.newview(slot).unwrap();
    let first = engine.clv_view(4, 0);
    let first_scaler = engine.scaler_sum(4, 0);

    engine.newview(slot).unwrap();
    let second = engine.clv_view(4, 0);
    assert_eq!(first, second);
    assert_eq!(first_scaler, engine.scaler_sum(4, 0));
}

#[test]
fn short_branches_identical_tips_reduce_to_the_frequency() {
    // 16 identical tips across (in time) vanishing branches: the
    // likelihood collapses to the stationary frequency of the observed
    // state, with no underflow and no NaN
    let n = 16;
    let (aln_store, assignments) = store(&identical_tip_alignment(n), 1);
    let model = PartitionModel::jc69(RateModel::plain()).unwrap();
    let kernel_config = KernelConfig { rate_het: RateHet::Plain, ..Default::default() };

    let tree = caterpillar(n, zvar(1e-15));
    let mut engine =
        LikelihoodEngine::single_rank(tree, aln_store, vec![model], &kernel_config, &assignments).unwrap();
    let ll = engine.evaluate((2 * n - 3, n - 1), true).unwrap();
    assert!(ll.is_finite());
    assert_approx_eq!(f64, ll, 0.25f64.ln(), epsilon = 1e-9);
}

#[test]
fn deep_tree_engages_the_scaling_protocol() {
    // 200 tips across long branches: unscaled CLV entries would shrink far
    // below 2^-256 on the way up
    let n = 200;
    let (aln_store, assignments) = store(&identical_tip_alignment(n), 1);
    let model = PartitionModel::jc69(RateModel::plain()).unwrap();
    let kernel_config = KernelConfig { rate_het: RateHet::Plain, ..Default::default() };

    let tree = caterpillar(n, zvar(10.0));
    let mut engine =
        LikelihoodEngine::single_rank(tree, aln_store, vec![model], &kernel_config, &assignments).unwrap();
    let ll = engine.evaluate((2 * n - 3, n - 1), true).unwrap();
    assert!(ll.is_finite());
    assert!(ll < 0.0);

    // the top of the caterpillar must have scaled at least once
    let top = 2 * n - 3;
    assert!(engine.scaler_sum(top, 0) > 0, "no scaling on a 200-taxon chain of long branches");

    // counters accumulate monotonically along the chain
    for inner in n + 1..=top {
        assert!(engine.scaler_sum(inner, 0) >= engine.scaler_sum(inner - 1, 0));
    }
}

#[test]
fn masked_newview_skips_converged_partitions() {
    let width = 2;
    let alignment = BinaryAlignment {
        taxa_names: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        weights: vec![1; 2 * width],
        partitions: vec![
            (
                PartitionMeta::new("one", DataType::Dna, 0, width),
                TipData::Bytes(vec![vec![A, C], vec![G, C], vec![C, T], vec![C, A]]),
            ),
            (
                PartitionMeta::new("two", DataType::Dna, width, 2 * width),
                TipData::Bytes(vec![vec![T, T], vec![T, G], vec![A, T], vec![C, C]]),
            ),
        ],
    };
    let (aln_store, assignments) = store(&alignment, 1);
    let models = vec![
        PartitionModel::jc69(RateModel::gamma(0.7).unwrap()).unwrap(),
        PartitionModel::jc69(RateModel::gamma(0.7).unwrap()).unwrap(),
    ];
    let kernel_config = KernelConfig::default();

    let mut tree = Tree::new(4, 1).unwrap();
    for (a, b, t) in [(0, 4, 0.1), (1, 4, 0.15), (2, 5, 0.2), (3, 5, 0.12), (4, 5, 0.3)] {
        tree.connect_nodes(a, b, &[zvar(t)]).unwrap();
    }

    let mut engine =
        LikelihoodEngine::single_rank(tree, aln_store, models, &kernel_config, &assignments).unwrap();
    engine.evaluate((4, 5), true).unwrap();
    let converged_before = engine.clv_view(4, 1);
    let active_before = engine.clv_view(4, 0);

    // flag partition 1 converged, disturb a branch, run a masked update:
    // partition 0 must pick the new branch up, partition 1 must not
    engine.set_partition_converged(1, true);
    let slot = engine.tree().slot_between(4, 5).unwrap();
    let pendant = engine.tree().slot_between(0, 4).unwrap();
    engine.tree_mut().set_branch(pendant, &[zvar(0.9)]).unwrap();
    engine.newview_masked(slot).unwrap();

    assert_eq!(converged_before, engine.clv_view(4, 1));
    assert_ne!(active_before, engine.clv_view(4, 0));
}

#[test]
fn unknown_branch_is_rejected() {
    let alignment = dna_alignment(
        &["a", "b", "c", "d"],
        vec![vec![A], vec![G], vec![C], vec![C]],
        vec![1],
    );
    let (aln_store, assignments) = store(&alignment, 1);
    let model = PartitionModel::jc69(RateModel::gamma(0.7).unwrap()).unwrap();
    let kernel_config = KernelConfig::default();

    let mut tree = Tree::new(4, 1).unwrap();
    for (a, b) in [(0, 4), (1, 4), (2, 5), (3, 5), (4, 5)] {
        tree.connect_nodes(a, b, &[zvar(0.1)]).unwrap();
    }

    let mut engine =
        LikelihoodEngine::single_rank(tree, aln_store, vec![model], &kernel_config, &assignments).unwrap();
    assert!(engine.evaluate((0, 3), true).is_err());
}

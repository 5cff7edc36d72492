//! Construction of polymorphism-aware tip likelihood vectors.
//!
//! A PoMo partition's states are allele-frequency bins: four monoallelic
//! states (A, C, G, T) followed by six diallelic state classes (AC, AG, AT,
//! CG, CT, GT), each subdivided into `(S - 4) / 6` frequency bins. A species
//! is observed through the DNA codes of its individuals; its tip CLV entry
//! for a state is the probability of those observations given the state's
//! allele-frequency interpretation: an indicator for monoallelic states, a
//! binomial over the two allele counts for diallelic ones.

use log::debug;

use config::DataType;

mod error;
pub use error::PomoError;

/// Number of PoMo state classes: 4 monoallelic + 6 diallelic.
const STATE_CLASSES: usize = 10;
/// Index of the last monoallelic class (A, C, G, T occupy 0..=3).
const LAST_MONO: usize = 3;

/// Compatibility of an observed DNA code (1..=15, bitmask ambiguity) with
/// each of the 10 state classes. Flag 1: the class cannot explain the
/// observation. Flag 4: only the class's first allele can. Flag 2: only the
/// second. 0: both alleles are compatible (no count is attributable).
/// Row 0 is a sentinel for the invalid code 0.
const OBS_TO_POMO_COUNTS: [[u8; STATE_CLASSES]; 16] = [
    [15, 15, 15, 15, 15, 15, 15, 15, 15, 15],
    [ 4,  1,  1,  1,  4,  4,  4,  1,  1,  1], // A
    [ 1,  4,  1,  1,  2,  1,  1,  4,  4,  1], // C
    [ 4,  4,  1,  1,  0,  4,  4,  4,  4,  1], // M = {AC}
    [ 1,  1,  4,  1,  1,  2,  1,  2,  1,  4], // G
    [ 4,  1,  4,  1,  4,  0,  4,  2,  1,  4], // R = {AG}
    [ 1,  4,  4,  1,  2,  2,  1,  0,  4,  4], // S = {CG}
    [ 4,  4,  4,  1,  0,  0,  4,  0,  4,  4], // V = {ACG}
    [ 1,  1,  1,  4,  1,  1,  2,  1,  2,  2], // T
    [ 4,  1,  1,  4,  4,  4,  0,  1,  2,  2], // W = {AT}
    [ 1,  4,  1,  4,  2,  1,  2,  4,  0,  2], // Y = {CT}
    [ 4,  4,  1,  4,  0,  4,  0,  4,  0,  2], // H = {ACT}
    [ 1,  1,  4,  4,  1,  2,  2,  2,  2,  0], // K = {GT}
    [ 4,  1,  4,  4,  4,  0,  0,  2,  2,  0], // D = {AGT}
    [ 1,  4,  4,  4,  2,  2,  2,  0,  0,  0], // B = {CGT}
    [ 4,  4,  4,  4,  0,  0,  0,  0,  0,  0], // N = {ACGT}
];

/// One species of the final tree, observed through several sequenced
/// individuals. `individuals` indexes rows of the individual tip matrix.
#[derive(Debug, Clone)]
pub struct Species {
    pub name: String,
    pub individuals: Vec<usize>,
}

/// `ln C(n_first + n_second, n_first)`
fn log_binom_coefficient(num_first: u32, num_second: u32) -> f64 {
    let n = num_first + num_second;
    let larger = num_first.max(num_second);
    let mut logp = 0.0;
    let mut i = 0;
    while i + larger < n {
        logp += f64::from(n - i).ln() - f64::from(1 + i).ln();
        i += 1;
    }
    logp
}

/// Probability of observing `num_first` copies of the first allele and
/// `num_second` of the second, when the first allele has frequency
/// `prob_first`. Computed in log space to survive large individual counts.
fn binom_prob(num_first: u32, num_second: u32, prob_first: f64) -> f64 {
    if num_first == 0 && num_second == 0 {
        return 1.0
    }
    let mut logp = 0.0;
    if num_first > 0 {
        debug_assert!(prob_first > 0.0);
        logp += f64::from(num_first) * prob_first.ln();
    }
    if num_second > 0 {
        let prob_second = 1.0 - prob_first;
        debug_assert!(prob_second > 0.0);
        logp += f64::from(num_second) * prob_second.ln();
    }
    logp += log_binom_coefficient(num_first, num_second);
    logp.exp()
}

/// Build the tip CLV of every species over sites `0..width` of the
/// individual matrix rows.
///
/// `individuals[row][site]` holds the DNA byte codes of each sequenced
/// individual; `species` groups those rows. The returned vectors have
/// length `width * states` each, ordered site-major, and slot directly into
/// the CLV-bearing tip data of a PoMo partition.
///
/// # Errors
/// - [`PomoError::NotPomo`] for byte-coded data types;
/// - [`PomoError::InvalidDnaCode`] for codes outside 1..=15;
/// - [`PomoError::TooManyAlleles`] when a site of a species cannot be
///   explained with at most two alleles.
pub fn compile_tip_clvs(
    data_type: DataType,
    width: usize,
    individuals: &[Vec<u8>],
    species: &[Species],
) -> Result<Vec<Vec<f64>>, PomoError> {
    if !data_type.is_pomo() {
        return Err(PomoError::NotPomo(data_type))
    }
    let states = data_type.states();
    let bins = (states - 4) / 6;
    let bin_width = 1.0 / (1 + bins) as f64;

    let mut clvs = Vec::with_capacity(species.len());
    for sp in species {
        if sp.individuals.is_empty() {
            return Err(PomoError::EmptySpecies(sp.name.clone()))
        }
        for &row in &sp.individuals {
            if row >= individuals.len() {
                return Err(PomoError::UnknownIndividual {
                    species: sp.name.clone(), individual: row, count: individuals.len(),
                })
            }
        }
        debug!("Compiling tip CLV for species '{}' ({} individuals, {} sites)",
            sp.name, sp.individuals.len(), width);

        let mut clv = vec![0.0; width * states];
        for site in 0..width {
            compile_site(sp, individuals, site, states, bins, bin_width,
                &mut clv[site * states..(site + 1) * states])?;
        }
        clvs.push(clv);
    }
    Ok(clvs)
}

fn compile_site(
    sp: &Species,
    individuals: &[Vec<u8>],
    site: usize,
    states: usize,
    bins: usize,
    bin_width: f64,
    out: &mut [f64],
) -> Result<(), PomoError> {
    let mut still_valid = [true; STATE_CLASSES];
    let mut num_still_valid = STATE_CLASSES;
    let mut diallelic_counts = [[0u32; 2]; STATE_CLASSES];

    for &row in &sp.individuals {
        let code = individuals[row][site];
        if !(1..=15).contains(&code) {
            return Err(PomoError::InvalidDnaCode { individual: row, site, code })
        }
        let effect_row = &OBS_TO_POMO_COUNTS[code as usize];

        for (class, &effect) in effect_row.iter().enumerate() {
            if effect & 1 != 0 {
                if still_valid[class] {
                    if num_still_valid == 1 {
                        return Err(PomoError::TooManyAlleles {
                            species: sp.name.clone(), site,
                        })
                    }
                    num_still_valid -= 1;
                    still_valid[class] = false;
                }
            } else if class > LAST_MONO {
                if effect & 4 != 0 {
                    diallelic_counts[class][0] += 1;
                } else if effect & 2 != 0 {
                    diallelic_counts[class][1] += 1;
                }
            }
        }
    }

    // monoallelic states: indicator of compatibility
    for class in 0..=LAST_MONO {
        out[class] = if still_valid[class] { 1.0 } else { 0.0 };
    }

    // diallelic classes: binomial at each frequency-bin midpoint
    let mut offset = LAST_MONO + 1;
    for (class, counts) in diallelic_counts.iter().enumerate().skip(LAST_MONO + 1) {
        if still_valid[class] {
            for bin in 0..bins {
                let second_allele_freq = bin_width * (1 + bin) as f64;
                let first_allele_freq = 1.0 - second_allele_freq;
                out[offset + bin] = binom_prob(counts[0], counts[1], first_allele_freq);
            }
        } else {
            out[offset..offset + bins].fill(0.0);
        }
        offset += bins;
    }
    debug_assert_eq!(offset, states);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    const A: u8 = 1;
    const C: u8 = 2;
    const G: u8 = 4;
    const T: u8 = 8;

    fn one_species(name: &str, rows: Vec<usize>) -> Species {
        Species { name: name.to_string(), individuals: rows }
    }

    #[test]
    fn log_binom_matches_pascal() {
        assert_approx_eq!(f64, log_binom_coefficient(0, 5), 0.0);
        assert_approx_eq!(f64, log_binom_coefficient(5, 0), 0.0);
        assert_approx_eq!(f64, log_binom_coefficient(2, 3), 10f64.ln(), epsilon = 1e-12);
        assert_approx_eq!(f64, log_binom_coefficient(5, 5), 252f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn binom_prob_simple() {
        // C(3,1) * 0.5^3 = 0.375
        assert_approx_eq!(f64, binom_prob(1, 2, 0.5), 0.375, epsilon = 1e-12);
        assert_approx_eq!(f64, binom_prob(0, 0, 0.3), 1.0);
    }

    #[test]
    fn monoallelic_species() {
        // 3 individuals, all observe A at the single site.
        let individuals = vec![vec![A], vec![A], vec![A]];
        let species = [one_species("sp", vec![0, 1, 2])];
        let clvs = compile_tip_clvs(DataType::Pomo16, 1, &individuals, &species).unwrap();
        let clv = &clvs[0];

        // monoallelic A survives, C/G/T die
        assert_eq!(&clv[0..4], &[1.0, 0.0, 0.0, 0.0]);
        // diallelic AC, AG, AT: counts (3, 0); bins at first-allele freqs 2/3, 1/3
        for pair in 0..3 {
            let base = 4 + pair * 2;
            assert_approx_eq!(f64, clv[base],     (2f64 / 3.0).powi(3), epsilon = 1e-12);
            assert_approx_eq!(f64, clv[base + 1], (1f64 / 3.0).powi(3), epsilon = 1e-12);
        }
        // CG, CT, GT cannot explain an A
        assert_eq!(&clv[10..16], &[0.0; 6]);
    }

    #[test]
    fn diallelic_species() {
        // counts: 5 A, 5 C at one site
        let individuals: Vec<Vec<u8>> =
            std::iter::repeat(vec![A]).take(5)
                .chain(std::iter::repeat(vec![C]).take(5))
                .collect();
        let species = [one_species("sp", (0..10).collect())];
        let clvs = compile_tip_clvs(DataType::Pomo16, 1, &individuals, &species).unwrap();
        let clv = &clvs[0];

        // both monoallelic A and monoallelic C are dead (both alleles seen)
        assert_eq!(&clv[0..4], &[0.0, 0.0, 0.0, 0.0]);
        // AC bins carry binomial(5, 5, p) at p = 2/3 and 1/3
        for (bin, p) in [(0usize, 2f64 / 3.0), (1, 1f64 / 3.0)] {
            let expected = 252.0 * p.powi(5) * (1.0 - p).powi(5);
            assert_approx_eq!(f64, clv[4 + bin], expected, epsilon = 1e-12);
        }
        // every other diallelic pair misses one allele
        assert_eq!(&clv[6..16], &[0.0; 10]);
    }

    #[test]
    fn ambiguity_codes_count_nothing() {
        // N is compatible with everything: all classes survive, no counts.
        let individuals = vec![vec![15u8]];
        let species = [one_species("sp", vec![0])];
        let clvs = compile_tip_clvs(DataType::Pomo16, 1, &individuals, &species).unwrap();
        assert_eq!(clvs[0], vec![1.0; 16]);
    }

    #[test]
    fn three_alleles_are_fatal() {
        let individuals = vec![vec![A], vec![C], vec![G]];
        let species = [one_species("sp", vec![0, 1, 2])];
        let err = compile_tip_clvs(DataType::Pomo16, 1, &individuals, &species).unwrap_err();
        assert_eq!(err, PomoError::TooManyAlleles { species: "sp".into(), site: 0 });
    }

    #[test]
    fn invalid_code_is_fatal() {
        let individuals = vec![vec![0u8]];
        let species = [one_species("sp", vec![0])];
        let err = compile_tip_clvs(DataType::Pomo16, 1, &individuals, &species).unwrap_err();
        assert_eq!(err, PomoError::InvalidDnaCode { individual: 0, site: 0, code: 0 });
    }

    #[test]
    fn pomo64_has_ten_bins() {
        let individuals = vec![vec![T]];
        let species = [one_species("sp", vec![0])];
        let clvs = compile_tip_clvs(DataType::Pomo64, 1, &individuals, &species).unwrap();
        let clv = &clvs[0];
        assert_eq!(clv.len(), 64);
        assert_eq!(&clv[0..4], &[0.0, 0.0, 0.0, 1.0]);
        // AT is pair index 2 (AC, AG, AT, ...): T is its second allele
        let at = 4 + 2 * 10;
        // count (0, 1): binomial reduces to the second-allele frequency
        assert_approx_eq!(f64, clv[at], 1.0 / 11.0, epsilon = 1e-12);
        assert_approx_eq!(f64, clv[at + 9], 10.0 / 11.0, epsilon = 1e-12);
    }
}

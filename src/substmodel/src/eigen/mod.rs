//! Eigen-decomposition of time-reversible rate matrices.
//!
//! A reversible Q with stationary frequencies π is symmetrised as
//! `S = diag(√π) · Q · diag(√π)⁻¹` and diagonalised with Jacobi rotations:
//! `S = U · Λ · Uᵀ` with orthonormal U. The kernel never consumes U itself
//! but the two π-weighted products below, chosen so that the per-site inner
//! product at the virtual root directly yields the likelihood
//! `x1ᵀ · diag(π) · P(z) · x2`:
//!
//! - `ei[l·S + j] = U[l][j] / √π_l`, multiplied against child vectors in
//!   the P-matrix products;
//! - `ev[l·S + j] = √π_l · U[l][j]`, the final change of basis applied to
//!   every freshly computed CLV row, and the building block of tip-vector
//!   rows.

use log::debug;

mod error;
pub use error::EigenError;

const MAX_SWEEPS: usize = 100;

/// Eigen-decomposition products of one partition's rate matrix. Immutable
/// for the lifetime of a tree computation.
///
/// Branch lengths flow through the kernel in their exponential
/// transformation: the stored branch variable z relates to elapsed time t
/// as `ln z = -t`. The decomposition therefore keeps the NEGATED spectrum
/// of Q (`eign[k] = -λ_k ≥ 0`), so that the P-matrix diagonal
/// `exp(rate · eign[k] · ln z)` decays for every branch.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenDecomp {
    states: usize,
    /// Negated eigenvalues of Q, ascending; `eign[0]` is pinned to exactly 0.
    pub eign: Vec<f64>,
    /// `U[l][j] / √π_l`, row-major over (state l, eigen index j).
    pub ei: Vec<f64>,
    /// `√π_l · U[l][j]`, row-major over (state l, eigen index j).
    pub ev: Vec<f64>,
}

impl EigenDecomp {
    /// Compose the decomposition of a general time-reversible rate matrix
    /// from stationary frequencies and the upper-triangle exchangeabilities
    /// (row-major: (0,1), (0,2), …, (S-2,S-1)). Q is normalised to one
    /// expected substitution per unit branch length before diagonalisation.
    ///
    /// # Errors
    /// - dimension mismatches between `frequencies`, `exchangeabilities`
    ///   and the implied state count;
    /// - non-probability frequencies;
    /// - failure of the Jacobi sweep to converge (does not happen for
    ///   well-formed reversible matrices).
    pub fn from_gtr(frequencies: &[f64], exchangeabilities: &[f64]) -> Result<Self, EigenError> {
        let states = frequencies.len();
        let expected = states * (states - 1) / 2;
        if exchangeabilities.len() != expected {
            return Err(EigenError::ExchangeabilityCount {
                states, expected, got: exchangeabilities.len(),
            })
        }
        for (index, &value) in frequencies.iter().enumerate() {
            if !(value > 0.0 && value <= 1.0) {
                return Err(EigenError::BadFrequency { index, value })
            }
        }

        // ---- assemble Q, normalised to unit mean rate
        let mut q = vec![0.0; states * states];
        let mut upper = exchangeabilities.iter();
        for i in 0..states {
            for j in i + 1..states {
                let rate = *upper.next().expect("checked length");
                q[i * states + j] = rate * frequencies[j];
                q[j * states + i] = rate * frequencies[i];
            }
        }
        for i in 0..states {
            let row_sum: f64 = (0..states).filter(|&j| j != i).map(|j| q[i * states + j]).sum();
            q[i * states + i] = -row_sum;
        }
        let mean_rate: f64 = (0..states).map(|i| -frequencies[i] * q[i * states + i]).sum();
        for entry in &mut q {
            *entry /= mean_rate;
        }

        // ---- symmetrise: S_ij = q_ij * sqrt(π_i / π_j)
        let sqrt_freq: Vec<f64> = frequencies.iter().map(|&f| f.sqrt()).collect();
        let mut sym = vec![0.0; states * states];
        for i in 0..states {
            for j in 0..states {
                sym[i * states + j] = q[i * states + j] * sqrt_freq[i] / sqrt_freq[j];
            }
        }

        let (eigenvalues, u) = jacobi(&mut sym, states)?;

        // The zero eigenvalue belongs to the stationary distribution; pin it
        // against roundoff so that exp(0 · ln z) stays exactly 1. The rest
        // is stored negated, matching the exponential branch transform.
        let mut eign: Vec<f64> = eigenvalues.iter().map(|&l| -l).collect();
        eign[0] = 0.0;
        debug!("Diagonalised {states}-state rate matrix, decay spectrum [0 .. {:.6}]",
            eign[states - 1]);

        let mut ei = vec![0.0; states * states];
        let mut ev = vec![0.0; states * states];
        for l in 0..states {
            for j in 0..states {
                ei[l * states + j] = u[l * states + j] / sqrt_freq[l];
                ev[l * states + j] = u[l * states + j] * sqrt_freq[l];
            }
        }

        Ok(Self { states, eign, ei, ev })
    }

    /// The Jukes-Cantor decomposition for DNA: uniform frequencies, uniform
    /// exchangeabilities, Q spectrum (0, -4/3, -4/3, -4/3), stored as decay
    /// rates (0, 4/3, 4/3, 4/3).
    #[must_use]
    pub fn jc69() -> Self {
        Self::from_gtr(&[0.25; 4], &[1.0; 6]).expect("JC69 is well formed")
    }

    /// Number of model states S.
    #[must_use]
    pub fn states(&self) -> usize {
        self.states
    }

    /// Row `l` of the `ev` product (the natural-basis projection weights of
    /// state l): the tip-vector row of a pure state.
    #[must_use]
    pub fn ev_row(&self, l: usize) -> &[f64] {
        &self.ev[l * self.states..(l + 1) * self.states]
    }
}

/// Cyclic Jacobi diagonalisation of a symmetric matrix (row-major, n×n).
/// Returns eigenvalues sorted descending and the matching orthonormal
/// eigenvectors as rows-of-components: `u[l·n + j]` is component l of
/// eigenvector j.
fn jacobi(a: &mut [f64], n: usize) -> Result<(Vec<f64>, Vec<f64>), EigenError> {
    let mut u = vec![0.0; n * n];
    for i in 0..n {
        u[i * n + i] = 1.0;
    }

    let norm: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let tolerance = 1e-15 * norm.max(1.0);

    let mut converged = false;
    for _sweep in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| (p + 1..n).map(move |q| (p, q)))
            .map(|(p, q)| a[p * n + q] * a[p * n + q])
            .sum::<f64>()
            .sqrt();
        if off <= tolerance {
            converged = true;
            break
        }

        for p in 0..n - 1 {
            for q in p + 1..n {
                let apq = a[p * n + q];
                if apq.abs() <= f64::EPSILON * norm {
                    continue
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let ukp = u[k * n + p];
                    let ukq = u[k * n + q];
                    u[k * n + p] = c * ukp - s * ukq;
                    u[k * n + q] = s * ukp + c * ukq;
                }
            }
        }
    }
    if !converged {
        return Err(EigenError::NoConvergence(MAX_SWEEPS))
    }

    // sort eigen pairs by eigenvalue, descending
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        a[j * n + j].partial_cmp(&a[i * n + i]).expect("finite eigenvalues")
    });

    let eigenvalues: Vec<f64> = order.iter().map(|&j| a[j * n + j]).collect();
    let mut sorted_u = vec![0.0; n * n];
    for (new_j, &old_j) in order.iter().enumerate() {
        // eigenvector signs are arbitrary; pin the largest component
        // positive so decompositions are reproducible across runs
        let dominant = (0..n).max_by(|&x, &y| {
            u[x * n + old_j].abs().partial_cmp(&u[y * n + old_j].abs()).expect("finite eigenvectors")
        }).expect("non-empty eigenvector");
        let sign = if u[dominant * n + old_j] < 0.0 { -1.0 } else { 1.0 };
        for l in 0..n {
            sorted_u[l * n + new_j] = sign * u[l * n + old_j];
        }
    }
    Ok((eigenvalues, sorted_u))
}

//! P-matrix builders.
//!
//! For a branch length z and a partition's eigen-decomposition, the kernel
//! consumes the stacked products `left[k, j, l] = d(z1)[l] · ei[j, l]` (and
//! `right` for z2), one S×S block per rate category, where
//! `d(z)[l] = exp(rate · eign[l] · ln(max(z, ZMIN)))` and `d[0] = 1`. At
//! the virtual root only the diagonal factor `d` itself is needed: the
//! eigenvector products were absorbed into tip-vector rows and CLVs during
//! the traversal.

use crate::eigen::EigenDecomp;
use crate::numeric::ZMIN;

/// Floor a raw branch length and take its logarithm.
#[must_use]
pub fn log_branch(z: f64) -> f64 {
    if z > ZMIN { z.ln() } else { ZMIN.ln() }
}

/// Fill the stacked `left` and `right` P-matrix products for branch lengths
/// `z1` and `z2` over `rates`. When `extra_unit_rate` is set, one more S×S
/// block is appended at category index `max_categories`, computed for a
/// rate of exactly 1.0: the all-gap column of memory-saving mode evolves at
/// the unit rate, whatever the per-site categories do.
///
/// `left` and `right` must hold `max_categories + 1` blocks when the extra
/// slot is requested and `rates.len()` blocks otherwise.
pub fn make_left_right(
    z1: f64,
    z2: f64,
    rates: &[f64],
    eigen: &EigenDecomp,
    extra_unit_rate: bool,
    max_categories: usize,
    left: &mut [f64],
    right: &mut [f64],
) {
    let states = eigen.states();
    let square = states * states;
    let lz1 = log_branch(z1);
    let lz2 = log_branch(z2);

    let expected = if extra_unit_rate { (max_categories + 1) * square } else { rates.len() * square };
    assert!(left.len() >= expected && right.len() >= expected);

    for (category, &rate) in rates.iter().enumerate() {
        fill_block(eigen, rate * lz1, &mut left[category * square..(category + 1) * square]);
        fill_block(eigen, rate * lz2, &mut right[category * square..(category + 1) * square]);
    }
    if extra_unit_rate {
        let slot = max_categories;
        fill_block(eigen, lz1, &mut left[slot * square..(slot + 1) * square]);
        fill_block(eigen, lz2, &mut right[slot * square..(slot + 1) * square]);
    }
}

/// One S×S block: `block[j, l] = exp(eign[l] · scaled_lz) · ei[j, l]`, with
/// the eigenvalue-zero column pinned to 1.
fn fill_block(eigen: &EigenDecomp, scaled_lz: f64, block: &mut [f64]) {
    let states = eigen.states();
    for j in 0..states {
        block[j * states] = 1.0;
        for l in 1..states {
            block[j * states + l] = (eigen.eign[l] * scaled_lz).exp() * eigen.ei[j * states + l];
        }
    }
}

/// LG4 flavor: each rate category gets its own eigen-decomposition, and its
/// block only ever sees its own category's rate.
pub fn make_left_right_lg4(
    z1: f64,
    z2: f64,
    rates: &[f64],
    eigens: &[EigenDecomp; 4],
    left: &mut [f64],
    right: &mut [f64],
) {
    let states = eigens[0].states();
    let square = states * states;
    let lz1 = log_branch(z1);
    let lz2 = log_branch(z2);

    for (category, (&rate, eigen)) in rates.iter().zip(eigens.iter()).enumerate() {
        fill_block(eigen, rate * lz1, &mut left[category * square..(category + 1) * square]);
        fill_block(eigen, rate * lz2, &mut right[category * square..(category + 1) * square]);
    }
}

/// Diagonal factor at the virtual root: `diag[k, l] = exp(rates[k] ·
/// eign[l] · ln(max(z, ZMIN)))`, `diag[k, 0] = 1`. One row of S entries per
/// rate category.
pub fn make_diag(z: f64, rates: &[f64], eigen: &EigenDecomp, diag: &mut [f64]) {
    let states = eigen.states();
    let lz = log_branch(z);
    for (category, &rate) in rates.iter().enumerate() {
        let row = &mut diag[category * states..(category + 1) * states];
        row[0] = 1.0;
        for l in 1..states {
            row[l] = (rate * eigen.eign[l] * lz).exp();
        }
    }
}

/// LG4 flavor of [`make_diag`].
pub fn make_diag_lg4(z: f64, rates: &[f64], eigens: &[EigenDecomp; 4], diag: &mut [f64]) {
    let states = eigens[0].states();
    let lz = log_branch(z);
    for (category, (&rate, eigen)) in rates.iter().zip(eigens.iter()).enumerate() {
        let row = &mut diag[category * states..(category + 1) * states];
        row[0] = 1.0;
        for l in 1..states {
            row[l] = (rate * eigen.eign[l] * lz).exp();
        }
    }
}

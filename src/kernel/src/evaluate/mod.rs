//! Log-likelihood evaluation at the virtual root.
//!
//! Both endpoints of the root branch carry current CLVs (or tip data) once
//! the descriptor's update entries have run. Per site, the two vectors are
//! folded against the diagonal P factor of the root branch,
//!
//! ```text
//! term = Σ_k w_k · Σ_l x1ᵏ[l] · x2ᵏ[l] · diag[k, l]
//! ```
//!
//! with the per-category weights w (0.25 under GAMMA, free under LG4X, the
//! site's own single category under CAT), and the log-likelihood
//! accumulates `wgt[i] · ln |term|`. The scaling multiplications applied
//! during the traversal are undone once per window, as
//! `(scaler(p) + scaler(q)) · ln(MIN_LIKELIHOOD)`.

use config::RateHet;
use substmodel::{EigenSet, PartitionModel};
use substmodel::numeric::MIN_LIKELIHOOD;
use substmodel::pmatrix;

use alignment::TipData;

use crate::clv::SliceData;
use crate::newview::{SideReader, SiteRows};
use crate::traversal::RootBranch;

/// Inputs of the root operation for one partition window. Memory saving
/// needs no flag here: a window's gap sidecar carries everything the
/// readers consult.
pub struct EvaluateOp<'a> {
    pub root: &'a RootBranch,
    pub model: &'a PartitionModel,
    pub n_tips: usize,
    pub branch_index: usize,
}

/// Compute the partial log-likelihood of one partition window at the
/// virtual root, scaling correction included. The caller asserts the
/// global per-partition value is negative; the partial of a window is
/// negative on its own as well.
pub fn evaluate_slice(op: &EvaluateOp, data: &mut SliceData) -> f64 {
    let model = op.model;
    let states = model.states();
    let r_count = model.rates.clv_rate_count();
    let span = states * r_count;
    let per_site = model.rates.mode() == RateHet::Cat;
    let z = op.root.z[op.branch_index];

    // ---- diagonal P factor of the root branch
    match &model.eigen {
        EigenSet::Single(eigen) =>
            pmatrix::make_diag(z, model.rates.rates(), eigen, &mut data.scratch.diag),
        EigenSet::Lg4(eigens) =>
            pmatrix::make_diag_lg4(z, model.rates.rates(), eigens, &mut data.scratch.diag),
    }

    // ---- resolve both endpoints; the fold is symmetric in p and q
    let gap = data.gap.as_ref();
    let make_reader = |node: usize| -> SideReader {
        if node < op.n_tips {
            match &data.tips {
                TipData::Bytes(rows) => SideReader::Codes { codes: &rows[node] },
                TipData::Clvs(rows)  => SideReader::ClvTip { clv: &rows[node], states },
            }
        } else {
            let inner = node - op.n_tips;
            SideReader::Inner {
                clv: data.clv.get(inner),
                span,
                gap: gap.map(|g| (&g.vectors[node], &g.columns[inner][..])),
                cursor: 0,
            }
        }
    };
    let mut v1 = make_reader(op.root.p);
    let mut v2 = make_reader(op.root.q);

    let weights = model.rates.weights();
    let diag = &data.scratch.diag;

    // ---- the site loop
    let mut sum = 0.0;
    for i in 0..data.width {
        let rows_1 = v1.site(i);
        let rows_2 = v2.site(i);

        let term = if per_site {
            let block = data.site_categories[i];
            site_term(model, states, &rows_1, &rows_2, 0, &diag[block * states..(block + 1) * states])
        } else {
            let mut term = 0.0;
            for (k, &weight) in weights.iter().enumerate() {
                term += weight
                    * site_term(model, states, &rows_1, &rows_2, k, &diag[k * states..(k + 1) * states]);
            }
            term
        };

        sum += f64::from(data.weights[i]) * term.abs().max(f64::MIN_POSITIVE).ln();
    }

    // undo the scaling multiplications accumulated below both endpoints
    let scalers = data.clv.scaler(op.root.p) + data.clv.scaler(op.root.q);
    sum += f64::from(scalers) * MIN_LIKELIHOOD.ln();

    assert!(sum < 0.0, "partial log-likelihood must be negative, got {sum}");
    sum
}

/// `Σ_l x1ᵏ[l] · x2ᵏ[l] · diag_row[l]` for one site and category.
fn site_term(
    model: &PartitionModel,
    states: usize,
    rows_1: &SiteRows,
    rows_2: &SiteRows,
    k: usize,
    diag_row: &[f64],
) -> f64 {
    let a = site_vec(model, rows_1, k, states);
    let b = site_vec(model, rows_2, k, states);

    let mut term = 0.0;
    for l in 0..states {
        term += a[l] * b[l] * diag_row[l];
    }
    term
}

/// The S-wide vector a side exposes for rate category `k`.
fn site_vec<'a>(
    model: &'a PartitionModel,
    rows: &SiteRows<'a>,
    k: usize,
    states: usize,
) -> &'a [f64] {
    match *rows {
        SiteRows::Code(code) => model.tip_table(k).row(code),
        SiteRows::Shared(v)  => v,
        SiteRows::Raw(x)     => &x[k * states..(k + 1) * states],
        SiteRows::Ump(_)     => unreachable!("ump tables are a newview-only representation"),
    }
}

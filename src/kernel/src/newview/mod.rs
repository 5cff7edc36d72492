//! CLV recomputation.
//!
//! One parametric site loop covers every flavor of the update at a node p
//! with children q and r: byte-coded or CLV-bearing tips, stacked rate
//! categories (GAMMA, PLAIN) or per-site categories (CAT), with or without
//! gap-compressed CLVs. The per-site work is
//!
//! ```text
//! a_L[l] = Σ_j left[block, l, j]  · vl[j]
//! a_R[l] = Σ_j right[block, l, j] · vr[j]
//! out    = evᵀ · (a_L ⊙ a_R)
//! ```
//!
//! followed by the scaling check: when every entry of the freshly written
//! row falls below `MIN_LIKELIHOOD` in absolute value, the row is multiplied
//! by 2^256 and the site's pattern weight is added to the node's scaling
//! counter. Tip-code sides amortise the `tip row × P` product across all
//! sites sharing a code through the `ump` tables.

use config::RateHet;
use substmodel::{EigenSet, PartitionModel};
use substmodel::numeric::{MIN_LIKELIHOOD, TWO_TO_THE_256};
use substmodel::pmatrix;

use alignment::TipData;

use crate::clv::{BitRow, SliceData};
use crate::traversal::{TipCase, TraversalEntry};

/// Inputs of one descriptor entry for one partition window.
pub struct NewviewOp<'a> {
    pub entry: &'a TraversalEntry,
    pub model: &'a PartitionModel,
    pub n_tips: usize,
    /// Index into the per-branch length vectors (the partition index under
    /// per-partition branch lengths, 0 otherwise).
    pub branch_index: usize,
    pub save_memory: bool,
    pub max_categories: usize,
}

/// Multiply the row by 2^256 when every entry is below the scaling
/// threshold in absolute value.
pub(crate) fn scale_row(row: &mut [f64]) -> bool {
    if row.iter().all(|v| v.abs() < MIN_LIKELIHOOD) {
        for value in row.iter_mut() {
            *value *= TWO_TO_THE_256;
        }
        true
    } else {
        false
    }
}

/// The extEV rows of rate category `k` (LG4 matrices differ per category).
pub(crate) fn ev_of<'a>(eigen: &'a EigenSet, k: usize) -> &'a [f64] {
    match eigen {
        EigenSet::Single(e) => &e.ev,
        EigenSet::Lg4(es)   => &es[k].ev,
    }
}

/// What one side (q or r) of an update exposes for a single site.
#[derive(Clone, Copy)]
pub(crate) enum SiteRows<'a> {
    /// Pre-multiplied `tip row × P` spans from the ump table.
    Ump(&'a [f64]),
    /// A raw tip byte; the table row is fetched per rate category.
    Code(u8),
    /// A raw S-wide row shared across rate categories (CLV-bearing tips).
    Shared(&'a [f64]),
    /// A raw span-wide row of an inner CLV or a gap column.
    Raw(&'a [f64]),
}

/// Cursor-style access to one side of an update. Inner sides own a running
/// offset into their (possibly gap-compressed) CLV; the offset advances
/// exactly when a site's row is materialized in the buffer.
pub(crate) enum SideReader<'a> {
    Ump { codes: &'a [u8], ump: &'a [f64], span: usize },
    Codes { codes: &'a [u8] },
    ClvTip { clv: &'a [f64], states: usize },
    Inner {
        clv: &'a [f64],
        span: usize,
        gap: Option<(&'a BitRow, &'a [f64])>,
        cursor: usize,
    },
}

impl<'a> SideReader<'a> {
    /// Resolve site `i`; call exactly once per site and side.
    pub(crate) fn site(&mut self, i: usize) -> SiteRows<'a> {
        match self {
            Self::Ump { codes, ump, span } => {
                let table: &'a [f64] = *ump;
                let code = codes[i] as usize;
                SiteRows::Ump(&table[code * *span..(code + 1) * *span])
            }
            Self::Codes { codes } => SiteRows::Code(codes[i]),
            Self::ClvTip { clv, states } => {
                let rows: &'a [f64] = *clv;
                SiteRows::Shared(&rows[i * *states..(i + 1) * *states])
            }
            Self::Inner { clv, span, gap, cursor } => {
                if let Some((bits, column)) = gap {
                    if bits.get(i) {
                        return SiteRows::Raw(*column)
                    }
                }
                let rows: &'a [f64] = *clv;
                let row = &rows[*cursor..*cursor + *span];
                *cursor += *span;
                SiteRows::Raw(row)
            }
        }
    }
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `a[l] = Σ_j P[block, l, j] · v[j]` for rate category `k`, resolving the
/// side's representation.
pub(crate) fn fill_a(
    rows: &SiteRows,
    k: usize,
    block: usize,
    mat: &[f64],
    model: &PartitionModel,
    a: &mut [f64],
) {
    let states = a.len();
    let square = states * states;
    let mat_row = |l: usize| &mat[block * square + l * states..block * square + (l + 1) * states];
    match rows {
        SiteRows::Ump(u) => a.copy_from_slice(&u[k * states..(k + 1) * states]),
        SiteRows::Code(code) => {
            let v = model.tip_table(k).row(*code);
            for l in 0..states {
                a[l] = dot(v, mat_row(l));
            }
        }
        SiteRows::Shared(v) => {
            for l in 0..states {
                a[l] = dot(v, mat_row(l));
            }
        }
        SiteRows::Raw(x) => {
            let v = &x[k * states..(k + 1) * states];
            for l in 0..states {
                a[l] = dot(v, mat_row(l));
            }
        }
    }
}

/// `out[k·S..] = evᵀ · (a_L ⊙ a_R)` over all rate categories of one site.
fn combine_site(
    model: &PartitionModel,
    states: usize,
    r_count: usize,
    block_of: impl Fn(usize) -> usize,
    left: &[f64],
    right: &[f64],
    vl: &SiteRows,
    vr: &SiteRows,
    a_l: &mut [f64],
    a_r: &mut [f64],
    out: &mut [f64],
) {
    for k in 0..r_count {
        let block = block_of(k);
        fill_a(vl, k, block, left, model, a_l);
        fill_a(vr, k, block, right, model, a_r);

        let ev = ev_of(&model.eigen, k);
        let target = &mut out[k * states..(k + 1) * states];
        target.fill(0.0);
        for l in 0..states {
            let x1px2 = a_l[l] * a_r[l];
            for (entry, &e) in target.iter_mut().zip(&ev[l * states..(l + 1) * states]) {
                *entry += x1px2 * e;
            }
        }
    }
}

/// Recompute the CLV of `entry.p` over one partition window and update its
/// scaling counter. Infallible: shape violations are programmer errors and
/// assert, numerical underflow is handled by the scaling protocol.
pub fn newview_slice(op: &NewviewOp, data: &mut SliceData) {
    let model = op.model;
    let states = model.states();
    let r_count = model.rates.clv_rate_count();
    let span = states * r_count;
    let entry = op.entry;
    let per_site = model.rates.mode() == RateHet::Cat;
    let clv_tips = model.data_type.is_pomo();

    assert!(entry.p >= op.n_tips, "descriptor updates an inner node");
    let p_inner = entry.p - op.n_tips;

    // ---- precompute phase: the two stacked P-matrix products
    let qz = entry.qz[op.branch_index];
    let rz = entry.rz[op.branch_index];
    match &model.eigen {
        EigenSet::Single(eigen) => pmatrix::make_left_right(
            qz, rz, model.rates.rates(), eigen,
            // the unit-rate slot only exists (and fits) under per-site categories
            op.save_memory && per_site, op.max_categories,
            &mut data.scratch.left, &mut data.scratch.right,
        ),
        EigenSet::Lg4(eigens) => pmatrix::make_left_right_lg4(
            qz, rz, model.rates.rates(), eigens,
            &mut data.scratch.left, &mut data.scratch.right,
        ),
    }

    // ---- memory saving: new gap set of p, recomputed gap column
    let mut gap_scaled = false;
    let mut non_gap = data.width;
    if op.save_memory {
        let sidecar = data.gap.as_mut().expect("sidecars exist when memory saving is on");
        let q_bits = sidecar.vectors[entry.q].clone();
        let r_bits = sidecar.vectors[entry.r].clone();
        let set_bits = sidecar.vectors[entry.p].intersect(&q_bits, &r_bits);
        non_gap = data.width - set_bits;

        let mut column = std::mem::take(&mut sidecar.columns[p_inner]);
        let undetermined = model.data_type.undetermined_code()
            .expect("memory saving is limited to byte-coded partitions");
        let column_side = |node: usize| -> SiteRows {
            if node < op.n_tips {
                SiteRows::Code(undetermined)
            } else {
                SiteRows::Raw(&sidecar.columns[node - op.n_tips])
            }
        };
        let (mut a_l, mut a_r) = (vec![0.0; states], vec![0.0; states]);
        combine_site(
            model, states, r_count,
            // all-gap columns evolve at the unit rate under per-site categories
            |k| if per_site { op.max_categories } else { k },
            &data.scratch.left, &data.scratch.right,
            &column_side(entry.q), &column_side(entry.r),
            &mut a_l, &mut a_r,
            &mut column,
        );
        if entry.tip_case != TipCase::TipTip && scale_row(&mut column) {
            gap_scaled = true;
        }
        sidecar.columns[p_inner] = column;
    }

    // ---- tip-code amortisation tables
    let byte_tips = !clv_tips
        && matches!(entry.tip_case, TipCase::TipTip | TipCase::TipInner);
    let stacked_ump = byte_tips && !per_site;
    if stacked_ump {
        fill_ump(&mut data.scratch.ump1, &data.scratch.left, model, r_count);
        if entry.tip_case == TipCase::TipTip {
            fill_ump(&mut data.scratch.ump2, &data.scratch.right, model, r_count);
        }
    }

    let required = non_gap * span;
    let mut out = data.clv.take_or_alloc(p_inner, required);

    // ---- resolve the two child sides
    let gap = data.gap.as_ref();
    let make_reader = |node: usize| -> SideReader {
        if node < op.n_tips {
            match &data.tips {
                TipData::Bytes(rows) => {
                    if stacked_ump {
                        let ump = if node == entry.q { &data.scratch.ump1 } else { &data.scratch.ump2 };
                        SideReader::Ump { codes: &rows[node], ump, span }
                    } else {
                        SideReader::Codes { codes: &rows[node] }
                    }
                }
                TipData::Clvs(rows) => SideReader::ClvTip { clv: &rows[node], states },
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
    let mut vl = make_reader(entry.q);
    let mut vr = make_reader(entry.r);

    // byte tip-tip rows are products of tip probabilities: never small
    // enough to need scaling
    let check_scaling = !(entry.tip_case == TipCase::TipTip && !clv_tips);
    let gap_p = gap.map(|g| &g.vectors[entry.p]);

    // ---- the site loop
    let mut add_scale: u32 = 0;
    let mut out_cursor = 0;
    let mut a_l = vec![0.0; states];
    let mut a_r = vec![0.0; states];
    for i in 0..data.width {
        if let Some(bits) = gap_p {
            if bits.get(i) {
                if gap_scaled {
                    add_scale += data.weights[i] as u32;
                }
                continue
            }
        }
        let rows_l = vl.site(i);
        let rows_r = vr.site(i);
        let out_row = &mut out[out_cursor..out_cursor + span];
        out_cursor += span;

        combine_site(
            model, states, r_count,
            |k| if per_site { data.site_categories[i] } else { k },
            &data.scratch.left, &data.scratch.right,
            &rows_l, &rows_r,
            &mut a_l, &mut a_r,
            out_row,
        );

        if check_scaling && scale_row(out_row) {
            add_scale += data.weights[i] as u32;
        }
    }
    debug_assert_eq!(out_cursor, required);

    data.clv.put(p_inner, out);

    // scaling counters combine additively up the tree
    let total = data.clv.scaler(entry.q) + data.clv.scaler(entry.r) + add_scale;
    data.clv.set_scaler(entry.p, total);
}

/// `ump[code, k·S + l] = Σ_j tip_table_k(code)[j] · P[k, l, j]`: the tip
/// row × P product of every admissible tip code, shared by all sites
/// carrying that code.
fn fill_ump(ump: &mut [f64], mat: &[f64], model: &PartitionModel, r_count: usize) {
    let states = model.states();
    let span = states * r_count;
    let square = states * states;
    let codes = model.data_type.max_tip_states();
    for code in 0..codes {
        for k in 0..r_count {
            let row = model.tip_table(k).row(code as u8);
            for l in 0..states {
                ump[code * span + k * states + l] =
                    dot(row, &mat[k * square + l * states..k * square + (l + 1) * states]);
            }
        }
    }
}

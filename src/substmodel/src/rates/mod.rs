//! Rate-across-sites tables.
//!
//! A [`RateModel`] carries the per-category rate multipliers consumed by the
//! P-matrix builders and the per-category weights applied at the virtual
//! root. Under GAMMA the four categories are equiprobable; the LG4X family
//! instead optimizes four free weights; per-site category models select one
//! category per site, so their weight is trivially 1.

use config::RateHet;

mod error;
pub use error::RateError;

#[derive(Debug, Clone, PartialEq)]
pub struct RateModel {
    mode: RateHet,
    /// Per-category rate multipliers.
    rates: Vec<f64>,
    /// Per-category probability weights, applied at the virtual root.
    weights: Vec<f64>,
}

impl RateModel {
    /// A single rate of 1.0.
    #[must_use]
    pub fn plain() -> Self {
        Self { mode: RateHet::Plain, rates: vec![1.0], weights: vec![1.0] }
    }

    /// Four equiprobable discrete Γ rates for shape parameter `alpha`.
    ///
    /// # Errors
    /// - [`RateError::BadAlpha`] for non-positive or non-finite `alpha`.
    pub fn gamma(alpha: f64) -> Result<Self, RateError> {
        Ok(Self::gamma_given(discrete_gamma_rates(alpha)?))
    }

    /// Four discrete Γ rates supplied by the α-optimisation collaborator.
    #[must_use]
    pub fn gamma_given(rates: [f64; 4]) -> Self {
        Self { mode: RateHet::Gamma, rates: rates.to_vec(), weights: vec![0.25; 4] }
    }

    /// Four Γ rates with four free category weights (the LG4X family).
    ///
    /// # Errors
    /// - [`RateError::BadWeights`] unless the weights are positive and sum
    ///   to 1 within 1e-6.
    pub fn gamma_weighted(rates: [f64; 4], weights: [f64; 4]) -> Result<Self, RateError> {
        let sum: f64 = weights.iter().sum();
        if weights.iter().any(|&w| w <= 0.0) || (sum - 1.0).abs() > 1e-6 {
            return Err(RateError::BadWeights { sum })
        }
        Ok(Self { mode: RateHet::Gamma, rates: rates.to_vec(), weights: weights.to_vec() })
    }

    /// Per-site rate categories: `rates[k]` is the rate of category k; the
    /// per-site category indices live with the alignment slices.
    ///
    /// # Errors
    /// - [`RateError::NoCategories`] for an empty rate table.
    pub fn cat(rates: Vec<f64>) -> Result<Self, RateError> {
        if rates.is_empty() {
            return Err(RateError::NoCategories)
        }
        Ok(Self { mode: RateHet::Cat, rates, weights: vec![1.0] })
    }

    #[must_use]
    pub fn mode(&self) -> RateHet {
        self.mode
    }

    /// Rate multipliers, one per category.
    #[must_use]
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Per-category weights. Length equals `rates()` except under per-site
    /// categories, where a single weight of 1 applies to whichever category
    /// a site selects.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of rate categories interleaved within a CLV row: the number
    /// of categories for stacked-rate models, 1 for per-site ones.
    #[must_use]
    pub fn clv_rate_count(&self) -> usize {
        match self.mode {
            RateHet::Cat => 1,
            RateHet::Gamma | RateHet::Plain => self.rates.len(),
        }
    }

    /// Number of distinct P matrices per branch.
    #[must_use]
    pub fn category_count(&self) -> usize {
        self.rates.len()
    }
}

/// Median discretisation of the Γ(α, α) distribution into four rates,
/// normalised to unit mean. The distribution has unit mean by construction;
/// the discretised rates are rescaled so the category average stays
/// exactly 1.
///
/// # Errors
/// - [`RateError::BadAlpha`] for non-positive or non-finite `alpha`.
pub fn discrete_gamma_rates(alpha: f64) -> Result<[f64; 4], RateError> {
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(RateError::BadAlpha(alpha))
    }

    let mut rates = [0.0; 4];
    for (category, rate) in rates.iter_mut().enumerate() {
        let quantile = (2 * category + 1) as f64 / 8.0;
        *rate = gamma_quantile(alpha, quantile) / alpha;
    }
    let mean: f64 = rates.iter().sum::<f64>() / 4.0;
    for rate in &mut rates {
        *rate /= mean;
    }
    Ok(rates)
}

/// Inverse of the regularised lower incomplete gamma function P(a, ·),
/// computed by bisection. Only used at setup time; robustness beats speed.
fn gamma_quantile(a: f64, p: f64) -> f64 {
    debug_assert!((0.0..1.0).contains(&p));
    let mut lo = 0.0;
    let mut hi = a.max(1.0);
    while gamma_p(a, hi) < p {
        hi *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if gamma_p(a, mid) < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Regularised lower incomplete gamma function P(a, x): series expansion
/// below a + 1, continued fraction above.
fn gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0
    }
    if x < a + 1.0 {
        // series: P(a,x) = x^a e^-x / Γ(a) · Σ x^n / (a·(a+1)···(a+n))
        let mut term = 1.0 / a;
        let mut sum = term;
        let mut denominator = a;
        for _ in 0..500 {
            denominator += 1.0;
            term *= x / denominator;
            sum += term;
            if term.abs() < sum.abs() * 1e-16 {
                break
            }
        }
        sum * (a * x.ln() - x - ln_gamma(a)).exp()
    } else {
        // Lentz continued fraction for Q(a,x); P = 1 - Q
        let tiny = 1e-300;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / tiny;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..500 {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < tiny { d = tiny }
            c = b + an / c;
            if c.abs() < tiny { c = tiny }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < 1e-16 {
                break
            }
        }
        let q = (a * x.ln() - x - ln_gamma(a)).exp() * h;
        1.0 - q
    }
}

/// Lanczos approximation of ln Γ(x) for x > 0.
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];
    let tmp = x + 5.5 - (x + 0.5) * (x + 5.5).ln();
    let mut series = 1.000_000_000_190_015;
    for (i, &coefficient) in COEFFICIENTS.iter().enumerate() {
        series += coefficient / (x + 1.0 + i as f64);
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

//! Numerical constants of the scaling protocol.
//!
//! Conditional likelihood entries shrink exponentially with tree depth.
//! Whenever every entry of a site's CLV row drops below [`MIN_LIKELIHOOD`]
//! in absolute value, the row is multiplied by [`TWO_TO_THE_256`] and the
//! site's pattern weight is added to the node's scaling counter; the
//! accumulated counters are undone at the virtual root as
//! `counter * ln(MIN_LIKELIHOOD)`.

/// 2^256. Exactly representable; scaling multiplies by a power of two, so
/// mantissas are never perturbed.
pub const TWO_TO_THE_256: f64 = 1.157920892373161954235709850086879078532699846656405640394575840079131296399e77;

/// 2^-256, the scaling threshold.
pub const MIN_LIKELIHOOD: f64 = 8.636168555094444625386351862800399571116000364436281385023703470168591803162e-78;

/// Branch lengths are floored here before taking their logarithm.
pub const ZMIN: f64 = 1.0e-15;

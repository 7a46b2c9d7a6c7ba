//! Bounded, seedable random walk.
//!
//! All randomness in the engine flows through [`RandomWalkGenerator`]. It
//! wraps a seeded [`StdRng`] so that two engines built with the same seed
//! and driven by the same command sequence draw identical numbers in the
//! identical order.
//!
//! The core primitive is
//!
//! ```text
//! next = clamp(current + bias + uniform(-step, step), min, max)
//! ```
//!
//! exposed both as the free function [`bounded_step`] (generic over any
//! [`Rng`]) and as [`RandomWalkGenerator::next`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Errors raised by the random walk primitive.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalkError {
    /// The bounds are inverted or not numbers.
    #[error("invalid random walk configuration: min {min} > max {max}")]
    InvalidConfiguration {
        /// Lower bound supplied.
        min: f64,
        /// Upper bound supplied.
        max: f64,
    },
}

/// Draw a uniform value in `[-magnitude, magnitude]`.
///
/// Non-positive or non-finite magnitudes yield `0.0` without consuming
/// randomness, so a zero step is a pure drift.
pub fn symmetric_noise<R: Rng + ?Sized>(rng: &mut R, magnitude: f64) -> f64 {
    if !magnitude.is_finite() || magnitude <= 0.0 {
        return 0.0;
    }
    rng.random_range(-magnitude..=magnitude)
}

/// One unclamped random walk step: `current + bias + uniform(-step, step)`.
pub fn perturb<R: Rng + ?Sized>(rng: &mut R, current: f64, step: f64, bias: f64) -> f64 {
    current + bias + symmetric_noise(rng, step)
}

/// Clamp `value` into `[min, max]`, replacing NaN with `fallback`.
///
/// `fallback` is itself clamped, so the result always lies inside the
/// bounds when `min <= max`.
pub fn sanitize(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    let candidate = if value.is_nan() { fallback } else { value };
    if candidate.is_nan() {
        return min;
    }
    candidate.clamp(min, max)
}

/// A bounded random walk step.
///
/// # Errors
///
/// Returns [`WalkError::InvalidConfiguration`] if `min > max` or either
/// bound is NaN.
pub fn bounded_step<R: Rng + ?Sized>(
    rng: &mut R,
    current: f64,
    step: f64,
    bias: f64,
    min: f64,
    max: f64,
) -> Result<f64, WalkError> {
    if min.is_nan() || max.is_nan() || min > max {
        return Err(WalkError::InvalidConfiguration { min, max });
    }
    let raw = perturb(rng, current, step, bias);
    Ok(sanitize(raw, min, max, current))
}

/// Seeded random source shared by every stochastic engine component.
#[derive(Debug, Clone)]
pub struct RandomWalkGenerator {
    rng: StdRng,
}

impl RandomWalkGenerator {
    /// Create a generator from a seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Bounded random walk step. See [`bounded_step`].
    ///
    /// # Errors
    ///
    /// Returns [`WalkError::InvalidConfiguration`] if `min > max`.
    pub fn next(
        &mut self,
        current: f64,
        step: f64,
        bias: f64,
        min: f64,
        max: f64,
    ) -> Result<f64, WalkError> {
        bounded_step(&mut self.rng, current, step, bias, min, max)
    }

    /// Unclamped random walk step. See [`perturb`].
    pub fn perturb(&mut self, current: f64, step: f64, bias: f64) -> f64 {
        perturb(&mut self.rng, current, step, bias)
    }

    /// Uniform noise in `[-magnitude, magnitude]`.
    pub fn noise(&mut self, magnitude: f64) -> f64 {
        symmetric_noise(&mut self.rng, magnitude)
    }

    /// Bernoulli trial. Probabilities outside `[0, 1]` are clamped.
    pub fn chance(&mut self, probability: f64) -> bool {
        if probability.is_nan() || probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.rng.random_bool(probability)
    }

    /// Uniform index in `0..len`, or `None` for an empty range.
    pub fn pick(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.rng.random_range(0..len))
    }
}

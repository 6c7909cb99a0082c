//! # Unscented Kalman Filter
//!
//! Filters one 3-vector channel (a position, or Euler angles in degrees).
//!
//! ## Model
//!
//! - State and measurement are the same 3-vector; the process and
//!   measurement models are the identity.
//! - Process noise `Q = q²·I`, measurement noise `R = r²·I`.
//! - Scaled sigma points (van der Merwe): `α = 1e-3`, `β = 2`, `κ = 0`.
//! - The first measurement seeds the state unfiltered.
//!
//! ```text
//!   predict:  χ = σ(x, P)          x⁻, P⁻ = UT(χ) + Q
//!   update:   χ = σ(x⁻, P⁻)        ẑ, S   = UT(χ) + R
//!             K = Pxz · S⁻¹        x = x⁻ + K(z − ẑ)    P = P⁻ − K S Kᵀ
//! ```

use nalgebra::{Matrix3, Vector3};

use crate::config::KalmanNoise;

const DIM: usize = 3;
const SIGMA_POINTS: usize = 2 * DIM + 1;

/// Added to the diagonal when the covariance stops being positive definite.
const JITTER: f64 = 1e-9;

/// Sigma-point spread.
pub const ALPHA: f64 = 1e-3;
/// Prior knowledge of the distribution (2 is optimal for Gaussians).
pub const BETA: f64 = 2.0;
/// Secondary scaling.
pub const KAPPA: f64 = 0.0;

#[derive(Clone, Copy, Debug, PartialEq)]
struct SigmaWeights {
    /// `n + λ`
    spread: f64,
    mean: [f64; SIGMA_POINTS],
    covariance: [f64; SIGMA_POINTS],
}

impl SigmaWeights {
    fn merwe(alpha: f64, beta: f64, kappa: f64) -> Self {
        let n = DIM as f64;
        let lambda = alpha * alpha * (n + kappa) - n;
        let spread = n + lambda;

        let mut mean = [0.5 / spread; SIGMA_POINTS];
        let mut covariance = mean;
        mean[0] = lambda / spread;
        covariance[0] = lambda / spread + (1.0 - alpha * alpha + beta);

        Self {
            spread,
            mean,
            covariance,
        }
    }
}

/// Sigma-point Kalman filter over one 3-vector channel.
#[derive(Clone, Debug)]
pub struct UnscentedKalmanFilter {
    noise: KalmanNoise,
    process: Matrix3<f64>,
    measurement: Matrix3<f64>,
    state: Vector3<f64>,
    covariance: Matrix3<f64>,
    weights: SigmaWeights,
    initialized: bool,
    updates: u64,
    recoveries: u64,
}

impl UnscentedKalmanFilter {
    /// Creates a filter with no state yet.
    #[must_use]
    pub fn new(noise: KalmanNoise) -> Self {
        Self {
            noise,
            process: Matrix3::identity() * (noise.q * noise.q),
            measurement: Matrix3::identity() * (noise.r * noise.r),
            state: Vector3::zeros(),
            covariance: Matrix3::identity(),
            weights: SigmaWeights::merwe(ALPHA, BETA, KAPPA),
            initialized: false,
            updates: 0,
            recoveries: 0,
        }
    }

    /// Runs one predict/correct cycle.
    pub fn update(&mut self, measurement: [f64; 3]) {
        let z = Vector3::from(measurement);
        self.updates += 1;

        if !self.initialized {
            self.state = z;
            self.initialized = true;
            return;
        }

        // Predict through the identity process model.
        let sigmas = self.sigma_points(self.state, self.covariance);
        let (predicted, predicted_covariance) = self.unscented_transform(&sigmas, &self.process);

        // Correct through the identity measurement model.
        let sigmas = self.sigma_points(predicted, predicted_covariance);
        let (expected, innovation_covariance) = self.unscented_transform(&sigmas, &self.measurement);

        let mut cross = Matrix3::zeros();
        for (weight, sigma) in self.weights.covariance.iter().zip(&sigmas) {
            let deviation = sigma - predicted;
            cross += (deviation * (sigma - expected).transpose()) * *weight;
        }

        let Some(inverse) = innovation_covariance.try_inverse() else {
            tracing::warn!(q = self.noise.q, r = self.noise.r, "singular innovation covariance, correction skipped");
            self.state = predicted;
            self.covariance = predicted_covariance;
            return;
        };

        let gain = cross * inverse;
        self.state = predicted + gain * (z - expected);
        let covariance = predicted_covariance - gain * innovation_covariance * gain.transpose();
        self.covariance = (covariance + covariance.transpose()) * 0.5;
    }

    /// Current estimate.
    #[must_use]
    pub fn state(&self) -> [f64; 3] {
        [self.state.x, self.state.y, self.state.z]
    }

    /// Current estimate covariance.
    #[must_use]
    pub const fn covariance(&self) -> &Matrix3<f64> {
        &self.covariance
    }

    /// Returns true once the first measurement was seen.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Noise this filter was built with.
    #[must_use]
    pub const fn noise(&self) -> KalmanNoise {
        self.noise
    }

    /// Number of measurements processed.
    #[must_use]
    pub const fn updates(&self) -> u64 {
        self.updates
    }

    /// Number of times the covariance had to be repaired.
    #[must_use]
    pub const fn recoveries(&self) -> u64 {
        self.recoveries
    }

    fn sigma_points(&mut self, mean: Vector3<f64>, covariance: Matrix3<f64>) -> [Vector3<f64>; SIGMA_POINTS] {
        let root = self.scaled_root(covariance);
        let mut sigmas = [mean; SIGMA_POINTS];
        for (i, column) in root.column_iter().enumerate() {
            sigmas[1 + i] = mean + column;
            sigmas[1 + DIM + i] = mean - column;
        }
        sigmas
    }

    /// Lower Cholesky factor of `(n + λ)·P`, repairing `P` when needed.
    fn scaled_root(&mut self, covariance: Matrix3<f64>) -> Matrix3<f64> {
        let spread = self.weights.spread;
        if let Some(cholesky) = (covariance * spread).cholesky() {
            return cholesky.l();
        }

        self.recoveries += 1;
        let repaired = (covariance + covariance.transpose()) * 0.5 + Matrix3::identity() * JITTER;
        if let Some(cholesky) = (repaired * spread).cholesky() {
            tracing::debug!("covariance symmetrized");
            self.covariance = repaired;
            return cholesky.l();
        }

        tracing::warn!(q = self.noise.q, r = self.noise.r, "covariance lost positive definiteness, reset to identity");
        self.covariance = Matrix3::identity();
        Matrix3::identity() * spread.sqrt()
    }

    fn unscented_transform(
        &self,
        sigmas: &[Vector3<f64>; SIGMA_POINTS],
        noise: &Matrix3<f64>,
    ) -> (Vector3<f64>, Matrix3<f64>) {
        // Summing offsets from the centre point keeps precision despite the
        // large opposite-signed weights a small alpha produces.
        let centre = sigmas[0];
        let mut mean = centre;
        for (weight, sigma) in self.weights.mean.iter().zip(sigmas).skip(1) {
            mean += (sigma - centre) * *weight;
        }

        let mut covariance = *noise;
        for (weight, sigma) in self.weights.covariance.iter().zip(sigmas) {
            let deviation = sigma - mean;
            covariance += (deviation * deviation.transpose()) * *weight;
        }
        (mean, covariance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
        a.iter().zip(b).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt()
    }

    #[test]
    fn test_weights_sum_to_one() {
        let weights = SigmaWeights::merwe(ALPHA, BETA, KAPPA);
        let sum: f64 = weights.mean.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((weights.spread - 3e-6).abs() < 1e-12);
    }

    #[test]
    fn test_first_update_passes_through() {
        let mut filter = UnscentedKalmanFilter::new(KalmanNoise::BONE);
        assert!(!filter.is_initialized());
        filter.update([0.25, -4.0, 7.5]);
        assert_eq!(filter.state(), [0.25, -4.0, 7.5]);
    }

    #[test]
    fn test_constant_measurement_converges() {
        for noise in [KalmanNoise::ROOT, KalmanNoise::BONE] {
            let mut filter = UnscentedKalmanFilter::new(noise);
            filter.update([0.0, 0.0, 0.0]);
            for _ in 0..20 {
                filter.update([1.0, 2.0, 3.0]);
            }
            assert!(distance(filter.state(), [1.0, 2.0, 3.0]) < 1e-3, "{noise:?}");
        }
    }

    #[test]
    fn test_noisy_measurements_are_smoothed() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut filter = UnscentedKalmanFilter::new(KalmanNoise { q: 0.001, r: 0.05 });
        let truth = [1.0, 2.0, 3.0];
        for _ in 0..300 {
            let noisy = truth.map(|v| v + rng.gen_range(-0.05..0.05));
            filter.update(noisy);
        }
        assert!(distance(filter.state(), truth) < 0.02);
        assert!(filter.covariance()[(0, 0)] < 0.05 * 0.05);
    }

    #[test]
    fn test_covariance_stays_positive_definite() {
        let mut filter = UnscentedKalmanFilter::new(KalmanNoise::ROOT);
        for step in 0..200 {
            let t = f64::from(step) * 0.1;
            filter.update([t.sin(), t.cos(), t]);
        }
        assert!(filter.covariance().cholesky().is_some());
        assert_eq!(filter.recoveries(), 0);
        assert_eq!(filter.updates(), 200);
    }

    #[test]
    fn test_broken_covariance_is_recovered() {
        let mut filter = UnscentedKalmanFilter::new(KalmanNoise::BONE);
        filter.update([1.0, 1.0, 1.0]);
        filter.covariance = Matrix3::from_diagonal_element(-1.0);
        filter.update([1.0, 1.0, 1.0]);
        assert!(filter.recoveries() >= 1);
        assert!(filter.state().iter().all(|v| v.is_finite()));
    }
}

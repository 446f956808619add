//! Constant-velocity yaw filter.
//!
//! State `x = [yaw, yaw_rate, bias]ᵀ`, transition
//!
//! ```text
//!     | 1  dt  0 |
//! A = | 0  1   0 |
//!     | 0  0   1 |
//! ```
//!
//! Only the predict step runs: [`YawFilter::predict`] replaces `x` with
//! `A·x`. The observation model `C` and measurement noise `R` are carried
//! but never used to correct the state, and `P` keeps its initial value.
//! Completing the filter needs a yaw measurement source that the tracker
//! does not send yet.

use nalgebra::{Matrix2, Matrix2x3, Matrix3, Vector2, Vector3};

/// Initial covariance diagonal.
const P0: [f64; 3] = [0.0157, 3.1416, 0.1571];
/// Process noise diagonal.
const Q_DIAG: [f64; 3] = [0.1571, 1.5708, 0.0314];
/// Measurement noise diagonal.
const R_DIAG: [f64; 2] = [0.0157, 0.1571];

#[derive(Debug, Clone, PartialEq)]
pub struct YawFilter {
    a: Matrix3<f64>,
    c: Matrix2x3<f64>,
    q: Matrix3<f64>,
    r: Matrix2<f64>,
    x: Vector3<f64>,
    p: Matrix3<f64>,
}

impl YawFilter {
    /// Start at `yaw` with zero rate and bias.
    pub fn new(yaw: f64) -> Self {
        Self {
            a: Matrix3::identity(),
            c: Matrix2x3::new(1.0, 0.0, 0.0, 1.0, 0.0, 1.0),
            q: Matrix3::from_diagonal(&Vector3::from(Q_DIAG)),
            r: Matrix2::from_diagonal(&Vector2::from(R_DIAG)),
            x: Vector3::new(yaw, 0.0, 0.0),
            p: Matrix3::from_diagonal(&Vector3::from(P0)),
        }
    }

    /// Advance the state by `dt` seconds.
    pub fn predict(&mut self, dt: f64) {
        self.a[(0, 1)] = dt;
        self.x = self.a * self.x;
    }

    pub fn yaw(&self) -> f64 {
        self.x[0]
    }

    pub fn yaw_rate(&self) -> f64 {
        self.x[1]
    }

    pub fn state(&self) -> &Vector3<f64> {
        &self.x
    }

    /// Transition matrix as used by the last [`predict`](Self::predict).
    pub fn transition(&self) -> &Matrix3<f64> {
        &self.a
    }

    pub fn covariance(&self) -> &Matrix3<f64> {
        &self.p
    }

    pub fn observation(&self) -> &Matrix2x3<f64> {
        &self.c
    }

    pub fn process_noise(&self) -> &Matrix3<f64> {
        &self.q
    }

    pub fn measurement_noise(&self) -> &Matrix2<f64> {
        &self.r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let f = YawFilter::new(0.5);
        assert_eq!(f.state(), &Vector3::new(0.5, 0.0, 0.0));
        assert_eq!(f.covariance()[(1, 1)], 3.1416);
        assert_eq!(f.transition(), &Matrix3::identity());
        assert_eq!(f.measurement_noise()[(0, 0)], 0.0157);
        assert_eq!(f.process_noise()[(2, 2)], 0.0314);
    }

    #[test]
    fn observation_reads_yaw_and_biased_yaw() {
        let f = YawFilter::new(0.0);
        assert_eq!(f.observation(), &Matrix2x3::new(1.0, 0.0, 0.0, 1.0, 0.0, 1.0));

        let y = f.observation() * Vector3::new(0.4, 2.0, 0.1);
        assert!((y[0] - 0.4).abs() < 1e-12);
        assert!((y[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn predict_writes_dt_into_transition() {
        let mut f = YawFilter::new(0.0);
        f.predict(0.016);
        assert_eq!(f.transition()[(0, 1)], 0.016);
        f.predict(0.032);
        assert_eq!(f.transition()[(0, 1)], 0.032);
    }

    #[test]
    fn zero_rate_keeps_yaw() {
        let mut f = YawFilter::new(1.2);
        for _ in 0..10 {
            f.predict(0.016);
        }
        assert_eq!(f.yaw(), 1.2);
        assert_eq!(f.yaw_rate(), 0.0);
    }

    #[test]
    fn covariance_is_not_propagated() {
        let mut f = YawFilter::new(0.0);
        let before = *f.covariance();
        f.predict(0.5);
        assert_eq!(f.covariance(), &before);
    }
}

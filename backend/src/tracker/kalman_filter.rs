use log::debug;
use nalgebra::{Matrix4, SMatrix, SVector, Vector2, Vector4};

type Matrix8 = SMatrix<f32, 8, 8>;
type Vector8 = SVector<f32, 8>;
type Matrix4x8 = SMatrix<f32, 4, 8>;

const STD_WEIGHT_POSITION: f32 = 1.0 / 20.0;
const STD_WEIGHT_VELOCITY: f32 = 1.0 / 160.0;

/// A constant velocity [Kalman Filter] over `(center x, center y, aspect ratio, height)` and
/// their velocities.
///
/// Noise scales with the box height so that far away (small) boxes are allowed to move less.
///
/// [Kalman Filter]: https://github.com/ultralytics/ultralytics/blob/004d9730060e560c86ad79aaa1ab97167443be25/ultralytics/trackers/utils/kalman_filter.py
#[derive(Debug, Clone)]
pub struct KalmanXYAH {
    pub(super) mean: Vector8,
    covariance: Matrix8,
}

impl Default for KalmanXYAH {
    fn default() -> Self {
        Self {
            mean: Vector8::zeros(),
            covariance: Matrix8::identity(),
        }
    }
}

impl KalmanXYAH {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the state to `measurement` with zero velocity.
    pub fn initiate(&mut self, measurement: Vector4<f32>) {
        let h = measurement[3];
        let position = 2.0 * STD_WEIGHT_POSITION * h;
        let velocity = 10.0 * STD_WEIGHT_VELOCITY * h;

        self.mean = Vector8::zeros();
        self.mean.fixed_rows_mut::<4>(0).copy_from(&measurement);
        self.covariance = squared_diagonal([
            position, position, 1e-2, position, velocity, velocity, 1e-5, velocity,
        ]);
    }

    pub fn predict(&mut self) {
        let h = self.mean[3];
        let position = STD_WEIGHT_POSITION * h;
        let velocity = STD_WEIGHT_VELOCITY * h;
        let noise = squared_diagonal([
            position, position, 1e-2, position, velocity, velocity, 1e-5, velocity,
        ]);
        let motion = motion_matrix();

        self.mean = motion * self.mean;
        self.covariance = motion * self.covariance * motion.transpose() + noise;
    }

    /// Corrects the state with `measurement`.
    ///
    /// The prediction is kept as is when the projected covariance is not positive definite.
    pub fn update(&mut self, measurement: Vector4<f32>) {
        let (projected_mean, projected_cov) = self.project();
        let Some(cholesky) = projected_cov.cholesky() else {
            debug!("skipping kalman update with non SPD covariance {projected_cov:?}");
            return;
        };
        let observation = observation_matrix();
        let gain = self.covariance * observation.transpose() * cholesky.inverse();

        self.mean += gain * (measurement - projected_mean);
        self.covariance -= gain * projected_cov * gain.transpose();
    }

    /// Squared Mahalanobis distance of the `measurement` center to the projected state.
    ///
    /// Returns infinity when the projected position covariance is degenerate.
    pub fn gating_distance(&self, measurement: Vector4<f32>) -> f32 {
        let (projected_mean, projected_cov) = self.project();
        let diff = Vector2::new(
            measurement[0] - projected_mean[0],
            measurement[1] - projected_mean[1],
        );

        match projected_cov.fixed_view::<2, 2>(0, 0).into_owned().cholesky() {
            Some(cholesky) => diff.dot(&cholesky.solve(&diff)),
            None => f32::INFINITY,
        }
    }

    /// The estimated box as `[top left x, top left y, width, height]`.
    pub fn tlwh(&self) -> [f32; 4] {
        let (cx, cy, aspect, h) = (self.mean[0], self.mean[1], self.mean[2], self.mean[3]);
        let w = aspect * h;
        [cx - w / 2.0, cy - h / 2.0, w, h]
    }

    fn project(&self) -> (Vector4<f32>, Matrix4<f32>) {
        let h = self.mean[3];
        let position = STD_WEIGHT_POSITION * h;
        let noise = Matrix4::from_diagonal(
            &Vector4::new(position, position, 1e-1, position).map(|s| s * s),
        );
        let observation = observation_matrix();

        (
            observation * self.mean,
            observation * self.covariance * observation.transpose() + noise,
        )
    }
}

/// Adds each velocity to its position.
fn motion_matrix() -> Matrix8 {
    let mut motion = Matrix8::identity();
    motion.fixed_view_mut::<4, 4>(0, 4).fill_with_identity();
    motion
}

/// Selects the position half of the state.
fn observation_matrix() -> Matrix4x8 {
    let mut observation = Matrix4x8::zeros();
    observation.fixed_view_mut::<4, 4>(0, 0).fill_with_identity();
    observation
}

fn squared_diagonal(std: [f32; 8]) -> Matrix8 {
    Matrix8::from_diagonal(&Vector8::from(std.map(|s| s * s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_round_trips_tlwh() {
        let mut kalman = KalmanXYAH::new();
        kalman.initiate(Vector4::new(25.0, 50.0, 0.5, 60.0));

        let tlwh = kalman.tlwh();
        assert!((tlwh[0] - 10.0).abs() < 1e-4);
        assert!((tlwh[1] - 20.0).abs() < 1e-4);
        assert!((tlwh[2] - 30.0).abs() < 1e-4);
        assert!((tlwh[3] - 60.0).abs() < 1e-4);
    }

    #[test]
    fn motion_adds_velocity() {
        let mut kalman = KalmanXYAH::new();
        kalman.initiate(Vector4::new(100.0, 100.0, 0.5, 40.0));
        kalman.mean[4] = 3.0;
        kalman.predict();

        assert!((kalman.mean[0] - 103.0).abs() < 1e-4);
        assert!((kalman.mean[1] - 100.0).abs() < 1e-4);
    }

    #[test]
    fn update_moves_toward_measurement() {
        let mut kalman = KalmanXYAH::new();
        kalman.initiate(Vector4::new(100.0, 100.0, 0.5, 40.0));
        kalman.predict();
        kalman.update(Vector4::new(110.0, 100.0, 0.5, 40.0));

        assert!(kalman.mean[0] > 100.0 && kalman.mean[0] < 110.0);
        assert!(kalman.mean[4] > 0.0);
    }

    #[test]
    fn gating_distance_grows_with_offset() {
        let mut kalman = KalmanXYAH::new();
        kalman.initiate(Vector4::new(100.0, 100.0, 0.5, 40.0));

        let near = kalman.gating_distance(Vector4::new(101.0, 100.0, 0.5, 40.0));
        let far = kalman.gating_distance(Vector4::new(200.0, 100.0, 0.5, 40.0));
        assert!(near < far);
        assert!(near < 9.4877);
    }
}

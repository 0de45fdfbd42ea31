use crate::kernels::Kernel;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

const POLY6_FACTOR: f32 = 315.0 / (64.0 * std::f32::consts::PI);
const SPIKY_GRAD_FACTOR: f32 = -45.0 / std::f32::consts::PI;

/// The classical PBF kernel pair: poly6 for density sums, spiky for
/// gradients. Both vanish outside `(0, h)`; the lower bound guards the
/// self-interaction singularity.
#[derive(Serialize, Deserialize, Debug)]
pub struct Poly6Spiky {
    h: f32,
    h2: f32,
    h3: f32,
}

impl Poly6Spiky {
    pub fn new(smoothing_length: f32) -> Poly6Spiky {
        Poly6Spiky {
            h: smoothing_length,
            h2: smoothing_length.powi(2),
            h3: smoothing_length.powi(3),
        }
    }
}

impl Kernel for Poly6Spiky {
    fn apply_on_norm(&self, r_norm: f32) -> f32 {
        if r_norm <= 0.0 || r_norm >= self.h {
            return 0.0;
        }

        let x = (self.h2 - r_norm.powi(2)) / self.h3;
        POLY6_FACTOR * x * x * x
    }

    fn gradient(&self, r: &Vector3<f32>) -> Vector3<f32> {
        let r_norm = r.norm();

        if r_norm <= 0.0 || r_norm >= self.h {
            return Vector3::zeros();
        }

        let x = (self.h - r_norm) / self.h3;
        r * (SPIKY_GRAD_FACTOR * x * x / r_norm)
    }

    fn radius(&self) -> f32 {
        self.h
    }

    fn radius_sq(&self) -> f32 {
        self.h2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: f32 = 1.1;

    #[test]
    fn poly6_vanishes_outside_support() {
        let kernel = Poly6Spiky::new(H);

        assert_eq!(kernel.apply_on_norm(0.0), 0.0);
        assert_eq!(kernel.apply_on_norm(-1.0), 0.0);
        assert_eq!(kernel.apply_on_norm(H), 0.0);
        assert_eq!(kernel.apply_on_norm(2.0 * H), 0.0);
    }

    #[test]
    fn poly6_is_positive_and_decreasing_inside_support() {
        let kernel = Poly6Spiky::new(H);

        let mut previous = f32::MAX;
        for step in 1..20 {
            let value = kernel.apply_on_norm(H * step as f32 / 20.0);
            assert!(value > 0.0);
            assert!(value < previous);
            previous = value;
        }
    }

    #[test]
    fn spiky_gradient_vanishes_at_support_bounds() {
        let kernel = Poly6Spiky::new(H);

        assert_eq!(kernel.gradient(&Vector3::zeros()), Vector3::zeros());
        assert_eq!(kernel.gradient(&Vector3::new(H, 0.0, 0.0)), Vector3::zeros());
        assert_eq!(kernel.gradient(&Vector3::new(0.0, 2.0 * H, 0.0)), Vector3::zeros());
    }

    #[test]
    fn spiky_gradient_is_antiparallel_to_separation() {
        let kernel = Poly6Spiky::new(H);

        let r = Vector3::new(0.3, 0.2, -0.1);
        let gradient = kernel.gradient(&r);

        // negative spiky factor: the gradient points from i towards j
        assert!(gradient.dot(&r) < 0.0);

        let cross = gradient.cross(&r);
        assert!(cross.norm() < 1e-5);
    }

    #[test]
    fn spiky_gradient_magnitude_grows_towards_the_center() {
        let kernel = Poly6Spiky::new(H);

        let near = kernel.gradient(&Vector3::new(0.1 * H, 0.0, 0.0)).norm();
        let far = kernel.gradient(&Vector3::new(0.9 * H, 0.0, 0.0)).norm();

        assert!(near > far);
    }
}

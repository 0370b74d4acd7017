//! Drawable placement

use glam::{Mat4, Quat, Vec3};

/// Translation, rotation and scale of a drawable, composed as `T * R * S`.
///
/// Zero or negative scale components are allowed; a flattening scale
/// produces a singular normal matrix, which the scene buffer builder
/// reports as a degenerate transform instead of failing the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    /// Turn around the world up axis, in radians.
    pub fn with_yaw(mut self, angle: f32) -> Self {
        self.rotation = Quat::from_rotation_y(angle) * self.rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl From<Transform> for Mat4 {
    fn from(t: Transform) -> Self {
        t.matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::normal_matrix;

    #[test]
    fn test_scale_rotates_then_translates() {
        let t = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0))
            .with_yaw(std::f32::consts::FRAC_PI_2)
            .with_scale(Vec3::splat(2.0));
        let p = t.matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(1.0, 2.0, 1.0), 1e-5), "{p:?}");
    }

    #[test]
    fn test_flattened_scale_has_no_normal_matrix() {
        let flat = Transform::default().with_scale(Vec3::new(1.0, 0.0, 1.0));
        assert!(normal_matrix(&flat.matrix()).is_none());
        assert!(normal_matrix(&Transform::default().matrix()).is_some());
    }
}

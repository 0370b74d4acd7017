//! Camera system

use crate::math::{is_finite_mat4, Frustum};
use glam::{Mat4, Vec3, Vec4};

/// Default near plane distance.
pub const NEAR: f32 = 0.1;
/// Default far plane distance.
pub const FAR: f32 = 100.0;

/// Clip plane of the main view; keeps everything below `y = 1000`.
pub const MAIN_CLIP_PLANE: Vec4 = Vec4::new(0.0, -1.0, 0.0, 1000.0);

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: 70f32.to_radians(),
            aspect: 1.0,
            near: NEAR,
            far: FAR,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Symmetric orthographic projection with the given half extent.
    pub fn orthographic(half_extent: f32, near: f32, far: f32) -> Self {
        Projection::Orthographic {
            left: -half_extent,
            right: half_extent,
            bottom: -half_extent,
            top: half_extent,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        match self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(*fov_y, *aspect, *near, *far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(*left, *right, *bottom, *top, *near, *far),
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = self {
            *a = aspect;
        }
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
    /// World-space clip plane; fragments with `dot(plane, (p, 1)) < 0` are discarded.
    pub clip_plane: Vec4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
            clip_plane: MAIN_CLIP_PLANE,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_clip_plane(mut self, plane: Vec4) -> Self {
        self.clip_plane = plane;
        self
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection_matrix())
    }

    /// True when the view and projection are usable for rendering.
    pub fn is_valid(&self) -> bool {
        let direction = self.target - self.position;
        self.position.is_finite()
            && self.target.is_finite()
            && direction.length_squared() > 0.0
            && direction.cross(self.up).length_squared() > 0.0
            && is_finite_mat4(&self.view_projection_matrix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_camera_invalid() {
        let camera = Camera::new(Vec3::ONE, Vec3::ONE);
        assert!(!camera.is_valid());

        let camera = Camera::new(Vec3::new(0.0, f32::NAN, 0.0), Vec3::ZERO);
        assert!(!camera.is_valid());

        assert!(Camera::default().is_valid());
    }

    #[test]
    fn test_clip_plane_defaults_to_main_view() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO);
        assert_eq!(camera.clip_plane, MAIN_CLIP_PLANE);
        let above = Vec4::new(0.0, 1.0, 0.0, -0.5);
        assert_eq!(camera.with_clip_plane(above).clip_plane, above);
    }
}

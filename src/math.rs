//! Matrix helpers and view-frustum culling.

use glam::{Mat3, Mat4, Vec3, Vec4};

/// Determinant relative to the product of column lengths below which a
/// 3x3 is treated as singular. Independent of the overall scale, so tiny
/// but well-shaped transforms still invert.
pub const SINGULAR_EPSILON: f32 = 1e-6;

/// Inverse-transpose of the upper 3x3 of `model`, or `None` when it is singular.
pub fn normal_matrix(model: &Mat4) -> Option<Mat3> {
    let upper = Mat3::from_mat4(*model);
    let volume = upper.x_axis.length() * upper.y_axis.length() * upper.z_axis.length();
    let det = upper.determinant();
    if !det.is_finite() || volume == 0.0 || !volume.is_finite() {
        return None;
    }
    if (det / volume).abs() < SINGULAR_EPSILON {
        return None;
    }
    let normal = upper.inverse().transpose();
    normal.is_finite().then_some(normal)
}

pub fn is_finite_mat4(m: &Mat4) -> bool {
    m.to_cols_array().iter().all(|v| v.is_finite())
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// Plane `normal · p + d = 0`, with the inside on the side the normal points to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    fn from_row(row: Vec4) -> Self {
        let normal = row.truncate();
        let len = normal.length();
        if len > 0.0 {
            Self {
                normal: normal / len,
                d: row.w / len,
            }
        } else {
            Self { normal, d: row.w }
        }
    }

    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// Six clip planes extracted from a view-projection matrix with a `[0, 1]` depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far.
    pub planes: [Plane; 6],
}

impl Frustum {
    pub fn from_view_projection(m: &Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        Self {
            planes: [
                Plane::from_row(r3 + r0),
                Plane::from_row(r3 - r0),
                Plane::from_row(r3 + r1),
                Plane::from_row(r3 - r1),
                Plane::from_row(r2),
                Plane::from_row(r3 - r2),
            ],
        }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.distance(point) >= 0.0)
    }

    /// Conservative box test: `false` only when the box is fully outside one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let positive = Vec3::new(
                if plane.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            plane.distance(positive) >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_normal_matrix_identity_for_rigid() {
        let model = Mat4::from_rotation_translation(
            Quat::from_rotation_y(0.7),
            Vec3::new(3.0, -2.0, 1.0),
        );
        let n = normal_matrix(&model).unwrap();
        assert!(n.abs_diff_eq(Mat3::from_mat4(model), 1e-5));
    }

    #[test]
    fn test_normal_matrix_keeps_normals_perpendicular() {
        let model = Mat4::from_scale(Vec3::new(4.0, 1.0, 0.5));
        let n = normal_matrix(&model).unwrap();
        let tangent = Vec3::new(1.0, 1.0, 0.0).normalize();
        let normal = Vec3::new(1.0, -1.0, 0.0).normalize();
        let world_tangent = Mat3::from_mat4(model) * tangent;
        let world_normal = n * normal;
        assert!(world_tangent.dot(world_normal).abs() < 1e-5);
    }

    #[test]
    fn test_tiny_uniform_scale_still_inverts() {
        let model = Mat4::from_scale_rotation_translation(
            Vec3::splat(0.001),
            Quat::from_rotation_y(1.0),
            Vec3::ZERO,
        );
        let n = normal_matrix(&model).unwrap();
        let expected = Mat3::from_mat4(model).inverse().transpose();
        assert!(n.abs_diff_eq(expected, expected.x_axis.length() * 1e-5));
        // Rotation survives, so the normal turns with the instance.
        let turned = (n * Vec3::X).normalize();
        assert!(turned.abs_diff_eq(Quat::from_rotation_y(1.0) * Vec3::X, 1e-5));
    }

    #[test]
    fn test_nearly_coplanar_axes_rejected() {
        let upper = Mat3::from_cols(Vec3::X, Vec3::Y, Vec3::new(1.0, 1.0, 1e-9));
        assert!(normal_matrix(&Mat4::from_mat3(upper)).is_none());
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let model = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert!(normal_matrix(&model).is_none());
    }

    #[test]
    fn test_frustum_culls_box_behind_camera() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&(proj * view));

        assert!(frustum.contains_point(Vec3::ZERO));
        assert!(frustum.intersects_aabb(&Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0))));
        assert!(!frustum.intersects_aabb(&Aabb::new(
            Vec3::new(-1.0, -1.0, 10.0),
            Vec3::new(1.0, 1.0, 12.0)
        )));
    }
}

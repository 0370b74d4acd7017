//! Triangle setup and rasterization.
//!
//! Clip-space triangles are clipped against the near plane (`z >= 0`),
//! projected to the viewport and walked with edge functions over their
//! bounding box. Both windings are rasterized. Varyings are interpolated
//! perspective-correctly; depth is interpolated linearly in screen space.

use glam::{Vec2, Vec3, Vec3Swizzles, Vec4, Vec4Swizzles};

const EPSILON: f32 = 1e-7;

/// A vertex after the vertex stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ClipVertex {
    pub clip: Vec4,
    pub world: Vec3,
    pub normal: Vec3,
}

impl ClipVertex {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            clip: self.clip.lerp(other.clip, t),
            world: self.world.lerp(other.world, t),
            normal: self.normal.lerp(other.normal, t),
        }
    }
}

/// One covered pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Fragment {
    pub x: u32,
    pub y: u32,
    /// NDC depth in `[0, 1]`.
    pub depth: f32,
    /// Largest screen-space depth derivative of the triangle.
    pub slope: f32,
    pub world: Vec3,
    pub normal: Vec3,
}

/// Sutherland-Hodgman against the single plane `z >= 0`.
pub(crate) fn clip_near(polygon: &[ClipVertex]) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(polygon.len() + 1);
    for (i, a) in polygon.iter().enumerate() {
        let b = &polygon[(i + 1) % polygon.len()];
        let (da, db) = (a.clip.z, b.clip.z);
        if da >= 0.0 {
            out.push(*a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            let mut crossing = a.lerp(b, da / (da - db));
            crossing.clip.z = 0.0;
            out.push(crossing);
        }
    }
    out
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Rasterizes one triangle into a `width x height` viewport.
pub(crate) fn rasterize_triangle(
    vertices: [ClipVertex; 3],
    width: u32,
    height: u32,
    emit: &mut impl FnMut(Fragment),
) {
    let polygon = clip_near(&vertices);
    if polygon.len() < 3 {
        return;
    }
    for i in 1..polygon.len() - 1 {
        rasterize_clipped([polygon[0], polygon[i], polygon[i + 1]], width, height, emit);
    }
}

fn rasterize_clipped(
    triangle: [ClipVertex; 3],
    width: u32,
    height: u32,
    emit: &mut impl FnMut(Fragment),
) {
    let mut screen = [Vec3::ZERO; 3];
    let mut inv_w = [0.0f32; 3];
    for (i, v) in triangle.iter().enumerate() {
        if v.clip.w <= EPSILON {
            return;
        }
        let iw = 1.0 / v.clip.w;
        let ndc = v.clip.xyz() * iw;
        screen[i] = Vec3::new(
            (ndc.x * 0.5 + 0.5) * width as f32,
            (0.5 - ndc.y * 0.5) * height as f32,
            ndc.z,
        );
        inv_w[i] = iw;
    }
    let [s0, s1, s2] = screen;
    let area = edge(s0.xy(), s1.xy(), s2.xy());
    if !area.is_finite() || area.abs() < EPSILON {
        return;
    }

    // Depth plane gradients in NDC units per pixel
    let e1 = s1 - s0;
    let e2 = s2 - s0;
    let dz_dx = (e1.z * e2.y - e2.z * e1.y) / area;
    let dz_dy = (e2.z * e1.x - e1.z * e2.x) / area;
    let slope = dz_dx.abs().max(dz_dy.abs());

    let min = s0.xy().min(s1.xy()).min(s2.xy());
    let max = s0.xy().max(s1.xy()).max(s2.xy());
    let x0 = min.x.floor().max(0.0) as u32;
    let y0 = min.y.floor().max(0.0) as u32;
    let x1 = (max.x.ceil().max(0.0) as u32).min(width);
    let y1 = (max.y.ceil().max(0.0) as u32).min(height);

    for y in y0..y1 {
        for x in x0..x1 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(s1.xy(), s2.xy(), p) / area;
            let w1 = edge(s2.xy(), s0.xy(), p) / area;
            let w2 = edge(s0.xy(), s1.xy(), p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let depth = w0 * s0.z + w1 * s1.z + w2 * s2.z;
            if !(0.0..=1.0).contains(&depth) {
                continue;
            }
            let one_over_w = w0 * inv_w[0] + w1 * inv_w[1] + w2 * inv_w[2];
            let b = [
                w0 * inv_w[0] / one_over_w,
                w1 * inv_w[1] / one_over_w,
                w2 * inv_w[2] / one_over_w,
            ];
            let world =
                triangle[0].world * b[0] + triangle[1].world * b[1] + triangle[2].world * b[2];
            let normal =
                triangle[0].normal * b[0] + triangle[1].normal * b[1] + triangle[2].normal * b[2];
            emit(Fragment {
                x,
                y,
                depth,
                slope,
                world,
                normal,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32, y: f32, z: f32, w: f32) -> ClipVertex {
        ClipVertex {
            clip: Vec4::new(x, y, z, w),
            world: Vec3::new(x, y, z),
            normal: Vec3::Z,
        }
    }

    fn coverage(triangle: [ClipVertex; 3], size: u32) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        rasterize_triangle(triangle, size, size, &mut |f| fragments.push(f));
        fragments
    }

    #[test]
    fn test_both_windings_cover_same_pixels() {
        let a = vertex(-1.0, -1.0, 0.5, 1.0);
        let b = vertex(1.0, -1.0, 0.5, 1.0);
        let c = vertex(-1.0, 1.0, 0.5, 1.0);
        let ccw: Vec<(u32, u32)> = coverage([a, b, c], 8).iter().map(|f| (f.x, f.y)).collect();
        let cw: Vec<(u32, u32)> = coverage([a, c, b], 8).iter().map(|f| (f.x, f.y)).collect();
        assert!(!ccw.is_empty());
        assert_eq!(ccw, cw);
    }

    #[test]
    fn test_flat_triangle_has_zero_slope() {
        let fragments = coverage(
            [
                vertex(-1.0, -1.0, 0.25, 1.0),
                vertex(3.0, -1.0, 0.25, 1.0),
                vertex(-1.0, 3.0, 0.25, 1.0),
            ],
            4,
        );
        assert_eq!(fragments.len(), 16);
        assert!(fragments.iter().all(|f| (f.depth - 0.25).abs() < 1e-6 && f.slope.abs() < 1e-6));
    }

    #[test]
    fn test_near_plane_clipping() {
        let inside = vertex(0.0, 0.5, 0.5, 1.0);
        let behind = vertex(-0.5, -0.5, -1.0, 1.0);
        let also_behind = vertex(0.5, -0.5, -1.0, 1.0);
        let clipped = clip_near(&[inside, behind, also_behind]);
        assert_eq!(clipped.len(), 3);
        assert!(clipped.iter().all(|v| v.clip.z >= 0.0));

        let all_behind = [behind, also_behind, vertex(0.0, 0.5, -0.1, 1.0)];
        assert!(clip_near(&all_behind).is_empty());
    }

    #[test]
    fn test_perspective_correct_interpolation() {
        // Same screen triangle, far vertex carries a larger w.
        let near = ClipVertex {
            clip: Vec4::new(-1.0, -1.0, 0.5, 1.0),
            world: Vec3::ZERO,
            normal: Vec3::Z,
        };
        let far = ClipVertex {
            clip: Vec4::new(4.0, -4.0, 2.0, 4.0),
            world: Vec3::new(10.0, 0.0, 0.0),
            normal: Vec3::Z,
        };
        let top = ClipVertex {
            clip: Vec4::new(-1.0, 1.0, 0.5, 1.0),
            world: Vec3::ZERO,
            normal: Vec3::Z,
        };
        let fragments = coverage([near, far, top], 16);
        let midpoint = fragments
            .iter()
            .find(|f| f.x == 8 && f.y == 12)
            .copied()
            .unwrap();
        // Halfway across the screen is much less than halfway in world space.
        assert!(midpoint.world.x < 5.0);
    }
}

//! Terrain height fields.

/// Grid of heights, sampled bilinearly. Values are usually in `[0, 1]` but
/// any finite value is accepted; [`HeightMap::range`] reports the extremes.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMap {
    width: u32,
    depth: u32,
    samples: Vec<f32>,
    range: (f32, f32),
}

fn sample_range(samples: &[f32]) -> (f32, f32) {
    samples
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)))
}

impl HeightMap {
    /// Builds a height map from row-major samples. `None` when the sizes
    /// disagree or a sample is not finite.
    pub fn new(width: u32, depth: u32, samples: Vec<f32>) -> Option<Self> {
        if width == 0 || depth == 0 || samples.len() != (width * depth) as usize {
            return None;
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return None;
        }
        let range = sample_range(&samples);
        Some(Self {
            width,
            depth,
            samples,
            range,
        })
    }

    pub fn flat() -> Self {
        Self {
            width: 1,
            depth: 1,
            samples: vec![0.0],
            range: (0.0, 0.0),
        }
    }

    /// Smallest and largest sample. Bilinear samples never leave this range.
    pub fn range(&self) -> (f32, f32) {
        self.range
    }

    /// Samples `f(u, v)` on a `width x depth` grid with `u, v` in `[0, 1]`.
    /// Non-finite results are stored as zero.
    pub fn from_fn(width: u32, depth: u32, f: impl Fn(f32, f32) -> f32) -> Self {
        let width = width.max(1);
        let depth = depth.max(1);
        let du = 1.0 / (width - 1).max(1) as f32;
        let dv = 1.0 / (depth - 1).max(1) as f32;
        let mut samples = Vec::with_capacity((width * depth) as usize);
        for z in 0..depth {
            for x in 0..width {
                let h = f(x as f32 * du, z as f32 * dv);
                samples.push(if h.is_finite() { h } else { 0.0 });
            }
        }
        let range = sample_range(&samples);
        Self {
            width,
            depth,
            samples,
            range,
        }
    }

    /// Rolling hills used by the demo scene.
    pub fn hills(resolution: u32) -> Self {
        Self::from_fn(resolution, resolution, |u, v| {
            let a = (u * std::f32::consts::TAU * 2.0).sin() * 0.5 + 0.5;
            let b = (v * std::f32::consts::TAU * 1.5).cos() * 0.5 + 0.5;
            a * b
        })
    }

    fn at(&self, x: u32, z: u32) -> f32 {
        let x = x.min(self.width - 1);
        let z = z.min(self.depth - 1);
        self.samples[(z * self.width + x) as usize]
    }

    /// Bilinear sample; `u` and `v` are clamped to `[0, 1]`.
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        let fx = u.clamp(0.0, 1.0) * (self.width - 1) as f32;
        let fz = v.clamp(0.0, 1.0) * (self.depth - 1) as f32;
        let x0 = fx.floor() as u32;
        let z0 = fz.floor() as u32;
        let tx = fx - x0 as f32;
        let tz = fz - z0 as f32;
        let top = self.at(x0, z0) * (1.0 - tx) + self.at(x0 + 1, z0) * tx;
        let bottom = self.at(x0, z0 + 1) * (1.0 - tx) + self.at(x0 + 1, z0 + 1) * tx;
        top * (1.0 - tz) + bottom * tz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear_midpoint() {
        let map = HeightMap::new(2, 2, vec![0.0, 1.0, 0.0, 1.0]).unwrap();
        assert!((map.sample(0.5, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(map.sample(1.0, 0.0), 1.0);
        assert_eq!(map.sample(-3.0, 9.0), 0.0);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        assert!(HeightMap::new(3, 3, vec![0.0; 8]).is_none());
        assert_eq!(HeightMap::flat().sample(0.3, 0.7), 0.0);
    }

    #[test]
    fn test_range_tracks_out_of_unit_samples() {
        let map = HeightMap::new(2, 2, vec![-2.0, 10.0, 3.0, 0.5]).unwrap();
        assert_eq!(map.range(), (-2.0, 10.0));
        assert!(HeightMap::new(1, 2, vec![0.0, f32::NAN]).is_none());
        let spiky = HeightMap::from_fn(3, 3, |u, _| if u > 0.9 { f32::INFINITY } else { u });
        assert_eq!(spiky.range(), (0.0, 0.5));
    }
}

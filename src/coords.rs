// virtual 0-999 coordinate space -> page pixels

use serde::{Deserialize, Serialize};

/// Largest valid virtual coordinate on either axis.
pub const VIRTUAL_MAX: f64 = 999.0;
const VIRTUAL_SPAN: f64 = 1000.0;

/// A point in the resolution-independent 0-999 space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VirtualPoint {
    pub x: f64,
    pub y: f64,
}

impl VirtualPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point in CSS pixels, always whole numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

/// Client size of the page's layout viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

pub fn clamp_virtual(v: f64) -> f64 {
    v.clamp(0.0, VIRTUAL_MAX)
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn scale(v: f64, dimension: f64) -> f64 {
        (clamp_virtual(v) / VIRTUAL_SPAN * dimension).floor()
    }

    pub fn to_pixels(&self, point: VirtualPoint) -> PixelPoint {
        PixelPoint {
            x: Self::scale(point.x, self.width),
            y: Self::scale(point.y, self.height),
        }
    }

    /// Scale a delta vector with the same mapping as a coordinate.
    ///
    /// The magnitude is clamped like a coordinate; the sign is kept so that
    /// negative deltas still scroll up or left.
    pub fn scale_delta(&self, dx: f64, dy: f64) -> (f64, f64) {
        let px = Self::scale(dx.abs(), self.width).copysign(dx);
        let py = Self::scale(dy.abs(), self.height).copysign(dy);
        (px, py)
    }
}

/// Evenly spaced points from `from` to `to`, excluding `from`, in virtual space.
pub fn interpolate(from: VirtualPoint, to: VirtualPoint, steps: u32) -> Vec<VirtualPoint> {
    let steps = steps.max(1);
    (1..=steps)
        .map(|i| {
            let t = f64::from(i) / f64::from(steps);
            VirtualPoint {
                x: from.x + (to.x - from.x) * t,
                y: from.y + (to.y - from.y) * t,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_pixels_floors() {
        let vp = Viewport::new(1280.0, 720.0);
        let p = vp.to_pixels(VirtualPoint::new(500.0, 200.0));
        assert_eq!(p, PixelPoint { x: 640.0, y: 144.0 });

        let p = vp.to_pixels(VirtualPoint::new(333.0, 333.0));
        assert_eq!(p.x, (333.0_f64 / 1000.0 * 1280.0).floor());
        assert_eq!(p.y, (333.0_f64 / 1000.0 * 720.0).floor());
    }

    #[test]
    fn test_out_of_range_matches_clamped() {
        let vp = Viewport::new(1000.0, 800.0);
        for (raw, clamped) in [(-50.0, 0.0), (1500.0, 999.0), (999.5, 999.0)] {
            assert_eq!(
                vp.to_pixels(VirtualPoint::new(raw, raw)),
                vp.to_pixels(VirtualPoint::new(clamped, clamped))
            );
        }
    }

    #[test]
    fn test_grid_of_points() {
        let vp = Viewport::new(1366.0, 768.0);
        for x in (0..1000).step_by(37) {
            for y in (0..1000).step_by(53) {
                let p = vp.to_pixels(VirtualPoint::new(f64::from(x), f64::from(y)));
                assert_eq!(p.x, (f64::from(x) / 1000.0 * 1366.0).floor());
                assert_eq!(p.y, (f64::from(y) / 1000.0 * 768.0).floor());
            }
        }
    }

    #[test]
    fn test_scale_delta_keeps_sign() {
        let vp = Viewport::new(1000.0, 1000.0);
        assert_eq!(vp.scale_delta(0.0, -800.0), (0.0, -800.0));
        assert_eq!(vp.scale_delta(2000.0, 10.0), (999.0, 10.0));
    }

    #[test]
    fn test_interpolate_ends_at_destination() {
        let points = interpolate(VirtualPoint::new(0.0, 0.0), VirtualPoint::new(100.0, 50.0), 5);
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], VirtualPoint::new(20.0, 10.0));
        assert_eq!(points[4], VirtualPoint::new(100.0, 50.0));

        assert_eq!(interpolate(VirtualPoint::new(0.0, 0.0), VirtualPoint::new(1.0, 1.0), 0).len(), 1);
    }
}

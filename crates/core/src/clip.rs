//! Segment clipping against the canvas rectangle and the screen-clamp policy.

use glam::DVec2;

/// Inset used by [`clamp_to_screen`]; clamped points never sit exactly on
/// the canvas border.
pub const CANVAS_EPSILON: f64 = 1e-6;

/// Clamps `p` into `[eps, 1 - eps] x [eps, y_max - eps]`.
pub fn clamp_to_screen(p: DVec2, y_max: f64) -> DVec2 {
    DVec2::new(
        p.x.clamp(CANVAS_EPSILON, 1.0 - CANVAS_EPSILON),
        p.y.clamp(CANVAS_EPSILON, y_max - CANVAS_EPSILON),
    )
}

/// Axis-aligned clipping window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl ClipRect {
    /// The canvas `[0, 1] x [0, aspect]`.
    pub fn canvas(aspect: f64) -> Self {
        Self {
            x_min: 0.0,
            x_max: 1.0,
            y_min: 0.0,
            y_max: aspect,
        }
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: DVec2) -> bool {
        p.x >= self.x_min && p.x <= self.x_max && p.y >= self.y_min && p.y <= self.y_max
    }

    /// Outcode bits: left, right, bottom, top.
    fn outcode(&self, p: DVec2) -> u8 {
        (p.x < self.x_min) as u8
            | ((p.x > self.x_max) as u8) << 1
            | ((p.y < self.y_min) as u8) << 2
            | ((p.y > self.y_max) as u8) << 3
    }

    /// Intersection of the line through `p` with direction `d` against the
    /// window edge nearest `p`, for `p` outside the window.
    ///
    /// Edges are tried left, right, bottom, top and the first valid hit wins.
    /// A hit must land strictly inside the perpendicular extent, so a line
    /// passing exactly through a corner finds nothing.
    fn edge_hit(&self, d: DVec2, p: DVec2) -> Option<DVec2> {
        if d.x != 0.0 {
            let iy = d.y / d.x * (self.x_min - p.x) + p.y;
            if self.x_min > p.x && iy > self.y_min && iy < self.y_max {
                return Some(DVec2::new(self.x_min, iy));
            }
            let iy = d.y / d.x * (self.x_max - p.x) + p.y;
            if self.x_max < p.x && iy > self.y_min && iy < self.y_max {
                return Some(DVec2::new(self.x_max, iy));
            }
        }
        if d.y != 0.0 {
            let ix = d.x / d.y * (self.y_min - p.y) + p.x;
            if self.y_min > p.y && ix > self.x_min && ix < self.x_max {
                return Some(DVec2::new(ix, self.y_min));
            }
            let ix = d.x / d.y * (self.y_max - p.y) + p.x;
            if self.y_max < p.y && ix > self.x_min && ix < self.x_max {
                return Some(DVec2::new(ix, self.y_max));
            }
        }
        None
    }

    /// Clips segment `p0`-`p1` to the window.
    ///
    /// Returns `None` when the segment is invisible: both endpoints beyond the
    /// same edge, or both outside with no edge crossing. Otherwise returns the
    /// clipped endpoints; an outside endpoint whose crossing cannot be found
    /// is returned unchanged.
    pub fn clip_line(&self, p0: DVec2, p1: DVec2) -> Option<(DVec2, DVec2)> {
        let c0 = self.outcode(p0);
        let c1 = self.outcode(p1);
        if c0 == 0 && c1 == 0 {
            return Some((p0, p1));
        }
        if c0 & c1 != 0 {
            return None;
        }
        let d = p1 - p0;
        if c0 == 0 {
            return Some((p0, self.edge_hit(d, p1).unwrap_or(p1)));
        }
        if c1 == 0 {
            return Some((self.edge_hit(d, p0).unwrap_or(p0), p1));
        }
        match (self.edge_hit(d, p0), self.edge_hit(d, p1)) {
            (None, None) => None,
            (a, b) => Some((a.unwrap_or(p0), b.unwrap_or(p1))),
        }
    }
}

//! Drawing streamlines through an abstract line sink.
//!
//! [`LineDrawable`] is implemented by the output backends (PostScript,
//! in-memory raster). Coordinates are canvas units: x in [0, 1], y in
//! [0, aspect]. Widths are in output points at the default resolution.

use glam::DVec2;

use crate::bundle::Bundle;
use crate::config::VisualizationParameters;
use crate::streamline::{ArrowStyle, Streamline};

/// Resolution assumed when a backend does not report one.
pub const DEFAULT_RESOLUTION: usize = 512;

/// A sink for lines and filled polygons.
pub trait LineDrawable {
    /// Draws a segment with the current intensity and width.
    fn line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64);

    /// Fills a closed polygon with the current intensity.
    fn polygon(&mut self, points: &[DVec2]);

    /// Intensity of later drawing, 0 (background) to 1 (full ink).
    fn set_intensity(&mut self, value: f64);

    /// Line width of later segments.
    fn set_width(&mut self, width: f64);

    /// Pixels across the canvas, used to size glyphs that must stay visible.
    fn resolution(&self) -> usize {
        DEFAULT_RESOLUTION
    }
}

/// Corners of an arrowhead with its tip at `tip`, pointing along `dir`.
///
/// Returns the tip followed by the two base corners. A zero direction gives
/// a degenerate (zero-area) head at the tip.
pub fn arrowhead(tip: DVec2, dir: DVec2, length: f64, width: f64) -> [DVec2; 3] {
    let dir = dir.normalize_or_zero();
    let base = tip - dir * length;
    let side = DVec2::new(dir.y, -dir.x) * width;
    [tip, base + side, base - side]
}

impl Streamline {
    /// Draws the polyline segment by segment with taper-scaled intensity
    /// and width, then the arrowhead if the style asks for one.
    pub fn draw(&self, pic: &mut dyn LineDrawable, vis: &VisualizationParameters) {
        let samples = self.samples();
        for pair in samples.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            pic.set_intensity(self.intensity() * b.intensity);
            pic.set_width(vis.draw_width(b.pos.x, b.pos.y) * b.intensity);
            pic.line(b.pos.x, b.pos.y, a.pos.x, a.pos.y);
        }
        self.draw_arrow(pic, vis);
    }

    /// Arrowhead at the head, its base found by walking back along the
    /// streamline by the arrow length.
    fn draw_arrow(&self, pic: &mut dyn LineDrawable, vis: &VisualizationParameters) {
        let (length, width, solid) = match self.style().arrow {
            ArrowStyle::None => return,
            ArrowStyle::Open { length, width } => (length, width, false),
            ArrowStyle::Solid { length, width } => (length, width, true),
        };
        if self.sample_count() < 2 || length <= 0.0 {
            return;
        }
        let lens = self.arc_lengths();
        let total = lens.last().copied().unwrap_or(0.0);
        let tip = self.head();
        let base = self
            .point_at_arclength(&lens, (total - length).max(0.0))
            .unwrap_or_else(|| self.tail());
        let dir = tip - base;
        if dir.length_squared() == 0.0 {
            return;
        }
        let head = arrowhead(tip, dir, dir.length(), width);
        pic.set_intensity(self.intensity());
        if solid {
            pic.polygon(&head);
        } else {
            pic.set_width(vis.draw_width(tip.x, tip.y));
            pic.line(head[0].x, head[0].y, head[1].x, head[1].y);
            pic.line(head[0].x, head[0].y, head[2].x, head[2].y);
        }
    }
}

impl Bundle {
    /// Draws every streamline.
    pub fn draw(&self, pic: &mut dyn LineDrawable, vis: &VisualizationParameters) {
        for st in self {
            st.draw(pic, vis);
        }
    }
}

/// Records every call, for tests of drawing code.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub lines: Vec<[f64; 4]>,
    pub polygons: Vec<Vec<DVec2>>,
    pub intensities: Vec<f64>,
    pub widths: Vec<f64>,
}

#[cfg(test)]
impl LineDrawable for Recorder {
    fn line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64) {
        self.lines.push([x0, y0, x1, y1]);
    }

    fn polygon(&mut self, points: &[DVec2]) {
        self.polygons.push(points.to_vec());
    }

    fn set_intensity(&mut self, value: f64) {
        self.intensities.push(value);
    }

    fn set_width(&mut self, width: f64) {
        self.widths.push(width);
    }
}

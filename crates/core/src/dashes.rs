//! Dashed streamlines: each streamline cut into arrow-shaped dashes.
//!
//! Every dash is a filled "fancy arrow": an arrowhead at the downstream end
//! with a lip, and a body that narrows to a point upstream. The arrow is
//! traced backwards through the vector field from its tip so it bends with
//! the flow.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::config::VisualizationParameters;
use crate::field::VectorField;
use crate::picture::LineDrawable;
use crate::streamline::Streamline;

/// Sizes of the dash glyphs, in canvas units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashStyle {
    /// Dash length for fixed-length dashing; the count per streamline is
    /// rounded so dashes fill it exactly.
    pub dash_length: f64,
    /// Gap between consecutive dashes.
    pub separation: f64,
    pub head_length: f64,
    /// Half-width of the arrowhead base.
    pub head_width: f64,
    /// Body half-width at the lip, as a fraction of `head_width`.
    pub lip_ratio: f64,
    /// Tracing step along the field.
    pub step: f64,
}

impl Default for DashStyle {
    fn default() -> Self {
        Self {
            dash_length: 0.08,
            separation: 0.01,
            head_length: 0.01,
            head_width: 0.0066,
            lip_ratio: 0.5,
            step: 0.005,
        }
    }
}

fn flow_dir(field: &VectorField, p: DVec2) -> DVec2 {
    field.value_at(p.x, p.y).normalize_or_zero()
}

/// Outline of a fancy arrow with its tip at `tip`, `length` long in total.
///
/// The outline runs tip, one side of the head and body, the other side
/// back, and closes at the tip.
pub fn fancy_arrow(
    field: &VectorField,
    tip: DVec2,
    length: f64,
    head_length: f64,
    head_width: f64,
    lip_ratio: f64,
    step: f64,
) -> Vec<DVec2> {
    let step = if step > 0.0 { step } else { DashStyle::default().step };

    let steps = ((head_length / step).floor() as usize).max(1);
    let dlen = head_length / steps as f64;
    let mut p = tip;
    let mut dir = flow_dir(field, p);
    p -= dir * dlen;
    for _ in 1..steps {
        dir = flow_dir(field, p);
        p -= dir * dlen;
    }
    let side = DVec2::new(dir.y, -dir.x);
    let corner1 = p + side * head_width;
    let corner2 = p - side * head_width;
    let lip1 = p + side * lip_ratio * head_width;
    let lip2 = p - side * lip_ratio * head_width;

    let body = length - head_length;
    let body_steps = if body > 0.0 { (body / step).floor() as usize } else { 0 };
    let mut left = Vec::with_capacity(body_steps);
    let mut right = Vec::with_capacity(body_steps);
    if body_steps > 0 {
        let dlen = body / body_steps as f64;
        for i in 0..body_steps {
            let dir = flow_dir(field, p);
            p -= dir * dlen;
            let t = (body_steps - i) as f64 / body_steps as f64;
            let w = t * head_width * lip_ratio;
            let side = DVec2::new(dir.y, -dir.x);
            left.push(p + side * w);
            right.push(p - side * w);
        }
    }

    let mut outline = Vec::with_capacity(2 * body_steps + 6);
    outline.extend([tip, corner1, lip1]);
    outline.extend(left.iter().copied());
    outline.extend(right.iter().rev().copied());
    outline.extend([lip2, corner2, tip]);
    outline
}

/// Cuts `st` into equal dashes of about `style.dash_length`.
pub fn draw_dashed(st: &Streamline, field: &VectorField, pic: &mut dyn LineDrawable, style: &DashStyle) {
    let lens = st.arc_lengths();
    let total = lens.last().copied().unwrap_or(0.0);
    if total <= 0.0 || style.dash_length <= 0.0 {
        return;
    }
    let count = ((0.5 + total / style.dash_length).floor() as usize).max(1);
    let dash = total / count as f64;
    let body = dash - style.separation;
    if body <= 0.0 {
        return;
    }
    pic.set_intensity(st.intensity());
    for i in 0..count {
        let end = (i + 1) as f64 * dash - 0.5 * style.separation;
        let Some(tip) = st.point_at_arclength(&lens, end) else {
            continue;
        };
        let outline = fancy_arrow(
            field,
            tip,
            body,
            style.head_length,
            style.head_width,
            style.lip_ratio,
            style.step,
        );
        pic.polygon(&outline);
    }
}

/// One dash placed along a streamline, by arclength from the tail.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PlacedDash {
    centre: f64,
    half: f64,
    /// Local arrow length over the maximum arrow length.
    scale: f64,
}

/// Dashes fitted around a chosen centre and the arclength they leave bare.
#[derive(Debug, Default)]
struct DashLayout {
    dashes: Vec<PlacedDash>,
    unused: f64,
}

/// Walks out from `centre` in both directions placing dashes sized by the
/// local arrow length, stopping each way at the first one that won't fit.
fn layout(
    st: &Streamline,
    lens: &[f64],
    vis: &VisualizationParameters,
    centre: f64,
    separation: f64,
    delta: f64,
) -> DashLayout {
    let total = lens.last().copied().unwrap_or(0.0);
    let max = vis.max_arrow_length();
    let at = |d: f64| st.point_at_arclength(lens, d);
    // half length, gap after it and scale at arclength d
    let sizes = |d: f64| {
        at(d).map(|p| {
            let al = vis.arrow_length(p.x, p.y);
            (0.5 * al, separation * al / max, al / max)
        })
    };
    let bare = DashLayout {
        dashes: Vec::new(),
        unused: total,
    };

    let Some((half, gap, scale)) = sizes(centre) else {
        return bare;
    };
    if at(centre + half).is_none() || at(centre - half).is_none() {
        return bare;
    }
    let mut dashes = vec![PlacedDash { centre, half, scale }];
    let mut start = centre - half;
    let mut end = centre + half;

    let mut place = centre + half + gap;
    'forward: while place < total {
        let Some((mut len, mut sep, mut s)) = sizes(place) else {
            break;
        };
        let mut c = place + delta;
        while c - len < place {
            c += delta;
            if c > total {
                break 'forward;
            }
            let Some(next) = sizes(c) else {
                break 'forward;
            };
            (len, sep, s) = next;
        }
        if at(c + len).is_none() || at(c - len).is_none() {
            break;
        }
        dashes.push(PlacedDash {
            centre: c,
            half: len,
            scale: s,
        });
        end = c + len;
        place = c + len + sep;
    }

    let mut place = centre - half - gap;
    'backward: while place > 0.0 {
        let Some((mut len, mut sep, mut s)) = sizes(place) else {
            break;
        };
        let mut c = place - delta;
        while c + len > place {
            c -= delta;
            if c < 0.0 {
                break 'backward;
            }
            let Some(next) = sizes(c) else {
                break 'backward;
            };
            (len, sep, s) = next;
        }
        if at(c + len).is_none() || at(c - len).is_none() {
            break;
        }
        dashes.push(PlacedDash {
            centre: c,
            half: len,
            scale: s,
        });
        start = c - len;
        place = c - len - sep;
    }

    DashLayout {
        dashes,
        unused: start + (total - end),
    }
}

/// Dashes whose length follows the arrow-length image.
///
/// The central dash is slid forward in small steps from the midpoint to
/// find the placement that leaves the least of the streamline bare.
pub fn variable_draw_dashed(
    st: &Streamline,
    field: &VectorField,
    vis: &VisualizationParameters,
    pic: &mut dyn LineDrawable,
    style: &DashStyle,
) {
    let lens = st.arc_lengths();
    let total = lens.last().copied().unwrap_or(0.0);
    if total <= 0.0 || vis.max_arrow_length() <= 0.0 || style.step <= 0.0 {
        return;
    }
    let delta = 0.5 * style.step;

    let mut candidate = 0.5 * total;
    let half = st
        .point_at_arclength(&lens, candidate)
        .map_or(0.0, |p| 0.5 * vis.arrow_length(p.x, p.y));
    let mut best = (candidate, total);
    for _ in 0..(half / style.step) as usize {
        let unused = layout(st, &lens, vis, candidate, style.separation, delta).unused;
        if unused < best.1 {
            best = (candidate, unused);
        }
        candidate += style.step;
    }

    pic.set_intensity(st.intensity());
    for dash in layout(st, &lens, vis, best.0, style.separation, delta).dashes {
        let Some(tip) = st.point_at_arclength(&lens, dash.centre + dash.half) else {
            continue;
        };
        let outline = fancy_arrow(
            field,
            tip,
            2.0 * dash.half,
            dash.scale * style.head_length,
            dash.scale * style.head_width,
            style.lip_ratio,
            style.step,
        );
        pic.polygon(&outline);
    }
}

impl Bundle {
    /// Draws every streamline as dashes, variable-length when an
    /// arrow-length image is set.
    pub fn draw_dashes(
        &self,
        field: &VectorField,
        vis: &VisualizationParameters,
        pic: &mut dyn LineDrawable,
        style: &DashStyle,
    ) {
        for st in self {
            if vis.arrow_length_varies() {
                variable_draw_dashed(st, field, vis, pic, style);
            } else {
                draw_dashed(st, field, pic, style);
            }
        }
    }
}

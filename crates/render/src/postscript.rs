//! PostScript pictures.
//!
//! The page maps the unit-wide canvas onto a 6 inch square offset 1 inch
//! from the left and 3 inches from the bottom. Widths given to
//! [`LineDrawable::set_width`] are in points of a 512 point wide canvas.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flowline_core::error::FlowError;
use flowline_core::picture::LineDrawable;
use glam::DVec2;
use tracing::debug;

const PROLOGUE: &str = "\
%!
%
% Streamlines
%
/size 6 def
72 72 3 mul translate
72 size mul dup scale

/ln {
newpath
moveto lineto
stroke
} def

1 72 div size div setlinewidth
/init_width { 1 72 div size div setlinewidth } def
/sw { 72 div size div setlinewidth } def
";

/// A [`LineDrawable`] writing PostScript to `W`.
///
/// Drawing calls cannot fail; the first write error is kept and returned
/// by [`PostScriptPicture::finish`].
pub struct PostScriptPicture<W: Write> {
    out: W,
    aspect: f64,
    width: f64,
    /// Width last emitted with `sw`.
    emitted_width: Option<f64>,
    error: Option<std::io::Error>,
}

impl PostScriptPicture<BufWriter<File>> {
    /// Creates `path` and writes the prologue.
    pub fn create(path: &Path, aspect: f64) -> Result<Self, FlowError> {
        let file = File::create(path).map_err(|e| FlowError::Io(format!("{}: {e}", path.display())))?;
        Self::new(BufWriter::new(file), aspect)
    }
}

impl<W: Write> PostScriptPicture<W> {
    /// Wraps `out` and writes the prologue. `aspect` is the canvas height.
    pub fn new(mut out: W, aspect: f64) -> Result<Self, FlowError> {
        out.write_all(PROLOGUE.as_bytes())?;
        Ok(Self {
            out,
            aspect,
            width: 1.0,
            emitted_width: None,
            error: None,
        })
    }

    fn emit(&mut self, text: std::fmt::Arguments<'_>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.out.write_fmt(text) {
            self.error = Some(e);
        }
    }

    /// Writes the border and `showpage`, flushes, and returns the writer.
    ///
    /// Returns `FlowError::Io` if any earlier drawing call failed to write.
    pub fn finish(mut self) -> Result<W, FlowError> {
        let aspect = self.aspect;
        self.emit(format_args!(
            "\n0 setgray\n2 72 div size div setlinewidth\n0 0 moveto\n1 0 lineto\n1 {aspect} lineto\n0 {aspect} lineto\nclosepath stroke\n\nshowpage\n"
        ));
        if let Some(e) = self.error.take() {
            return Err(e.into());
        }
        self.out.flush()?;
        debug!(aspect, "postscript finished");
        Ok(self.out)
    }
}

impl<W: Write> LineDrawable for PostScriptPicture<W> {
    fn line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64) {
        if self.emitted_width != Some(self.width) {
            let w = self.width;
            self.emit(format_args!("{w:.4} sw\n"));
            self.emitted_width = Some(w);
        }
        self.emit(format_args!("{x0:.6} {y0:.6} {x1:.6} {y1:.6} ln\n"));
    }

    fn polygon(&mut self, points: &[DVec2]) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        self.emit(format_args!("newpath\n{:.6} {:.6} moveto\n", first.x, first.y));
        for p in rest {
            self.emit(format_args!("{:.6} {:.6} lineto\n", p.x, p.y));
        }
        self.emit(format_args!("closepath fill\n"));
    }

    fn set_intensity(&mut self, value: f64) {
        let gray = 1.0 - value.clamp(0.0, 1.0);
        self.emit(format_args!("{gray:.4} setgray\n"));
    }

    fn set_width(&mut self, width: f64) {
        self.width = width.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(pic: PostScriptPicture<Vec<u8>>) -> String {
        String::from_utf8(pic.finish().unwrap()).unwrap()
    }

    /// A writer that fails after `budget` bytes.
    struct Failing {
        budget: usize,
    }

    impl Write for Failing {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.len() > self.budget {
                return Err(std::io::Error::other("disk full"));
            }
            self.budget -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn prologue_and_epilogue() {
        let pic = PostScriptPicture::new(Vec::new(), 1.0).unwrap();
        let s = text(pic);
        assert!(s.starts_with("%!\n"));
        assert!(s.contains("/size 6 def"));
        assert!(s.contains("/ln {"));
        assert!(s.contains("/init_width"));
        assert!(s.contains("/sw {"));
        assert!(s.contains("1 1 lineto"));
        assert!(s.trim_end().ends_with("showpage"));
    }

    #[test]
    fn border_uses_aspect() {
        let s = text(PostScriptPicture::new(Vec::new(), 0.5).unwrap());
        assert!(s.contains("1 0.5 lineto"));
        assert!(s.contains("0 0.5 lineto"));
    }

    #[test]
    fn lines_set_width_once() {
        let mut pic = PostScriptPicture::new(Vec::new(), 1.0).unwrap();
        pic.set_width(2.0);
        pic.line(0.1, 0.2, 0.3, 0.4);
        pic.line(0.3, 0.4, 0.5, 0.6);
        let s = text(pic);
        assert_eq!(s.matches(" sw\n").count(), 1);
        assert!(s.contains("2.0000 sw"));
        assert!(s.contains("0.100000 0.200000 0.300000 0.400000 ln"));
        assert_eq!(s.matches(" ln\n").count(), 2);
    }

    #[test]
    fn intensity_maps_to_inverse_gray() {
        let mut pic = PostScriptPicture::new(Vec::new(), 1.0).unwrap();
        pic.set_intensity(1.0);
        pic.set_intensity(0.25);
        let s = text(pic);
        assert!(s.contains("0.0000 setgray"));
        assert!(s.contains("0.7500 setgray"));
    }

    #[test]
    fn polygon_is_filled_path() {
        let mut pic = PostScriptPicture::new(Vec::new(), 1.0).unwrap();
        pic.polygon(&[DVec2::new(0.0, 0.0), DVec2::new(0.5, 0.0), DVec2::new(0.5, 0.5)]);
        pic.polygon(&[]);
        let s = text(pic);
        assert!(s.contains("newpath\n0.000000 0.000000 moveto\n0.500000 0.000000 lineto\n"));
        assert_eq!(s.matches("closepath fill").count(), 1);
    }

    #[test]
    fn write_failure_surfaces_at_finish() {
        let mut pic = PostScriptPicture::new(Failing { budget: 1000 }, 1.0).unwrap();
        for _ in 0..100 {
            pic.line(0.1, 0.1, 0.2, 0.2);
        }
        assert!(matches!(pic.finish(), Err(FlowError::Io(_))));
    }

    #[test]
    fn create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.ps");
        let mut pic = PostScriptPicture::create(&path, 1.0).unwrap();
        pic.line(0.0, 0.0, 1.0, 1.0);
        pic.finish().unwrap();
        let s = std::fs::read_to_string(&path).unwrap();
        assert!(s.contains(" ln\n"));
    }
}

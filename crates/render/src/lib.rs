#![deny(unsafe_code)]
//! Output sinks for flowline.
//!
//! Turns scalar images into PGM and PNG files and streamlines into
//! pictures: [`PostScriptPicture`] writes vector PostScript through the
//! core's `LineDrawable` trait and [`RasterPicture`] draws into an
//! in-memory gray buffer that can be saved like any other image.
//!
//! PNG output is feature-gated behind `png` (default on) so the core and
//! the PostScript path build without the `image` crate.

pub mod pgm;
pub mod postscript;
pub mod raster;

#[cfg(feature = "png")]
pub mod snapshot;

pub use pgm::{encode_pgm, write_pgm};
pub use postscript::PostScriptPicture;
pub use raster::RasterPicture;

#[cfg(feature = "png")]
pub use snapshot::write_png;

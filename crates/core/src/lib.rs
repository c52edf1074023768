#![deny(unsafe_code)]
//! Core of the flowline streamline placer.
//!
//! Places streamlines of a 2D vector field so that, blurred by a lowpass
//! filter, they look like an evenly lit gray page. Provides `VectorField`,
//! `Streamline`/`Bundle`, the `LowpassField` quality measure, the
//! `SpatialHashTable` used for repulsion and joins, the `Dissolve` LFSR
//! traversal, the `Optimizer` with its schedules, `ScalarImage` registers,
//! synthetic `FieldSource`s, and drawing through `LineDrawable`.

pub mod bundle;
pub mod clip;
pub mod config;
pub mod dashes;
pub mod dissolve;
pub mod error;
pub mod estimate;
pub mod field;
pub mod field_source;
mod fileio;
pub mod image;
pub mod lowpass;
pub mod optimizer;
pub mod params;
pub mod picture;
pub mod prng;
pub mod spatial;
pub mod streamline;

pub use bundle::Bundle;
pub use config::{ChangeOdds, LengthOdds, OptimizerConfig, VisualizationParameters};
pub use dashes::DashStyle;
pub use dissolve::Dissolve;
pub use error::FlowError;
pub use estimate::{Change, Resize};
pub use field::{Integrator, VectorField};
pub use field_source::{FieldKind, FieldSource};
pub use image::ScalarImage;
pub use lowpass::LowpassField;
pub use optimizer::{CancelToken, Optimizer, OptimizerStats};
pub use picture::LineDrawable;
pub use prng::Xorshift64;
pub use spatial::SpatialHashTable;
pub use streamline::{ArrowStyle, End, Streamline, StreamlineStyle};

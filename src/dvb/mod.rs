//! DVB Subtitles (ETSI EN 300 743) decode pipeline.
//!
//! Segments arrive framed inside PES payloads (see [`crate::pes`]) and are
//! applied to a per-epoch [`database::Database`] by [`parser::DvbSubtitleDecoder`].

pub mod arena;
pub mod database;
pub mod parser;
pub mod pixel;
pub mod segments;

pub use database::{Clut, Database, Display, Page, PageLifecycle, Pixmap, Rectangle, Region};
pub use parser::DvbSubtitleDecoder;

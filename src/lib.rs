//! Decoders for the two subtitle formats carried in MPEG-2 Packetised Elementary
//! Streams (PES): DVB Subtitles (ETSI EN 300 743) and World System Teletext
//! (ETSI EN 300 706).
//!
//! # Usage
//! Simply add this crate as a dependency in your `Cargo.toml`.
//!
//! ```toml
//! [dependencies]
//! subtitle-decoder = "~0.1.0"
//! ```
//!
//! Both pipelines are driven the same way: push PES payloads in as they arrive with
//! `add_pes_packet`, then call `process` with the current system time clock (STC) to
//! let the timing gate release anything due for display. Neither pipeline performs
//! I/O or spawns threads; the host is expected to call `process` from its own event
//! loop and supply a [`timing::StcTime`] snapshot each time.

#![deny(missing_docs, unsafe_code, warnings)]

use std::result;

pub mod reader;

mod pes;
pub use pes::{parse_pes_header, PesHeader, PesOptionalHeader, PesPayload};

pub mod timing;

pub mod dvb;
pub mod teletext;

pub mod output;

mod config;
pub use config::{CharsetOverrides, Config, NavigationMode, SpecVersion};

mod host;
pub use host::{GfxHost, StcSource};

/// Errors that may be encountered while parsing PES-carried subtitle data.
///
/// Both the DVB and Teletext pipelines share this single closed error surface:
/// unlike the host-extensible parser this crate was adapted from, subtitle decoding
/// never needs an application-defined error extension point, so `ErrorDetails` is a
/// plain enum rather than a generic one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetails {
    /// A [`reader::ByteReader`] or [`reader::BitReader`] ran out of data for the
    /// requested width. The [`usize`] is the width of the offending read, in bytes
    /// or bits respectively.
    ReaderExhausted(usize),
    /// A PES header or optional header failed to parse consistently (e.g. a short
    /// PTS/DTS field).
    BadPesHeader,
    /// A DVB subtitling segment field held a reserved enum value, an out-of-range
    /// value, or conflicted with a prior definition of the same id.
    InvalidSegmentField(&'static str),
    /// A DVB region's pixmap could not be allocated from the [`dvb::arena::PixmapArena`].
    ResourceExhausted,
    /// An X/27/0 editorial links packet failed its CRC check.
    CrcMismatch,
    /// A Teletext enhancement triplet or page-addressing field failed Hamming
    /// error correction beyond recovery.
    HammingUncorrectable,
}

/// Error type encapsulating all possible parser errors, tagged with the byte
/// offset within the unit being parsed that the error was encountered at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// Byte index within the segment/packet/unit that the error was encountered.
    pub location: usize,
    /// Information about the error.
    pub details: ErrorDetails,
}

/// [`std::result::Result`] alias that uses [`Error`].
pub type Result<T> = result::Result<T, Error>;

/// Converts a raw wire value to a `num_derive::FromPrimitive` enum, mapping a
/// miss to an [`ErrorDetails::InvalidSegmentField`] anchored at `location`.
pub(crate) fn from_primitive_field<T: num_traits::FromPrimitive>(
    val: u8,
    location: usize,
    field: &'static str,
) -> Result<T> {
    T::from_u8(val).ok_or(Error {
        location,
        details: ErrorDetails::InvalidSegmentField(field),
    })
}

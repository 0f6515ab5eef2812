//! Wire layouts for DVB subtitling segments (ETSI EN 300 743 §7).

use crate::reader::ByteReader;
use crate::{from_primitive_field, read_bitfield, Result};
use modular_bitfield_msb::prelude::*;
use num_derive::FromPrimitive;

/// Sync byte every subtitling segment begins with.
pub const SEGMENT_SYNC_BYTE: u8 = 0x0F;

/// Marks the end of a PES payload's segment list.
pub const END_OF_PES_MARKER: u8 = 0xFF;

/// Page Composition Segment.
pub const SEGMENT_TYPE_PCS: u8 = 0x10;
/// Region Composition Segment.
pub const SEGMENT_TYPE_RCS: u8 = 0x11;
/// CLUT Definition Segment.
pub const SEGMENT_TYPE_CDS: u8 = 0x12;
/// Object Data Segment.
pub const SEGMENT_TYPE_ODS: u8 = 0x13;
/// Display Definition Segment.
pub const SEGMENT_TYPE_DDS: u8 = 0x14;
/// Disparity Signalling Segment (3D; parsed only to skip past it).
pub const SEGMENT_TYPE_DSS: u8 = 0x15;
/// End of Display Set Segment.
pub const SEGMENT_TYPE_EDS: u8 = 0x80;

/// Fixed 6-byte header preceding every subtitling segment's payload.
#[bitfield]
#[derive(Debug)]
pub struct SegmentHeader {
    /// Always [`SEGMENT_SYNC_BYTE`].
    pub sync: B8,
    /// One of the `SEGMENT_TYPE_*` constants.
    pub segment_type: B8,
    /// Subtitle page this segment belongs to.
    pub page_id: B16,
    /// Length of the segment payload following this header, in bytes.
    pub segment_length: B16,
}

/// Page state carried by a [`PcsHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum PageState {
    /// No region/CLUT/object changes relative to the previous display set.
    NormalCase,
    /// A full refresh suitable for a channel change or seek; treated identically
    /// to `ModeChange` (the acquisition-point-as-mode-change workaround).
    AcquisitionPoint,
    /// A region, CLUT, or object definition changed.
    ModeChange,
    /// Reserved by ETSI EN 300 743; rejected.
    Reserved,
}

/// Fixed 2-byte header of a Page Composition Segment, before its region entries.
#[bitfield]
#[derive(Debug)]
pub struct PcsHeader {
    /// Page timeout, in seconds.
    pub page_time_out: B8,
    /// Version of this page composition.
    pub page_version_number: B4,
    /// Raw page state, decoded via [`from_primitive_field`] into [`PageState`].
    pub page_state: B2,
    #[skip]
    reserved: B2,
}

/// One region entry within a [`PcsHeader`]'s region list.
#[bitfield]
#[derive(Debug)]
pub struct PcsRegion {
    /// Region identifier, unique within the page.
    pub region_id: B8,
    #[skip]
    reserved: B8,
    /// Region's horizontal position on the display, in pixels.
    pub region_horizontal_address: B16,
    /// Region's vertical position on the display, in pixels.
    pub region_vertical_address: B16,
}

/// Fixed 10-byte header of a Region Composition Segment, before its object entries.
#[bitfield]
#[derive(Debug)]
pub struct RcsHeader {
    /// Region identifier.
    pub region_id: B8,
    /// Version of this region composition.
    pub region_version_number: B4,
    /// Whether the region's pixmap is filled with `region_background_color` before
    /// objects are drawn.
    pub region_fill_flag: bool,
    #[skip]
    reserved: B3,
    /// Region width, in pixels.
    pub region_width: B16,
    /// Region height, in pixels.
    pub region_height: B16,
    /// Nominal bit depth the region composition was authored at.
    pub region_level_of_compatibility: B3,
    /// Bit depth pixel code strings are decoded at.
    pub region_depth: B3,
    #[skip]
    reserved2: B2,
    /// CLUT this region paints through.
    pub clut_id: B8,
    /// Background pixel index used when `region_fill_flag` is set.
    pub region_8bit_pixel_code: B8,
    #[skip]
    region_4bit_pixel_code: B4,
    #[skip]
    region_2bit_pixel_code: B2,
    #[skip]
    reserved3: B2,
}

/// One object entry within an [`RcsHeader`]'s object list. Basic objects (type
/// `0b00`/`0b01`) are 6 bytes; enhanced objects with a fallback provider/object
/// pair are 8 bytes, but this crate only renders the primary position.
#[bitfield]
#[derive(Debug)]
pub struct RcsObject {
    /// Object identifier, referencing an [`OdsHeader`] elsewhere in the same
    /// epoch.
    pub object_id: B16,
    /// Object type; `0b01`/`0b11` carry a fallback provider/object pair after this
    /// fixed part (not modelled, see module docs).
    pub object_type: B2,
    /// How the decoded object data applies non-modifying colour (object-level
    /// override of the region-level default).
    pub object_provider_flag: B2,
    /// Horizontal offset of the object's top-left corner within the region.
    pub object_horizontal_position: B12,
    #[skip]
    reserved: B4,
    /// Vertical offset of the object's top-left corner within the region.
    pub object_vertical_position: B12,
}

/// Fixed 2-byte header of a CLUT Definition Segment, before its entry list.
#[bitfield]
#[derive(Debug)]
pub struct CdsHeader {
    /// CLUT identifier.
    pub clut_id: B8,
    /// Version of this CLUT definition.
    pub clut_version_number: B4,
    #[skip]
    reserved: B4,
}

/// Bit depth flags and 8-bit index prefixing each CLUT entry's colour value.
#[bitfield]
#[derive(Debug)]
pub struct CdsEntryHeader {
    /// CLUT entry index being defined.
    pub clut_entry_id: B8,
    /// Entry is valid in the 2-bit CLUT view.
    pub entry_clut_2_bit: bool,
    /// Entry is valid in the 4-bit CLUT view.
    pub entry_clut_4_bit: bool,
    /// Entry is valid in the 8-bit CLUT view.
    pub entry_clut_8_bit: bool,
    #[skip]
    reserved: B4,
    /// Selects between `full_range` (Y/Cr/Cb/T, 4 bytes) and abbreviated (2 bytes)
    /// entry encodings.
    pub full_range_flag: bool,
}

/// A single YCbCr+T colour tuple, full-range encoding (4 bytes).
#[bitfield]
#[derive(Debug)]
pub struct CdsEntryFullRange {
    /// Luminance.
    pub y_value: B8,
    /// Red-difference chrominance.
    pub cr_value: B8,
    /// Blue-difference chrominance.
    pub cb_value: B8,
    /// Transparency (0 = transparent).
    pub t_value: B8,
}

/// A single YCbCr+T colour tuple, abbreviated 6-bit-component encoding (2 bytes).
#[bitfield]
#[derive(Debug)]
pub struct CdsEntryAbbreviated {
    /// Luminance, 6-bit precision.
    pub y_value: B6,
    /// Red-difference chrominance, 4-bit precision.
    pub cr_value: B4,
    /// Blue-difference chrominance, 4-bit precision.
    pub cb_value: B4,
    /// Transparency, 2-bit precision.
    pub t_value: B2,
}

/// Coding method carried by an [`OdsHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ObjectCodingMethod {
    /// Pixel run-length strings, decoded by [`super::pixel`].
    Pixels,
    /// Character-coded string (text subtitles); not produced by broadcast DVB
    /// subtitle streams encountered in practice and not decoded here.
    CharacterString,
}

/// Fixed 7-byte header of an Object Data Segment, before its top/bottom field
/// pixel data.
#[bitfield]
#[derive(Debug)]
pub struct OdsHeader {
    /// Object identifier.
    pub object_id: B16,
    /// Version of this object definition.
    pub object_version_number: B4,
    /// Raw coding method, decoded via [`from_primitive_field`] into
    /// [`ObjectCodingMethod`].
    pub object_coding_method: B2,
    /// Colour index `0` becomes a cursor-only no-op while decoding this object.
    pub non_modifying_color_flag: bool,
    #[skip]
    reserved: bool,
    /// Length, in bytes, of the top-field pixel data that follows.
    pub top_field_data_length: B16,
    /// Length, in bytes, of the bottom-field pixel data. Zero reuses the top
    /// field's data stream for the bottom field as well.
    pub bottom_field_data_length: B16,
}

/// Fixed 5-byte header of a Display Definition Segment.
#[bitfield]
#[derive(Debug)]
pub struct DdsHeader {
    /// Version of this display definition.
    pub dds_version_number: B4,
    /// Whether an explicit window rectangle follows this header.
    pub display_window_flag: bool,
    #[skip]
    reserved: B3,
    /// Display width in pixels, inclusive upper bound of the addressable area.
    pub display_width: B16,
    /// Display height in pixels.
    pub display_height: B16,
}

/// Optional 8-byte window rectangle following a [`DdsHeader`] whose
/// `display_window_flag` is set.
#[bitfield]
#[derive(Debug)]
pub struct DdsWindow {
    /// Window left edge, in pixels.
    pub display_window_horizontal_position_minimum: B16,
    /// Window right edge, in pixels.
    pub display_window_horizontal_position_maximum: B16,
    /// Window top edge, in pixels.
    pub display_window_vertical_position_minimum: B16,
    /// Window bottom edge, in pixels.
    pub display_window_vertical_position_maximum: B16,
}

/// Reads a [`SegmentHeader`] and carves out a sub-reader over exactly its payload.
pub fn read_segment<'a>(
    reader: &mut ByteReader<'a>,
) -> Result<(SegmentHeader, ByteReader<'a>)> {
    let header: SegmentHeader = read_bitfield!(reader, SegmentHeader);
    let payload = reader.new_sub_reader(header.segment_length() as usize)?;
    Ok((header, payload))
}

/// Converts a raw two-bit page-state field, failing on [`PageState::Reserved`].
pub fn decode_page_state(raw: u8, location: usize) -> Result<PageState> {
    let state: PageState = from_primitive_field(raw, location, "page_state")?;
    if state == PageState::Reserved {
        return Err(crate::Error {
            location,
            details: crate::ErrorDetails::InvalidSegmentField("page_state"),
        });
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_header_round_trips_fields() {
        let bytes = [0x0F, SEGMENT_TYPE_PCS, 0x00, 0x01, 0x00, 0x02, 0xAB, 0xCD];
        let mut reader = ByteReader::single(&bytes);
        let (header, mut payload) = read_segment(&mut reader).unwrap();
        assert_eq!(header.sync(), 0x0F);
        assert_eq!(header.segment_type(), SEGMENT_TYPE_PCS);
        assert_eq!(header.page_id(), 1);
        assert_eq!(header.segment_length(), 2);
        assert_eq!(payload.read_to_end(), vec![0xAB, 0xCD]);
        assert_eq!(reader.remaining_len(), 0);
    }

    #[test]
    fn page_state_rejects_reserved() {
        assert!(decode_page_state(3, 0).is_err());
        assert!(decode_page_state(2, 0).is_ok());
    }
}

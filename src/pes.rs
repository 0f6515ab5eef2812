use crate::reader::ByteReader;
use crate::{read_bitfield, ErrorDetails, Result};
use log::warn;
use modular_bitfield_msb::prelude::*;

/// Fixed 6-byte PES packet start header.
#[bitfield]
#[derive(Debug)]
pub struct PesHeader {
    /// Packet start code prefix, always `0x000001`.
    pub start_code: B24,
    /// Identifies the elementary stream kind (e.g. `0xBD` private stream 1, the
    /// carrier for both DVB subtitle and Teletext payloads).
    pub stream_id: B8,
    /// Total length of the PES packet following this field, in bytes.
    pub packet_length: B16,
}

/// Optional 3-byte PES header present for stream ids that carry timing/flags.
#[bitfield]
#[derive(Debug)]
pub struct PesOptionalHeader {
    pub marker_bits: B2,
    pub scrambling_control: B2,
    pub priority: bool,
    pub data_alignment_indicator: bool,
    pub copyright: bool,
    pub original: bool,
    pub has_pts: bool,
    pub has_dts: bool,
    pub escr: bool,
    pub es_rate: bool,
    pub dsm_trick_mode: bool,
    pub has_additional_copy_info: bool,
    pub has_crc: bool,
    pub has_extension: bool,
    /// Length, in bytes, of the remaining optional fields following this header.
    pub additional_header_length: B8,
}

/// A parsed PES header plus the subtitle elementary stream payload it wraps.
#[derive(Debug)]
pub struct PesPayload<'a> {
    /// Fixed packet start header.
    pub header: PesHeader,
    /// Optional header, present whenever the stream id carries one.
    pub optional_header: Option<PesOptionalHeader>,
    /// Presentation timestamp, converted from the wire's 33-bit 90kHz encoding down
    /// to this crate's 32-bit 45kHz tick domain. `None` if the optional header was
    /// absent or did not set `has_pts`.
    pub pts: Option<u32>,
    /// Remaining bytes of the PES payload after the (optional) header.
    pub data: ByteReader<'a>,
}

/// 90kHz, 33-bit PTS/DTS field spread across five PES header bytes.
fn parse_timestamp(b: [u8; 5]) -> u64 {
    let mut ts: u64 = ((b[0] & 0x0E) as u64) << 29;
    ts |= (b[1] as u64) << 22;
    ts |= ((b[2] & 0xFE) as u64) << 14;
    ts |= (b[3] as u64) << 7;
    ts |= ((b[4] & 0xFE) as u64) >> 1;
    ts
}

/// Parses a PES header and returns the remainder of the packet as a payload
/// reader, with the PTS (if any) converted to this crate's 45kHz tick domain.
pub fn parse_pes_header<'a>(reader: &mut ByteReader<'a>) -> Result<PesPayload<'a>> {
    let header: PesHeader = read_bitfield!(reader, PesHeader);
    let pes_length = header.packet_length() as usize;

    let mut pts = None;
    let mut optional_length = 0;
    let optional_header = if pes_length >= 3 && header.stream_id() != 0xBF {
        let optional_header: PesOptionalHeader = read_bitfield!(reader, PesOptionalHeader);
        let additional_length = optional_header.additional_header_length() as usize;
        optional_length = 3 + additional_length;
        let mut sub_reader = reader.new_sub_reader(additional_length)?;

        if optional_header.has_pts() {
            if sub_reader.remaining_len() < 5 {
                warn!("short read of PTS field in PES optional header");
                return Err(sub_reader.make_error(ErrorDetails::BadPesHeader));
            }
            let ts_90khz = parse_timestamp(sub_reader.read_array::<5>()?);
            pts = Some((ts_90khz >> 1) as u32);
        }

        // DTS and the remaining optional fields (ESCR, ES rate, trick mode, ...)
        // are not consumed by either subtitle pipeline.
        Some(optional_header)
    } else {
        None
    };

    let payload_length = pes_length.saturating_sub(3 + optional_length);
    let data = if payload_length > 0 && payload_length <= reader.remaining_len() {
        reader.new_sub_reader(payload_length)?
    } else {
        let remaining = reader.remaining_len();
        reader.new_sub_reader(remaining)?
    };

    Ok(PesPayload {
        header,
        optional_header,
        pts,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pes(stream_id: u8, pts_ticks_90khz: Option<u64>, payload: &[u8]) -> Vec<u8> {
        let mut optional = Vec::new();
        let mut flags = 0u8;
        if let Some(pts) = pts_ticks_90khz {
            flags |= 0x80;
            let b0 = 0x21 | (((pts >> 30) & 0x7) << 1) as u8;
            let b1 = ((pts >> 22) & 0xFF) as u8;
            let b2 = 0x01 | (((pts >> 15) & 0x7F) << 1) as u8;
            let b3 = ((pts >> 7) & 0xFF) as u8;
            let b4 = 0x01 | ((pts & 0x7F) << 1) as u8;
            optional.extend_from_slice(&[b0, b1, b2, b3, b4]);
        }
        let mut out = Vec::new();
        out.extend_from_slice(&[0x00, 0x00, 0x01, stream_id]);
        let packet_length = 3 + optional.len() + payload.len();
        out.extend_from_slice(&(packet_length as u16).to_be_bytes());
        out.push(0b1000_0000); // marker bits
        out.push(flags);
        out.push(optional.len() as u8);
        out.extend_from_slice(&optional);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_header_without_pts() {
        let data = build_pes(0xBD, None, &[1, 2, 3]);
        let mut reader = ByteReader::single(&data);
        let pes = parse_pes_header(&mut reader).unwrap();
        assert_eq!(pes.pts, None);
        assert_eq!(pes.header.stream_id(), 0xBD);
        let mut payload = pes.data;
        assert_eq!(payload.read_to_end(), vec![1, 2, 3]);
    }

    #[test]
    fn parses_pts_and_converts_to_45khz() {
        let data = build_pes(0xBD, Some(900_000), &[0xAA]);
        let mut reader = ByteReader::single(&data);
        let pes = parse_pes_header(&mut reader).unwrap();
        assert_eq!(pes.pts, Some(450_000));
        let mut payload = pes.data;
        assert_eq!(payload.read_to_end(), vec![0xAA]);
    }

    #[test]
    fn short_pts_field_is_an_error() {
        let mut data = build_pes(0xBD, Some(900_000), &[]);
        data.truncate(data.len() - 2);
        let new_len = (data.len() - 6) as u16;
        data[4..6].copy_from_slice(&new_len.to_be_bytes());
        let mut reader = ByteReader::single(&data);
        assert!(parse_pes_header(&mut reader).is_err());
    }
}

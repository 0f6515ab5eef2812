//! Reassembles Teletext packets from 44-byte PES data units and applies
//! Hamming/odd-parity error correction (ETSI EN 300 706 §7/§8).

use crate::teletext::hamming::{decode_24_18, decode_8_4};
use crate::Result;

/// Size of one Teletext data unit inside a PES payload: 2 framing bytes
/// (line/field identification, not decoded here) followed by the 42-byte
/// Teletext packet.
pub const DATA_UNIT_SIZE: usize = 44;
const PACKET_SIZE: usize = 42;

/// Packet address `0`: page header.
pub const ADDRESS_HEADER: u8 = 0;
/// Packet addresses `1..=25`: Level-One-Page display rows.
pub const ADDRESS_LOP_MIN: u8 = 1;
/// See [`ADDRESS_LOP_MIN`].
pub const ADDRESS_LOP_MAX: u8 = 25;
/// Packet address `26`: enhancement triplets (X/26).
pub const ADDRESS_ENHANCEMENT: u8 = 26;
/// Packet address `27`: editorial links (X/27).
pub const ADDRESS_EDITORIAL_LINKS: u8 = 27;
/// Packet address `28`: per-page format triplets (X/28).
pub const ADDRESS_FORMAT: u8 = 28;
/// Packet address `29`: per-magazine format triplets (M/29).
pub const ADDRESS_MAGAZINE_FORMAT: u8 = 29;
/// Packet address `30`: broadcast service data (M/8/30).
pub const ADDRESS_SERVICE_DATA: u8 = 30;

/// Reverses the bit order of a byte.
///
/// Teletext packets are transmitted least-significant-bit first; the host
/// demultiplexer hands this crate bytes still in wire order, so every byte
/// must have its bits reversed before Hamming/parity decoding can treat bit 7
/// as most significant.
fn reverse_bits(b: u8) -> u8 {
    let mut v = b;
    v = (v & 0xF0) >> 4 | (v & 0x0F) << 4;
    v = (v & 0xCC) >> 2 | (v & 0x33) << 2;
    v = (v & 0xAA) >> 1 | (v & 0x55) << 1;
    v
}

/// Decodes one odd-parity display byte: bit 7 is the parity bit, bits 0..6
/// are a 7-bit character code. Returns the 7-bit code and whether parity
/// checked out.
pub fn decode_odd_parity(byte: u8) -> (u8, bool) {
    let code = byte & 0x7F;
    let ones = byte.count_ones();
    (code, ones % 2 == 1)
}

/// Magazine/packet-address pair decoded from the first two packet bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketAddress {
    /// Magazine number, `1..=8` (magazine `0` on the wire means `8`).
    pub magazine: u8,
    /// Packet address within the magazine, `0..=31`.
    pub address: u8,
}

/// Decodes the two-byte Hamming-8/4 magazine-and-row-address (MRAG) prefix.
pub fn decode_packet_address(bytes: [u8; 2], location: usize) -> Result<PacketAddress> {
    let n1 = decode_8_4(bytes[0], location)?;
    let n2 = decode_8_4(bytes[1], location + 1)?;
    let magazine_raw = n1 & 0x07;
    let magazine = if magazine_raw == 0 { 8 } else { magazine_raw };
    let address = ((n1 >> 3) & 0x01) | ((n2 & 0x0F) << 1);
    Ok(PacketAddress { magazine, address })
}

/// One Header packet's decoded control bits (ETSI EN 300 706 §9.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlInfo {
    /// `C4`: page is erased before this header's body is applied; a clear bit
    /// means the page is volatile and must be re-parsed on every header.
    pub erase_page: bool,
    /// `C12..C14`: national option subset selector.
    pub national_option: u8,
}

/// One fully decoded Teletext packet.
#[derive(Debug, Clone)]
pub enum Packet {
    /// `X/0`: page header plus 32 display bytes (parity-corrected).
    Header {
        /// Source address.
        address: PacketAddress,
        /// BCD page number (low byte of the page id).
        page: u8,
        /// BCD subpage plus control bits, exactly as carried on the wire
        /// (bits 0..12 subpage, bits 13..15 reserved/C10-C11 flags folded in
        /// by the caller).
        subpage_raw: u16,
        /// Decoded control bits.
        control: ControlInfo,
        /// Parity-corrected display bytes (columns 9..40 of the header row).
        display: [u8; 32],
    },
    /// `X/1..X/25`: one display row's 40 parity-corrected bytes.
    LopData {
        /// Source address; `address.address` gives the row number.
        address: PacketAddress,
        /// Parity-corrected display bytes.
        display: [u8; 40],
    },
    /// `X/26`, `X/28`, `M/29`: 13 Hamming-24/18-decoded 18-bit triplets, plus
    /// a Hamming-8/4-decoded designation code identifying which sub-variant
    /// of the packet this is.
    Triplets {
        /// Source address.
        address: PacketAddress,
        /// Designation code (low nibble of packet byte 1).
        designation: u8,
        /// The 13 decoded 18-bit values, in wire order.
        triplets: [u32; 13],
    },
    /// `X/27/0`: six page-id links plus link control and CRC, left as raw
    /// corrected bytes for [`crate::teletext::metadata`] to interpret.
    EditorialLinks {
        /// Source address.
        address: PacketAddress,
        /// Designation code.
        designation: u8,
        /// Remaining 39 packet bytes, uncorrected (CRC covers raw bytes).
        raw: [u8; 39],
    },
    /// `M/8/30`: broadcast service data. Only the designation code and
    /// initial-page BCD digits are decoded; network/program identification
    /// text is not modelled.
    ServiceData {
        /// Source address.
        address: PacketAddress,
        /// Designation code (0/1 = format 1 multiplexed/non-multiplexed,
        /// 2/3 = format 2, carried by the low nibble of packet byte 1).
        designation: u8,
        /// Hamming-8/4-decoded initial-page BCD digits: magazine, tens,
        /// units (the fourth nibble is the subcode low digit, unused here).
        initial_page_digits: [u8; 3],
    },
}

fn decode_display_bytes<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut out = [0x20u8; N];
    for (i, &b) in raw.iter().take(N).enumerate() {
        let (code, ok) = decode_odd_parity(b);
        out[i] = if ok { code } else { 0x20 };
    }
    out
}

/// Decodes one 44-byte data unit into a [`Packet`], or `None` if the
/// magazine/address prefix itself is Hamming-uncorrectable (the unit is
/// silently skipped per the collector's error policy).
pub fn decode_unit(unit: &[u8; DATA_UNIT_SIZE]) -> Option<Packet> {
    let mut packet = [0u8; PACKET_SIZE];
    for (i, &b) in unit[2..2 + PACKET_SIZE].iter().enumerate() {
        packet[i] = reverse_bits(b);
    }
    let address = decode_packet_address([packet[0], packet[1]], 0).ok()?;
    let body = &packet[2..];

    if address.address == ADDRESS_HEADER {
        let units = decode_8_4(body[0], 2).ok()?;
        let tens = decode_8_4(body[1], 3).ok()?;
        let page = (tens << 4) | units;
        let s1 = decode_8_4(body[2], 4).ok()?;
        let s2 = decode_8_4(body[3], 5).ok()?;
        let s3 = decode_8_4(body[4], 6).ok()?;
        let s4 = decode_8_4(body[5], 7).ok()?;
        let subpage_raw =
            (s1 as u16) | ((s2 as u16) << 4) | ((s3 as u16) << 8) | ((s4 as u16) << 12);
        let control = ControlInfo {
            erase_page: s2 & 0x08 != 0,
            national_option: ((s4 >> 1) & 0x07) as u8,
        };
        let display = decode_display_bytes::<32>(&body[6..]);
        return Some(Packet::Header {
            address,
            page,
            subpage_raw,
            control,
            display,
        });
    }

    if (ADDRESS_LOP_MIN..=ADDRESS_LOP_MAX).contains(&address.address) {
        let display = decode_display_bytes::<40>(body);
        return Some(Packet::LopData { address, display });
    }

    if address.address == ADDRESS_EDITORIAL_LINKS {
        let designation = decode_8_4(body[0], 2).ok()?;
        let mut raw = [0u8; 39];
        raw.copy_from_slice(&body[1..40]);
        return Some(Packet::EditorialLinks {
            address,
            designation,
            raw,
        });
    }

    if address.address == ADDRESS_SERVICE_DATA {
        let designation = decode_8_4(body[0], 2).ok()?;
        let magazine = decode_8_4(body[1], 3).ok()?;
        let tens = decode_8_4(body[2], 4).ok()?;
        let units = decode_8_4(body[3], 5).ok()?;
        return Some(Packet::ServiceData {
            address,
            designation,
            initial_page_digits: [magazine, tens, units],
        });
    }

    if matches!(
        address.address,
        ADDRESS_ENHANCEMENT | ADDRESS_FORMAT | ADDRESS_MAGAZINE_FORMAT
    ) {
        let designation = decode_8_4(body[0], 2).ok()?;
        let mut triplets = [0u32; 13];
        for (i, triplet) in triplets.iter_mut().enumerate() {
            let offset = 1 + i * 3;
            let bytes = [body[offset], body[offset + 1], body[offset + 2]];
            *triplet = decode_24_18(bytes, offset as usize + 2).unwrap_or(0x7FF);
        }
        return Some(Packet::Triplets {
            address,
            designation,
            triplets,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teletext::hamming::encode_8_4;

    fn build_unit(address_byte1: u8, address_byte2: u8, body: &[u8]) -> [u8; DATA_UNIT_SIZE] {
        let mut unit = [0u8; DATA_UNIT_SIZE];
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = address_byte1;
        packet[1] = address_byte2;
        packet[2..2 + body.len()].copy_from_slice(body);
        for (i, &b) in packet.iter().enumerate() {
            unit[2 + i] = reverse_bits(b);
        }
        unit
    }

    #[test]
    fn reverse_bits_is_involution() {
        for b in 0..=255u8 {
            assert_eq!(reverse_bits(reverse_bits(b)), b);
        }
    }

    #[test]
    fn decodes_lop_row() {
        let n1 = encode_8_4(0b0001); // magazine 1, address bit0 = 0
        let n2 = encode_8_4(0b0000); // address bits1..4 = 0 -> row 1
        let mut body = [0u8; PACKET_SIZE - 2];
        body[0] = 0xC1; // 'A' (0x41) with odd parity bit set
        let unit = build_unit(n1, n2, &body);
        match decode_unit(&unit) {
            Some(Packet::LopData { address, display }) => {
                assert_eq!(address.magazine, 1);
                assert_eq!(address.address, 1);
                assert_eq!(display[0], 0x41);
            }
            other => panic!("expected LopData, got {:?}", other),
        }
    }

    #[test]
    fn magazine_zero_decodes_as_eight() {
        let n1 = encode_8_4(0b0000);
        let n2 = encode_8_4(0b0000);
        let body = [0u8; PACKET_SIZE - 2];
        let unit = build_unit(n1, n2, &body);
        match decode_unit(&unit) {
            Some(Packet::Header { address, .. }) => assert_eq!(address.magazine, 8),
            other => panic!("expected Header, got {:?}", other),
        }
    }

    #[test]
    fn odd_parity_rejects_bad_byte() {
        assert_eq!(decode_odd_parity(0x41).1, false);
        assert_eq!(decode_odd_parity(0xC1).1, true);
    }

    #[test]
    fn decodes_service_data_initial_page() {
        let n1 = encode_8_4(0b0000); // magazine 8, address 15 -> ADDRESS_SERVICE_DATA
        let n2 = encode_8_4(0b1111);
        let mut body = [0u8; PACKET_SIZE - 2];
        body[0] = encode_8_4(0); // designation 0
        body[1] = encode_8_4(2); // magazine 2
        body[2] = encode_8_4(4); // tens digit
        body[3] = encode_8_4(1); // units digit
        let unit = build_unit(n1, n2, &body);
        match decode_unit(&unit) {
            Some(Packet::ServiceData {
                designation,
                initial_page_digits,
                ..
            }) => {
                assert_eq!(designation, 0);
                assert_eq!(initial_page_digits, [2, 4, 1]);
            }
            other => panic!("expected ServiceData, got {:?}", other),
        }
    }
}

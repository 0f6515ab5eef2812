//! Top-level Teletext decode pipeline: PES payloads in, ready-to-render
//! [`DecodedPage`]s out.
//!
//! Mirrors [`crate::dvb::DvbSubtitleDecoder`]'s shape: a pending-payload
//! queue drained through the [`TimingGate`] on every [`TeletextEngine::process`]
//! call. Packets are reassembled per magazine into an in-progress
//! [`DecodedPage`]; a magazine's page is considered complete (and handed to
//! the [`PageCache`]) the moment its next `Header` packet arrives.

use std::collections::{HashMap, VecDeque};

use crate::teletext::cache::PageCache;
use crate::teletext::charset;
use crate::teletext::collector::{self, ControlInfo, Packet};
use crate::teletext::metadata::MetadataProcessor;
use crate::teletext::page::{
    self, Cell, CellProperties, DecodedPage, NavigationLinks, PageId, ANY_SUBPAGE, PAGE_COLUMNS,
};
use crate::teletext::parser;
use crate::teletext::x26;
use crate::timing::{GateResult, StcTime, TimingGate};
use crate::{Config, NavigationMode};

/// Magazine-page carrying the BTT (TOP base table): magazine 1, page `F0`.
const BTT_MAGAZINE_PAGE: u16 = 0x1F0;

struct PendingPayload {
    pts: Option<u32>,
    data: Vec<u8>,
}

/// One magazine's in-progress page, accumulated row by row between its
/// opening `Header` and the next one.
struct Build {
    page: Box<DecodedPage>,
    national_option: u8,
    pending_hidden: [bool; PAGE_COLUMNS],
}

/// Drives the Teletext pipeline: packet reassembly, page caching, row
/// parsing, and navigation metadata, gated by PTS/STC comparison.
pub struct TeletextEngine {
    config: Config,
    cache: PageCache,
    metadata: MetadataProcessor,
    pending: VecDeque<PendingPayload>,
    gate: TimingGate,
    selected_page: PageId,
    building: HashMap<u8, Build>,
    stale_magazine_page: Option<u16>,
    page_ready: bool,
    header_ready: bool,
}

impl TeletextEngine {
    /// Builds an engine with an empty cache and no selected page.
    pub fn new(config: Config) -> Self {
        TeletextEngine {
            config,
            cache: PageCache::new(),
            metadata: MetadataProcessor::new(),
            pending: VecDeque::new(),
            gate: TimingGate::new(),
            selected_page: PageId::default(),
            building: HashMap::new(),
            stale_magazine_page: None,
            page_ready: false,
            header_ready: false,
        }
    }

    /// Queues a PES payload (a run of 44-byte Teletext data units) for later
    /// processing.
    pub fn add_pes_packet(&mut self, pts: Option<u32>, data: &[u8]) {
        self.pending.push_back(PendingPayload {
            pts,
            data: data.to_vec(),
        });
    }

    /// Selects a new page to display: drops the current page pointer, hints
    /// the cache of the new anchor, and attempts immediate restoration from
    /// cache (becoming the new stale fallback if found).
    pub fn select_page(&mut self, page: PageId) {
        self.selected_page = page;
        self.cache.set_current_page(page);
        self.stale_magazine_page = self
            .cache
            .get_page(page.magazine_page)
            .map(|p| p.page_id.magazine_page)
            .or(self.stale_magazine_page);
    }

    /// Pins pages (e.g. FLOF/TOP link targets) against cache eviction.
    pub fn set_linked_pages(&mut self, ids: &[PageId]) {
        self.cache.set_linked_pages(ids);
    }

    /// True if a page matching the current selection completed during the
    /// most recent [`Self::process`] call.
    pub fn page_ready(&self) -> bool {
        self.page_ready
    }

    /// True if a header packet was received for any magazine during the most
    /// recent [`Self::process`] call.
    pub fn header_ready(&self) -> bool {
        self.header_ready
    }

    /// The exact-match decoded page for the current selection, if cached.
    pub fn current_page(&self) -> Option<&DecodedPage> {
        self.cache.current_page()
    }

    /// The current page if cached, falling back to the last page this
    /// magazine successfully decoded while the desired page was unavailable.
    pub fn displayed_page(&self) -> Option<&DecodedPage> {
        self.cache
            .current_page()
            .or_else(|| self.stale_magazine_page.and_then(|mp| self.cache.get_page(mp)))
    }

    /// The channel's initial page, once an `M/8/30` packet has been seen.
    pub fn initial_page(&self) -> Option<PageId> {
        self.metadata.initial_page()
    }

    /// Admits as many queued payloads as the timing gate allows against
    /// `stc`. Returns the number of PES payloads applied.
    pub fn process(&mut self, stc: StcTime) -> usize {
        self.page_ready = false;
        self.header_ready = false;

        let mut applied = 0;
        while let Some(front) = self.pending.front() {
            let gate_pts = if self.config.ignore_pts { None } else { front.pts };
            match self.gate.evaluate(gate_pts, stc) {
                GateResult::Hold => break,
                GateResult::Drop => {
                    self.pending.pop_front();
                }
                GateResult::Process => {
                    let payload = self.pending.pop_front().unwrap();
                    self.apply_payload(&payload.data);
                    applied += 1;
                }
            }
        }
        applied
    }

    fn apply_payload(&mut self, data: &[u8]) {
        let mut offset = 0;
        while offset + collector::DATA_UNIT_SIZE <= data.len() {
            let mut unit = [0u8; collector::DATA_UNIT_SIZE];
            unit.copy_from_slice(&data[offset..offset + collector::DATA_UNIT_SIZE]);
            offset += collector::DATA_UNIT_SIZE;
            if let Some(packet) = collector::decode_unit(&unit) {
                self.apply_packet(packet);
            }
        }
    }

    fn apply_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Header {
                address,
                page,
                subpage_raw,
                control,
                display,
            } => self.apply_header(address.magazine, page, subpage_raw, control, display),
            Packet::LopData { address, display } => {
                self.apply_lop(address.magazine, address.address, display)
            }
            Packet::Triplets {
                address,
                designation,
                triplets,
            } => self.apply_triplets(address.magazine, address.address, designation, triplets),
            Packet::EditorialLinks { address, raw, .. } => {
                self.apply_editorial_links(address.magazine, &raw)
            }
            Packet::ServiceData {
                initial_page_digits,
                ..
            } => self.apply_service_data(initial_page_digits),
        }
    }

    fn apply_header(
        &mut self,
        magazine: u8,
        page: u8,
        subpage_raw: u16,
        control: ControlInfo,
        display: [u8; 32],
    ) {
        self.finalize_building(magazine);

        let magazine_page = ((magazine as u16) << 8) | page as u16;
        let page_id = PageId::new(magazine_page, subpage_raw);

        let mut built = DecodedPage::new(page_id);
        built.erase_page = control.erase_page;
        for (i, &byte) in display.iter().enumerate() {
            let col = 8 + i;
            if col < PAGE_COLUMNS {
                built.rows[0][col] = Cell {
                    character: charset::map_g0(byte, control.national_option, &self.config.charset_overrides),
                    ..Cell::default()
                };
            }
        }

        self.building.insert(
            magazine,
            Build {
                page: Box::new(built),
                national_option: control.national_option,
                pending_hidden: [false; PAGE_COLUMNS],
            },
        );
        self.header_ready = true;
    }

    fn apply_lop(&mut self, magazine: u8, row: u8, display: [u8; 40]) {
        let build = match self.building.get_mut(&magazine) {
            Some(b) => b,
            None => return,
        };

        if build.page.page_id.magazine_page == BTT_MAGAZINE_PAGE {
            self.metadata.add_btt_row(row as usize, display);
            return;
        }

        let row = row as usize;
        if row == 0 || row >= page::PAGE_ROWS {
            return;
        }

        let parsed = parser::parse_row(
            &display,
            build.national_option,
            &self.config.charset_overrides,
            false,
        );
        for col in 0..PAGE_COLUMNS {
            let mut cell = parsed.cells[col];
            if build.pending_hidden[col] {
                cell.properties.insert(CellProperties::HIDDEN);
            }
            build.page.rows[row][col] = cell;
        }
        build.pending_hidden = parsed.double_height_mask;
    }

    fn apply_triplets(&mut self, magazine: u8, address: u8, designation: u8, triplets: [u32; 13]) {
        let build = match self.building.get_mut(&magazine) {
            Some(b) => b,
            None => return,
        };
        match address {
            collector::ADDRESS_ENHANCEMENT => x26::apply_triplets(&mut build.page, &triplets),
            collector::ADDRESS_FORMAT | collector::ADDRESS_MAGAZINE_FORMAT if designation == 0 => {
                let first = x26::decode_triplet(triplets[0]);
                build.national_option = first.data & 0x07;
            }
            _ => {}
        }
    }

    fn apply_editorial_links(&mut self, magazine: u8, raw: &[u8; 39]) {
        let decimal = match self.building.get(&magazine) {
            Some(build) => {
                let d = build.page.page_id.decimal_magazine_page();
                if d == page::INVALID_MAGAZINE_PAGE {
                    return;
                }
                d
            }
            None => return,
        };
        let mut color_keys = [PageId::default(); 4];
        for (i, key) in color_keys.iter_mut().enumerate() {
            let offset = 1 + i * 2;
            if offset >= raw.len() {
                break;
            }
            let page_byte = raw[offset];
            let tens = (page_byte >> 4) & 0x0F;
            let units = page_byte & 0x0F;
            let magazine_page = ((magazine as u16) << 8) | ((tens as u16) << 4) | units as u16;
            *key = PageId::new(magazine_page, ANY_SUBPAGE);
        }
        self.metadata.add_editorial_links(
            decimal,
            [
                color_keys[0].magazine_page,
                color_keys[1].magazine_page,
                color_keys[2].magazine_page,
                color_keys[3].magazine_page,
            ],
        );
    }

    fn apply_service_data(&mut self, digits: [u8; 3]) {
        let [magazine_raw, tens, units] = digits;
        let magazine = if magazine_raw == 0 { 8 } else { magazine_raw & 0x0F };
        let magazine_page = ((magazine as u16) << 8) | ((tens as u16) << 4) | units as u16;
        self.metadata
            .set_initial_page(PageId::new(magazine_page, ANY_SUBPAGE));
    }

    /// Resolves navigation colour-key links for a decimal page, per the
    /// configured [`NavigationMode`] precedence.
    fn build_navigation(&self, decimal: Option<u16>) -> NavigationLinks {
        let mut links = NavigationLinks::default();
        let decimal = match decimal {
            Some(d) => d,
            None => return links,
        };
        let top = self.metadata.top_links(decimal);
        let flof = self.metadata.editorial_links(decimal);

        let from_top = |t: crate::teletext::metadata::TopLinks| {
            [
                page::page_id_from_decimal(t.prev_page).unwrap_or_default(),
                page::page_id_from_decimal(t.next_page).unwrap_or_default(),
                page::page_id_from_decimal(t.next_group).unwrap_or_default(),
                page::page_id_from_decimal(t.next_block).unwrap_or_default(),
            ]
        };

        links.color_keys = match self.config.navigation_mode {
            NavigationMode::Default => return links,
            NavigationMode::TopDefault => top.map(from_top).unwrap_or_default(),
            NavigationMode::FlofDefault => flof.map(|f| f.color_keys).unwrap_or_default(),
            NavigationMode::TopFlofDefault => top
                .map(from_top)
                .or_else(|| flof.map(|f| f.color_keys))
                .unwrap_or_default(),
            NavigationMode::FlofTopDefault => flof
                .map(|f| f.color_keys)
                .or_else(|| top.map(from_top))
                .unwrap_or_default(),
        };
        links
    }

    fn finalize_building(&mut self, magazine: u8) {
        let build = match self.building.remove(&magazine) {
            Some(b) => b,
            None => return,
        };
        let page_id = build.page.page_id;
        if page_id.magazine_page == BTT_MAGAZINE_PAGE {
            return;
        }

        let decimal = page_id.decimal_magazine_page();
        let decimal = if decimal == page::INVALID_MAGAZINE_PAGE {
            None
        } else {
            Some(decimal)
        };

        let mut page = build.page;
        page.navigation = self.build_navigation(decimal);

        let matches_selected = page_id.magazine_page == self.selected_page.magazine_page;
        self.cache.insert_page(*page);
        // Always re-notify on a matching header, even if the cache already held an
        // identical instance: volatile pages must be re-parsed on every header.
        if matches_selected {
            self.stale_magazine_page = Some(page_id.magazine_page);
            self.page_ready = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teletext::collector::ADDRESS_LOP_MIN;
    use crate::teletext::hamming::encode_8_4;

    fn mrag_bytes(magazine: u8, address: u8) -> (u8, u8) {
        let magazine_raw = if magazine == 8 { 0 } else { magazine };
        let n1 = magazine_raw | ((address & 0x01) << 3);
        let n2 = address >> 1;
        (encode_8_4(n1), encode_8_4(n2))
    }

    fn build_unit(magazine: u8, address: u8, body: &[u8]) -> [u8; collector::DATA_UNIT_SIZE] {
        let (n1, n2) = mrag_bytes(magazine, address);
        let mut packet = [0x15u8; 42]; // 0x15 odd-parity-encodes to a space-ish byte
        packet[0] = n1;
        packet[1] = n2;
        packet[2..2 + body.len()].copy_from_slice(body);
        let mut unit = [0u8; collector::DATA_UNIT_SIZE];
        for (i, &b) in packet.iter().enumerate() {
            unit[2 + i] = reverse_bits_for_test(b);
        }
        unit
    }

    fn reverse_bits_for_test(b: u8) -> u8 {
        let mut v = b;
        v = (v & 0xF0) >> 4 | (v & 0x0F) << 4;
        v = (v & 0xCC) >> 2 | (v & 0x33) << 2;
        v = (v & 0xAA) >> 1 | (v & 0x55) << 1;
        v
    }

    fn odd_parity_byte(code: u8) -> u8 {
        if code.count_ones() % 2 == 1 {
            code
        } else {
            code | 0x80
        }
    }

    #[test]
    fn header_then_row_completes_selected_page() {
        let mut engine = TeletextEngine::new(Config::default());
        let target = PageId::new(0x100, ANY_SUBPAGE);
        engine.select_page(target);

        let mut header_body = [0u8; 40];
        header_body[0] = encode_8_4(0); // page units/tens left default (page byte comes from MRAG? no: header page is a separate decoded nibble)
        let unit = build_unit(1, 0, &header_body);
        engine.add_pes_packet(None, &unit);
        engine.process(StcTime::Invalid);
        assert!(engine.header_ready());

        let mut row_body = [odd_parity_byte(b' ' & 0x7F); 40];
        row_body[0] = odd_parity_byte(b'A' & 0x7F);
        let row_unit = build_unit(1, ADDRESS_LOP_MIN, &row_body);
        engine.add_pes_packet(None, &row_unit);
        engine.process(StcTime::Invalid);

        // Next header for the same magazine finalizes the page.
        let next_header = build_unit(1, 0, &header_body);
        engine.add_pes_packet(None, &next_header);
        engine.process(StcTime::Invalid);

        assert!(engine.page_ready());
        let page = engine.current_page().expect("page cached");
        assert_eq!(page.rows[1][0].character, 'A');
    }

    #[test]
    fn select_page_restores_stale_fallback() {
        let mut engine = TeletextEngine::new(Config::default());
        let first = PageId::new(0x100, ANY_SUBPAGE);
        engine.select_page(first);

        let header_body = [0u8; 40];
        engine.add_pes_packet(None, &build_unit(1, 0, &header_body));
        engine.process(StcTime::Invalid);
        engine.add_pes_packet(None, &build_unit(1, 0, &header_body));
        engine.process(StcTime::Invalid);
        assert!(engine.displayed_page().is_some());
    }
}

//! Segment dispatcher driving the DVB subtitle [`Database`] from PES payloads.

use crate::dvb::arena::PixmapArena;
use crate::dvb::database::{
    Database, ObjectInstance, PageLifecycle, Region, Rectangle, RenderingStateBlob,
    MAX_SUPPORTED_REGIONS,
};
use crate::dvb::pixel::{decode_object_field, ObjectMaps, PixelWriter};
use crate::dvb::segments::{
    decode_page_state, read_segment, CdsEntryAbbreviated, CdsEntryFullRange, CdsEntryHeader,
    CdsHeader, DdsHeader, DdsWindow, ObjectCodingMethod, OdsHeader, PageState, PcsHeader,
    PcsRegion, RcsHeader, RcsObject, SEGMENT_TYPE_CDS, SEGMENT_TYPE_DDS, SEGMENT_TYPE_DSS,
    SEGMENT_TYPE_EDS, SEGMENT_TYPE_ODS, SEGMENT_TYPE_PCS, SEGMENT_TYPE_RCS,
};
use crate::host::GfxHost;
use crate::reader::ByteReader;
use crate::timing::{GateResult, StcTime, TimingGate};
use crate::{read_bitfield, Config, ErrorDetails, Result};
use log::warn;
use num_traits::FromPrimitive;
use std::collections::VecDeque;

const END_OF_PES_MARKER: u8 = 0xFF;
const MAX_DISPLAY_WIDTH: u16 = 1920;
const MAX_DISPLAY_HEIGHT: u16 = 1080;

/// Buffered PES payload awaiting the timing gate.
struct PendingPayload {
    pts: Option<u32>,
    data: Vec<u8>,
}

/// Decodes DVB subtitle PES payloads into renderer-facing region state.
///
/// Drains buffered PES payloads on every [`DvbSubtitleDecoder::process`] call,
/// admitting only those the [`TimingGate`] currently allows.
pub struct DvbSubtitleDecoder {
    config: Config,
    database: Database,
    pending: VecDeque<PendingPayload>,
    gate: TimingGate,
}

impl DvbSubtitleDecoder {
    /// Builds a decoder, requesting the arena's initial buffer from `host` per
    /// `config.spec_version`.
    pub fn new(host: &mut dyn GfxHost, config: Config) -> Self {
        let arena = PixmapArena::new(host, config.spec_version.arena_max_size());
        DvbSubtitleDecoder {
            config,
            database: Database::new(arena),
            pending: VecDeque::new(),
            gate: TimingGate::new(),
        }
    }

    /// Read-only access to the decoded state for the renderer.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Queues a PES payload (the subtitling-segment bytes following the PES
    /// header) for later processing.
    pub fn add_pes_packet(&mut self, pts: Option<u32>, data: &[u8]) {
        self.pending.push_back(PendingPayload {
            pts,
            data: data.to_vec(),
        });
    }

    /// Admits as many queued payloads as the timing gate allows against `stc`,
    /// applying their segments to the database. Returns the number applied.
    pub fn process(&mut self, stc: StcTime) -> usize {
        self.database.expire_timed_out_pages(stc);

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
                    self.apply_pes_payload(payload.pts, &payload.data);
                    applied += 1;
                }
            }
        }
        applied
    }

    fn apply_pes_payload(&mut self, pts: Option<u32>, data: &[u8]) {
        let mut reader = ByteReader::single(data);
        loop {
            match reader.peek_u8() {
                Ok(END_OF_PES_MARKER) | Err(_) => break,
                Ok(_) => {}
            }
            if let Err(e) = self.apply_one_segment(&mut reader, pts) {
                warn!("dropping DVB segment at offset {}: {:?}", e.location, e.details);
                // Segment-level failures abort only the current segment; if the
                // reader didn't advance we'd loop forever, so bail the packet.
                break;
            }
        }
    }

    fn apply_one_segment(&mut self, reader: &mut ByteReader, pts: Option<u32>) -> Result<()> {
        let (header, mut payload) = read_segment(reader)?;
        let page_id = header.page_id();
        match header.segment_type() {
            SEGMENT_TYPE_DDS => apply_dds(&mut self.database, &mut payload),
            SEGMENT_TYPE_PCS => apply_pcs(&mut self.database, page_id, pts, &mut payload),
            SEGMENT_TYPE_RCS => apply_rcs(&mut self.database, page_id, &mut payload),
            SEGMENT_TYPE_CDS => apply_cds(&mut self.database, page_id, &mut payload),
            SEGMENT_TYPE_ODS => apply_ods(&mut self.database, page_id, &mut payload),
            SEGMENT_TYPE_EDS => apply_eds(&mut self.database, page_id),
            SEGMENT_TYPE_DSS => Ok(()),
            other => {
                warn!("unknown DVB segment type 0x{:02x}", other);
                Ok(())
            }
        }
    }
}

fn apply_dds(db: &mut Database, reader: &mut ByteReader) -> Result<()> {
    let header: DdsHeader = read_bitfield!(reader, DdsHeader);
    if db.display.version == Some(header.dds_version_number()) {
        return Ok(());
    }
    let width = header.display_width();
    let height = header.display_height();
    if width > MAX_DISPLAY_WIDTH || height > MAX_DISPLAY_HEIGHT {
        return Err(reader.make_error(ErrorDetails::InvalidSegmentField(
            "Maximum display size exceeded",
        )));
    }
    let display_bounds = Rectangle {
        x1: 0,
        y1: 0,
        x2: width,
        y2: height,
    };
    let window_bounds = if header.display_window_flag() {
        let window: DdsWindow = read_bitfield!(reader, DdsWindow);
        Rectangle {
            x1: window.display_window_horizontal_position_minimum(),
            y1: window.display_window_vertical_position_minimum(),
            x2: window.display_window_horizontal_position_maximum(),
            y2: window.display_window_vertical_position_maximum(),
        }
    } else {
        display_bounds
    };
    if !display_bounds.contains(&window_bounds) {
        return Err(reader.make_error(ErrorDetails::InvalidSegmentField(
            "display window exceeds display bounds",
        )));
    }
    db.display.version = Some(header.dds_version_number());
    db.display.display_bounds = display_bounds;
    db.display.window_bounds = window_bounds;
    Ok(())
}

fn apply_pcs(
    db: &mut Database,
    page_id: u16,
    pts: Option<u32>,
    reader: &mut ByteReader,
) -> Result<()> {
    let header: PcsHeader = read_bitfield!(reader, PcsHeader);
    let state = decode_page_state(header.page_state(), reader.location())?;

    let mut regions = Vec::new();
    while reader.remaining_len() > 0 {
        regions.push(read_bitfield!(reader, PcsRegion));
    }
    if regions.len() > MAX_SUPPORTED_REGIONS {
        return Err(reader.make_error(ErrorDetails::ResourceExhausted));
    }

    let page = db.page_mut(page_id);
    if page.version == Some(header.page_version_number()) {
        return Ok(());
    }
    match state {
        PageState::ModeChange | PageState::AcquisitionPoint => {
            page.state = PageLifecycle::Incomplete;
        }
        PageState::NormalCase => {
            if page.state == PageLifecycle::Invalid {
                // Incremental update arriving before any mode change; ETSI
                // requires this not to start a display set by itself.
                return Ok(());
            }
        }
        PageState::Reserved => unreachable!("rejected by decode_page_state"),
    }
    page.timeout_seconds = header.page_time_out();
    page.version = Some(header.page_version_number());
    if let Some(p) = pts {
        page.pts = p;
    }
    page.region_refs = regions.iter().map(|r| r.region_id()).collect();

    for r in &regions {
        if let Some(region) = db.region_mut(r.region_id()) {
            region.display_position = (
                r.region_horizontal_address(),
                r.region_vertical_address(),
            );
        }
    }
    Ok(())
}

fn apply_rcs(db: &mut Database, page_id: u16, reader: &mut ByteReader) -> Result<()> {
    if !page_is_incomplete(db, page_id) {
        return Ok(());
    }
    let header: RcsHeader = read_bitfield!(reader, RcsHeader);

    if let Some(region) = db.region_mut(header.region_id()) {
        if region.version == header.region_version_number() {
            return Ok(());
        }
        if region.clut_id != header.clut_id() {
            return Err(reader.make_error(ErrorDetails::InvalidSegmentField(
                "region update changed clut id",
            )));
        }
        region.depth = 1u8 << header.region_depth();
        region.compatibility_level = 1u8 << header.region_level_of_compatibility();
        region.background_index = header.region_8bit_pixel_code();
        region.version = header.region_version_number();
        if header.region_fill_flag() {
            let offset = region.pixmap.offset;
            let len = region.pixmap.len;
            db.arena
                .pixels_mut(offset, len)
                .fill(header.region_8bit_pixel_code());
        }
    } else {
        if db.regions.len() >= MAX_SUPPORTED_REGIONS {
            return Err(reader.make_error(ErrorDetails::ResourceExhausted));
        }
        let width = header.region_width();
        let height = header.region_height();
        if width == 0 || height == 0 {
            return Err(reader.make_error(ErrorDetails::InvalidSegmentField(
                "region dimensions must be non-zero",
            )));
        }
        let len = width as usize * height as usize;
        let offset = db
            .arena
            .alloc(len)
            .ok_or_else(|| reader.make_error(ErrorDetails::ResourceExhausted))?;
        if header.region_fill_flag() {
            db.arena
                .pixels_mut(offset, len)
                .fill(header.region_8bit_pixel_code());
        }
        db.regions.push(Region {
            id: header.region_id(),
            width,
            height,
            depth: 1u8 << header.region_depth(),
            compatibility_level: 1u8 << header.region_level_of_compatibility(),
            clut_id: header.clut_id(),
            background_index: header.region_8bit_pixel_code(),
            version: header.region_version_number(),
            pixmap: crate::dvb::database::Pixmap {
                width,
                height,
                offset,
                len,
            },
            display_position: (0, 0),
            object_list: Default::default(),
        });
    }

    let region = db.region_mut(header.region_id()).unwrap();
    region.object_list.clear();
    while reader.remaining_len() >= 6 {
        let obj: RcsObject = read_bitfield!(reader, RcsObject);
        region.object_list.push(ObjectInstance {
            object_id: obj.object_id(),
            position_x: obj.object_horizontal_position(),
            position_y: obj.object_vertical_position(),
        });
        if obj.object_type() & 0b01 != 0 && reader.remaining_len() >= 2 {
            // Enhanced object carries a fallback provider/object pair we don't
            // render; skip it.
            reader.skip_n(2)?;
        }
    }
    Ok(())
}

fn ycbcr_to_argb(y: u8, cb: u8, cr: u8, t: u8) -> u32 {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;
    let r = (y + 1.402 * cr).clamp(0.0, 255.0) as u32;
    let g = (y - 0.344136 * cb - 0.714136 * cr).clamp(0.0, 255.0) as u32;
    let b = (y + 1.772 * cb).clamp(0.0, 255.0) as u32;
    let a = 255u32.saturating_sub(t as u32);
    (a << 24) | (r << 16) | (g << 8) | b
}

fn apply_cds(db: &mut Database, page_id: u16, reader: &mut ByteReader) -> Result<()> {
    if !page_is_incomplete(db, page_id) {
        return Ok(());
    }
    let header: CdsHeader = read_bitfield!(reader, CdsHeader);
    {
        let clut = db.clut_mut(header.clut_id(), reader.location())?;
        if clut.version == Some(header.clut_version_number()) {
            return Ok(());
        }
        clut.version = Some(header.clut_version_number());
    }

    while reader.remaining_len() > 0 {
        let entry_header: CdsEntryHeader = read_bitfield!(reader, CdsEntryHeader);
        let (y, cb, cr, t) = if entry_header.full_range_flag() {
            let entry: CdsEntryFullRange = read_bitfield!(reader, CdsEntryFullRange);
            (entry.y_value(), entry.cb_value(), entry.cr_value(), entry.t_value())
        } else {
            let entry: CdsEntryAbbreviated = read_bitfield!(reader, CdsEntryAbbreviated);
            let y = entry.y_value() << 2;
            let cb = entry.cb_value() << 4;
            let cr = entry.cr_value() << 4;
            let t = entry.t_value() << 6;
            (y, cb, cr, t)
        };
        let argb = ycbcr_to_argb(y, cb, cr, t);
        let idx = entry_header.clut_entry_id();
        let clut = db.clut_mut(header.clut_id(), reader.location())?;
        if entry_header.entry_clut_2_bit() && (idx as usize) < clut.argb4.len() {
            clut.argb4[idx as usize] = argb;
        }
        if entry_header.entry_clut_4_bit() && (idx as usize) < clut.argb16.len() {
            clut.argb16[idx as usize] = argb;
        }
        if entry_header.entry_clut_8_bit() {
            clut.argb256[idx as usize] = argb;
        }
    }
    Ok(())
}

fn apply_ods(db: &mut Database, page_id: u16, reader: &mut ByteReader) -> Result<()> {
    if !page_is_incomplete(db, page_id) {
        return Ok(());
    }
    let header: OdsHeader = read_bitfield!(reader, OdsHeader);
    // Only coding method 0 (pixel run-length strings) is rendered; the other
    // three raw encodings (character string, and two reserved values) are
    // skipped rather than treated as errors.
    if ObjectCodingMethod::from_u8(header.object_coding_method()) != Some(ObjectCodingMethod::Pixels)
    {
        return Ok(());
    }

    let top_len = header.top_field_data_length() as usize;
    let bottom_len = header.bottom_field_data_length() as usize;
    let top_reader = reader.new_sub_reader(top_len)?;
    let bottom_reader = if bottom_len > 0 {
        reader.new_sub_reader(bottom_len)?
    } else {
        top_reader
    };

    let object_id = header.object_id();
    let non_modifying = header.non_modifying_color_flag();

    let targets: Vec<(u8, u8, u16, u16)> = db
        .regions
        .iter()
        .flat_map(|region| {
            region
                .object_list
                .iter()
                .filter(|o| o.object_id == object_id)
                .map(move |o| (region.id, region.depth, o.position_x, o.position_y))
        })
        .collect();

    for (region_id, depth, position_x, position_y) in targets {
        let region = match db.region_mut(region_id) {
            Some(r) => r,
            None => continue,
        };
        let (width, height, offset, len) = (
            region.pixmap.width,
            region.pixmap.height,
            region.pixmap.offset,
            region.pixmap.len,
        );
        let mut maps = ObjectMaps::default();

        let mut top_writer = PixelWriter::new_at(width, height, position_x, position_y);
        top_writer.set_non_modifying(non_modifying);
        let mut top = top_reader;
        let buffer = db.arena.pixels_mut(offset, len);
        decode_object_field(&mut top, depth, &mut top_writer, buffer, &mut maps)?;

        let mut bottom_writer = PixelWriter::new_at(width, height, position_x, position_y + 1);
        bottom_writer.set_non_modifying(non_modifying);
        let mut bottom = bottom_reader;
        let buffer = db.arena.pixels_mut(offset, len);
        decode_object_field(&mut bottom, depth, &mut bottom_writer, buffer, &mut maps)?;
    }
    Ok(())
}

fn apply_eds(db: &mut Database, page_id: u16) -> Result<()> {
    let page = db.page_mut(page_id);
    if page.state != PageLifecycle::Incomplete {
        return Ok(());
    }
    page.state = PageLifecycle::Complete;

    let regions = page
        .region_refs
        .clone()
        .into_iter()
        .filter_map(|id| db.region(id).cloned())
        .map(|r| {
            let pos = r.display_position;
            (r, pos)
        })
        .collect();
    db.rendering_state.swap(RenderingStateBlob { regions });
    Ok(())
}

fn page_is_incomplete(db: &Database, page_id: u16) -> bool {
    db.page(page_id)
        .map(|p| p.state == PageLifecycle::Incomplete)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvb::segments::{SEGMENT_SYNC_BYTE, SEGMENT_TYPE_DDS, SEGMENT_TYPE_EDS, SEGMENT_TYPE_PCS};

    struct TestHost;
    impl GfxHost for TestHost {
        fn allocate(&mut self, size: usize) -> Option<Box<[u8]>> {
            Some(vec![0u8; size].into_boxed_slice())
        }
        fn free(&mut self, _buf: Box<[u8]>) {}
        fn draw(&mut self, _x: u16, _y: u16, _w: u16, _h: u16, _pixels: &[u8], _clut: &[u32]) {}
        fn clear(&mut self) {}
        fn finish(&mut self) {}
        fn set_display_bounds(&mut self, _w: u16, _h: u16) {}
    }

    fn segment(seg_type: u8, page_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![SEGMENT_SYNC_BYTE, seg_type];
        out.extend_from_slice(&page_id.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn display_clamp_rejects_oversized_dimensions() {
        let mut host = TestHost;
        let mut decoder = DvbSubtitleDecoder::new(&mut host, Config::default());
        let dds_payload = [0x00, 0x07, 0xFF, 0x07, 0xFF]; // version 0, no window, 2047x2047
        let data = segment(SEGMENT_TYPE_DDS, 1, &dds_payload);
        decoder.add_pes_packet(None, &data);
        let applied = decoder.process(StcTime::Invalid);
        assert_eq!(applied, 1);
        assert_eq!(decoder.database().display.version, None);
    }

    #[test]
    fn acquisition_point_reopens_a_committed_page() {
        let mut host = TestHost;
        let mut decoder = DvbSubtitleDecoder::new(&mut host, Config::default());

        // Mode-change PCS, no regions, then immediate EDS commits the page.
        let pcs_mode_change = [0x00, 0x00, 0b10 << 6];
        let mut data = segment(SEGMENT_TYPE_PCS, 1, &pcs_mode_change);
        data.extend_from_slice(&segment(SEGMENT_TYPE_EDS, 1, &[]));
        decoder.add_pes_packet(None, &data);
        decoder.process(StcTime::Invalid);
        assert_eq!(
            decoder.database().page(1).unwrap().state,
            PageLifecycle::Complete
        );

        let pcs_acquisition = [0x00, 0x01, 0b01 << 6];
        let data = segment(SEGMENT_TYPE_PCS, 1, &pcs_acquisition);
        decoder.add_pes_packet(None, &data);
        decoder.process(StcTime::Invalid);
        assert_eq!(
            decoder.database().page(1).unwrap().state,
            PageLifecycle::Incomplete
        );
    }
}

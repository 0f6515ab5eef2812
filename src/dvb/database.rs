//! Per-epoch DVB subtitle data model: pages, regions, CLUTs, and the
//! current/previous rendering state pair.

use crate::dvb::arena::PixmapArena;
use crate::timing::StcTime;
use crate::{Error, ErrorDetails, Result};
use smallvec::SmallVec;

/// Upper bound on simultaneously defined regions per epoch.
pub const MAX_SUPPORTED_REGIONS: usize = 16;

/// Upper bound on simultaneously defined CLUTs per epoch.
pub const MAX_SUPPORTED_CLUTS: usize = 16;

/// Upper bound on object instances referenced across all of a page's regions.
pub const MAX_SUPPORTED_OBJECTS: usize = 32;

/// Half-open rectangle, `x1 <= x2`, `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    /// Left edge, inclusive.
    pub x1: u16,
    /// Top edge, inclusive.
    pub y1: u16,
    /// Right edge, exclusive.
    pub x2: u16,
    /// Bottom edge, exclusive.
    pub y2: u16,
}

impl Rectangle {
    /// Whether `other` lies entirely within `self`.
    pub fn contains(&self, other: &Rectangle) -> bool {
        other.x1 >= self.x1 && other.y1 >= self.y1 && other.x2 <= self.x2 && other.y2 <= self.y2
    }
}

/// Display definition: overall display area plus an optional clipping window.
#[derive(Debug, Clone)]
pub struct Display {
    /// Last applied `DDS` version, or `None` before the first one arrives.
    pub version: Option<u8>,
    /// Full display area. Defaults to SD 720x576 until a `DDS` arrives.
    pub display_bounds: Rectangle,
    /// Clipping window, always contained within `display_bounds`.
    pub window_bounds: Rectangle,
}

impl Default for Display {
    fn default() -> Self {
        let display_bounds = Rectangle {
            x1: 0,
            y1: 0,
            x2: 720,
            y2: 576,
        };
        Display {
            version: None,
            display_bounds,
            window_bounds: display_bounds,
        }
    }
}

/// Colour lookup table shared by every region referencing its `clut_id`.
#[derive(Debug, Clone)]
pub struct Clut {
    /// CLUT identifier.
    pub id: u8,
    /// Last applied `CDS` version for this CLUT, or `None` before any arrives.
    pub version: Option<u8>,
    /// ARGB palette as seen through a 2-bit pixel index.
    pub argb4: [u32; 4],
    /// ARGB palette as seen through a 4-bit pixel index.
    pub argb16: [u32; 16],
    /// ARGB palette as seen through an 8-bit pixel index.
    pub argb256: Box<[u32; 256]>,
}

impl Clut {
    fn new(id: u8) -> Self {
        Clut {
            id,
            version: None,
            argb4: [0; 4],
            argb16: [0; 16],
            argb256: Box::new([0; 256]),
        }
    }
}

/// Arena-backed 8-bit-per-pixel bitmap owned by one [`Region`].
#[derive(Debug, Clone, Copy)]
pub struct Pixmap {
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Byte offset of the pixmap's storage within the [`PixmapArena`].
    pub offset: usize,
    /// Length of the pixmap's storage, in bytes (`width * height`).
    pub len: usize,
}

/// A positioned reference to an [`crate::dvb::segments::OdsHeader`]-identified object.
#[derive(Debug, Clone, Copy)]
pub struct ObjectInstance {
    /// Object identifier this instance draws.
    pub object_id: u16,
    /// Horizontal offset within the owning region.
    pub position_x: u16,
    /// Vertical offset within the owning region.
    pub position_y: u16,
}

/// A region: one rectangular pixmap, its CLUT reference, and the objects drawn
/// into it.
#[derive(Debug, Clone)]
pub struct Region {
    /// Region identifier, unique within the page.
    pub id: u8,
    /// Region width, in pixels.
    pub width: u16,
    /// Region height, in pixels.
    pub height: u16,
    /// Pixel code string bit depth.
    pub depth: u8,
    /// Nominal authored bit depth (may differ from `depth`; informational only).
    pub compatibility_level: u8,
    /// CLUT this region paints through.
    pub clut_id: u8,
    /// Background pixel index used when the region is filled.
    pub background_index: u8,
    /// Last applied `RCS` version for this region.
    pub version: u8,
    /// Arena-backed pixel storage.
    pub pixmap: Pixmap,
    /// Position on the display (set by the `PCS` region list).
    pub display_position: (u16, u16),
    /// Objects drawn into this region.
    pub object_list: SmallVec<[ObjectInstance; 4]>,
}

/// Page lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLifecycle {
    /// No display set has started for this page id since the last epoch reset.
    Invalid,
    /// A display set is being assembled; may still receive RCS/CDS/ODS segments.
    Incomplete,
    /// `EDS` closed the display set; ready for the renderer.
    Complete,
    /// The page's timeout elapsed before an `EDS` arrived.
    TimedOut,
}

/// A subtitle page: the composition root for one epoch.
#[derive(Debug, Clone)]
pub struct Page {
    /// Page identifier (echoes the PES stream's subtitle page id).
    pub id: u16,
    /// Seconds after `pts` at which an incomplete page is erased.
    pub timeout_seconds: u8,
    /// PTS (45kHz ticks) the page composition was admitted at.
    pub pts: u32,
    /// Last applied `PCS` version.
    pub version: Option<u8>,
    /// Current lifecycle state.
    pub state: PageLifecycle,
    /// Region ids composed onto this page, in `PCS` order.
    pub region_refs: SmallVec<[u8; MAX_SUPPORTED_REGIONS]>,
}

impl Page {
    fn new(id: u16) -> Self {
        Page {
            id,
            timeout_seconds: 0,
            pts: 0,
            version: None,
            state: PageLifecycle::Invalid,
            region_refs: SmallVec::new(),
        }
    }
}

/// One half of the current/previous [`RenderingState`] pair: the renderer-facing
/// view of a completed page.
#[derive(Debug, Clone, Default)]
pub struct RenderingStateBlob {
    /// Regions to blit, each paired with its on-display position.
    pub regions: Vec<(Region, (u16, u16))>,
}

/// Current/previous rendering state, swapped on every completed display set so a
/// renderer can diff against the prior frame.
#[derive(Debug, Clone, Default)]
pub struct RenderingState {
    current: RenderingStateBlob,
    previous: RenderingStateBlob,
}

impl RenderingState {
    /// The most recently completed display set.
    pub fn current(&self) -> &RenderingStateBlob {
        &self.current
    }

    /// The display set completed before `current`.
    pub fn previous(&self) -> &RenderingStateBlob {
        &self.previous
    }

    /// Exchanges `current` and `previous`, then replaces the new `current` with
    /// `next`.
    pub fn swap(&mut self, next: RenderingStateBlob) {
        std::mem::swap(&mut self.current, &mut self.previous);
        self.current = next;
    }
}

/// Owns all per-epoch DVB state: the pixmap arena, display definition, CLUTs,
/// regions, and the page state machine, keyed by page id so multiple concurrent
/// subtitle pages (rare but legal) do not interfere with each other.
pub struct Database {
    /// Bump allocator backing every region's pixmap.
    pub arena: PixmapArena,
    /// Current display definition.
    pub display: Display,
    /// Defined CLUTs, indexed by `clut_id`.
    pub cluts: Vec<Clut>,
    /// Defined regions, indexed by `region_id`.
    pub regions: Vec<Region>,
    /// Pages observed this epoch, keyed by page id.
    pub pages: Vec<Page>,
    /// Renderer-facing rendering state pair.
    pub rendering_state: RenderingState,
}

impl Database {
    /// Builds a database with a fresh arena and no regions/CLUTs/pages.
    pub fn new(arena: PixmapArena) -> Self {
        Database {
            arena,
            display: Display::default(),
            cluts: Vec::new(),
            regions: Vec::new(),
            pages: Vec::new(),
            rendering_state: RenderingState::default(),
        }
    }

    /// Clears all region/CLUT/page state and rewinds the arena. Does not replace
    /// the arena itself; call sites replace it separately if the host supplies a
    /// new buffer.
    pub fn epoch_reset(&mut self) {
        self.display = Display::default();
        self.cluts.clear();
        self.regions.clear();
        self.pages.clear();
        self.arena.reset();
    }

    /// Finds or creates the page tracked under `page_id`.
    pub fn page_mut(&mut self, page_id: u16) -> &mut Page {
        if let Some(idx) = self.pages.iter().position(|p| p.id == page_id) {
            &mut self.pages[idx]
        } else {
            self.pages.push(Page::new(page_id));
            self.pages.last_mut().unwrap()
        }
    }

    /// Finds the page tracked under `page_id`, if any.
    pub fn page(&self, page_id: u16) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == page_id)
    }

    /// Finds or creates the CLUT with the given id, enforcing
    /// [`MAX_SUPPORTED_CLUTS`].
    pub fn clut_mut(&mut self, clut_id: u8, location: usize) -> Result<&mut Clut> {
        if let Some(idx) = self.cluts.iter().position(|c| c.id == clut_id) {
            return Ok(&mut self.cluts[idx]);
        }
        if self.cluts.len() >= MAX_SUPPORTED_CLUTS {
            return Err(Error {
                location,
                details: ErrorDetails::ResourceExhausted,
            });
        }
        self.cluts.push(Clut::new(clut_id));
        Ok(self.cluts.last_mut().unwrap())
    }

    /// Finds the CLUT with the given id, if any.
    pub fn clut(&self, clut_id: u8) -> Option<&Clut> {
        self.cluts.iter().find(|c| c.id == clut_id)
    }

    /// Finds a region by id.
    pub fn region_mut(&mut self, region_id: u8) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.id == region_id)
    }

    /// Finds a region by id.
    pub fn region(&self, region_id: u8) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == region_id)
    }

    /// Erases any page that has lived past its timeout, measured from its PTS at
    /// 45kHz ticks against `now`.
    pub fn expire_timed_out_pages(&mut self, now: StcTime) {
        let now_ticks = match now.ticks() {
            Some(t) => t,
            None => return,
        };
        for page in &mut self.pages {
            if page.state != PageLifecycle::Incomplete && page.state != PageLifecycle::Complete {
                continue;
            }
            let elapsed = now_ticks.wrapping_sub(page.pts) as i64;
            let timeout_ticks = page.timeout_seconds as i64 * 45_000;
            if elapsed >= 0 && elapsed >= timeout_ticks {
                page.state = PageLifecycle::TimedOut;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::GfxHost;

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

    fn make_db() -> Database {
        let mut host = TestHost;
        Database::new(PixmapArena::new(&mut host, 65536))
    }

    #[test]
    fn epoch_reset_clears_everything() {
        let mut db = make_db();
        db.page_mut(1).state = PageLifecycle::Incomplete;
        db.clut_mut(0, 0).unwrap();
        db.epoch_reset();
        assert!(db.pages.is_empty());
        assert!(db.cluts.is_empty());
        assert!(db.regions.is_empty());
    }

    #[test]
    fn clut_limit_is_enforced() {
        let mut db = make_db();
        for i in 0..MAX_SUPPORTED_CLUTS as u8 {
            db.clut_mut(i, 0).unwrap();
        }
        assert!(db.clut_mut(200, 0).is_err());
    }

    #[test]
    fn page_times_out_after_deadline() {
        let mut db = make_db();
        {
            let page = db.page_mut(1);
            page.state = PageLifecycle::Incomplete;
            page.pts = 0;
            page.timeout_seconds = 5;
        }
        db.expire_timed_out_pages(StcTime::Low32(4 * 45_000));
        assert_eq!(db.page(1).unwrap().state, PageLifecycle::Incomplete);
        db.expire_timed_out_pages(StcTime::Low32(6 * 45_000));
        assert_eq!(db.page(1).unwrap().state, PageLifecycle::TimedOut);
    }
}

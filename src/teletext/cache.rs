//! Bounded Teletext page cache with numeric-proximity eviction
//! (ETSI EN 300 706 has no normative cache, this mirrors common decoder
//! practice of bounding memory against a moving "current page" window).

use crate::teletext::page::{DecodedPage, PageId};
use std::collections::HashMap;

/// Number of pinned link-page slots reserved alongside the proximity window.
pub const LINK_PAGES_COUNT: usize = 6;
/// Extra slots reserved for pages the decoder currently holds out of the
/// cache (handed out by [`PageCache::get_clear_page`], not yet reinserted).
pub const IN_USE_PAGES_MARGIN: usize = 2;
/// Extra free slots kept available beyond the window and link set so a
/// burst of new headers doesn't immediately thrash eviction.
pub const FREE_PAGES_MARGIN: usize = 4;
/// Total page slots the cache manages.
pub const CACHE_SIZE: usize =
    2 * PROXIMITY_WINDOW + LINK_PAGES_COUNT + IN_USE_PAGES_MARGIN + FREE_PAGES_MARGIN;
/// Half-width, in decimal pages, of the window kept alive around the current
/// page (so `CACHE_SIZE` covers `current ± PROXIMITY_WINDOW`).
pub const PROXIMITY_WINDOW: usize = 10;

/// Slot state inside the fixed-size cache arena.
#[derive(Debug, Clone)]
enum Slot {
    Free,
    InUse { refcount: u32, page: Box<DecodedPage> },
}

/// Bounded cache of decoded Teletext pages, keyed by magazine-page number.
///
/// Mirrors the single-writer discipline of [`crate::dvb::database::Database`]:
/// [`PageCache::get_clear_page`] hands out exclusive ownership of a slot;
/// [`PageCache::insert_page`] or [`PageCache::release_page`] returns it.
pub struct PageCache {
    slots: Vec<Slot>,
    by_magazine_page: HashMap<u16, usize>,
    current: Option<PageId>,
    exact_match_slot: Option<usize>,
    linked_pages: Vec<PageId>,
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCache {
    /// Builds an empty cache with `CACHE_SIZE` free slots.
    pub fn new() -> Self {
        Self {
            slots: (0..CACHE_SIZE).map(|_| Slot::Free).collect(),
            by_magazine_page: HashMap::new(),
            current: None,
            exact_match_slot: None,
            linked_pages: Vec::new(),
        }
    }

    /// Updates the anchor page id and evicts anything that falls outside the
    /// proximity window and the pinned link set.
    pub fn set_current_page(&mut self, page_id: PageId) {
        self.current = Some(page_id);
        self.exact_match_slot = self.by_magazine_page.get(&page_id.magazine_page).copied();
        self.evict_unneeded();
    }

    /// Pins up to [`LINK_PAGES_COUNT`] extra pages against eviction.
    pub fn set_linked_pages(&mut self, ids: &[PageId]) {
        self.linked_pages = ids.iter().take(LINK_PAGES_COUNT).copied().collect();
        self.evict_unneeded();
    }

    /// True iff `page_id` matches the anchor, falls inside the numeric
    /// proximity window (with 800-page decimal wraparound), or is pinned.
    pub fn is_page_needed(&self, page_id: PageId) -> bool {
        if let Some(current) = self.current {
            if current.magazine_page == page_id.magazine_page {
                return true;
            }
            if let (Some(cur_dec), Some(page_dec)) = (valid_decimal(current), valid_decimal(page_id)) {
                if decimal_distance(cur_dec, page_dec) <= PROXIMITY_WINDOW as u16 {
                    return true;
                }
            }
        } else {
            return true;
        }
        self.linked_pages
            .iter()
            .any(|p| p.magazine_page == page_id.magazine_page)
    }

    fn evict_unneeded(&mut self) {
        let to_evict: Vec<u16> = self
            .by_magazine_page
            .keys()
            .copied()
            .filter(|&mp| !self.is_page_needed(PageId::new(mp, 0)))
            .collect();
        for mp in to_evict {
            if let Some(&slot) = self.by_magazine_page.get(&mp) {
                if matches!(self.slots[slot], Slot::InUse { refcount: 0, .. }) {
                    self.by_magazine_page.remove(&mp);
                    self.slots[slot] = Slot::Free;
                }
            }
        }
    }

    /// Returns a blank page with refcount 1 from the free list, or `None` if
    /// every slot is occupied.
    pub fn get_clear_page(&mut self, page_id: PageId) -> Option<&mut DecodedPage> {
        let idx = self.slots.iter().position(|s| matches!(s, Slot::Free))?;
        self.slots[idx] = Slot::InUse {
            refcount: 1,
            page: Box::new(DecodedPage::new(page_id)),
        };
        match &mut self.slots[idx] {
            Slot::InUse { page, .. } => Some(page.as_mut()),
            Slot::Free => unreachable!(),
        }
    }

    /// Places a page (previously obtained via [`Self::get_clear_page`]) into
    /// the map keyed by its magazine-page number, evicting any prior
    /// occupant of the same number.
    pub fn insert_page(&mut self, page: DecodedPage) {
        let mp = page.page_id.magazine_page;
        if !self.is_page_needed(page.page_id) {
            return;
        }
        let idx = self.slots.iter().position(|s| matches!(s, Slot::Free));
        let idx = match idx {
            Some(i) => i,
            None => return,
        };
        if let Some(old) = self.by_magazine_page.insert(mp, idx) {
            self.slots[old] = Slot::Free;
        }
        // Ownership returns to the cache on insertion; refcount 0 means no
        // consumer currently holds this slot out of the free list.
        self.slots[idx] = Slot::InUse {
            refcount: 0,
            page: Box::new(page),
        };
        if self.current.map(|c| c.magazine_page) == Some(mp) {
            self.exact_match_slot = Some(idx);
        }
    }

    /// Decrements a page's refcount; returns it to the free list at zero.
    pub fn release_page(&mut self, magazine_page: u16) {
        if let Some(&idx) = self.by_magazine_page.get(&magazine_page) {
            if let Slot::InUse { refcount, .. } = &mut self.slots[idx] {
                *refcount = refcount.saturating_sub(1);
            }
        }
    }

    /// Returns the page matching the current anchor set by
    /// [`Self::set_current_page`], if it has been cached.
    pub fn current_page(&self) -> Option<&DecodedPage> {
        let idx = self.exact_match_slot?;
        match &self.slots[idx] {
            Slot::InUse { page, .. } => Some(page.as_ref()),
            Slot::Free => None,
        }
    }

    /// Looks up a cached page by magazine-page number.
    pub fn get_page(&self, magazine_page: u16) -> Option<&DecodedPage> {
        let idx = *self.by_magazine_page.get(&magazine_page)?;
        match &self.slots[idx] {
            Slot::InUse { page, .. } => Some(page.as_ref()),
            Slot::Free => None,
        }
    }
}

fn valid_decimal(id: PageId) -> Option<u16> {
    let d = id.decimal_magazine_page();
    if d == crate::teletext::page::INVALID_MAGAZINE_PAGE {
        None
    } else {
        Some(d)
    }
}

/// Circular distance between two decimal page numbers on the 100..899 ring.
fn decimal_distance(a: u16, b: u16) -> u16 {
    let span = 800u16;
    let diff = if a > b { a - b } else { b - a };
    diff.min(span - diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_then_evict() {
        let mut cache = PageCache::new();
        let id = PageId::new(0x100, PageId::default().subpage);
        cache.set_current_page(id);
        cache.insert_page(DecodedPage::new(id));
        assert!(cache.get_page(0x100).is_some());

        let far = PageId::new(0x500, PageId::default().subpage);
        cache.set_current_page(far);
        assert!(cache.get_page(0x100).is_none());
    }

    #[test]
    fn linked_pages_survive_eviction() {
        let mut cache = PageCache::new();
        let id = PageId::new(0x100, PageId::default().subpage);
        cache.insert_page(DecodedPage::new(id));
        cache.set_linked_pages(&[id]);
        let far = PageId::new(0x500, PageId::default().subpage);
        cache.set_current_page(far);
        assert!(cache.get_page(0x100).is_some());
    }
}

//! Navigation metadata: TOP (BTT) and FLOF (X/27/0) table assembly
//! (ETSI EN 300 706 Annex E/J).

use crate::teletext::page::PageId;
use std::collections::HashMap;

/// One magazine-page's TOP adjacency: previous/next page and group/block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopLinks {
    /// Decimal page preceding this one in the TOP table.
    pub prev_page: u16,
    /// Decimal page following this one in the TOP table.
    pub next_page: u16,
    /// Decimal page of the next group boundary.
    pub next_group: u16,
    /// Decimal page of the next block boundary.
    pub next_block: u16,
}

/// One FLOF colour-key link set, from an X/27/0 packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditorialLinks {
    /// Red/green/yellow/cyan link targets.
    pub color_keys: [PageId; 4],
}

/// `BttPageType` classification of one BTT cell (ETSI EN 300 706 Annex E.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BttPageType {
    /// Not part of any group/block (e.g. subtitle page).
    NotPartOfPage,
    /// Ordinary program page.
    ProgramPage,
    /// First page of a group.
    GroupStart,
    /// First page of a block.
    BlockStart,
}

impl BttPageType {
    fn from_cell(byte: u8) -> Self {
        match byte & 0x07 {
            1 => BttPageType::GroupStart,
            2 => BttPageType::BlockStart,
            3 | 4 => BttPageType::ProgramPage,
            _ => BttPageType::NotPartOfPage,
        }
    }
}

/// Accumulates navigation metadata from BTT, M/29, X/28, and X/27/0 packets
/// across the whole service, and computes TOP adjacency once the BTT table
/// (magazine-page `0x1F0`, 20 rows of 40 one-byte cells) is complete.
#[derive(Debug, Default)]
pub struct MetadataProcessor {
    btt_cells: Vec<Option<[u8; 40]>>,
    top_links: HashMap<u16, TopLinks>,
    editorial_links: HashMap<u16, EditorialLinks>,
    initial_page: Option<PageId>,
}

impl MetadataProcessor {
    /// Builds an empty processor.
    pub fn new() -> Self {
        Self {
            btt_cells: vec![None; 20],
            top_links: HashMap::new(),
            editorial_links: HashMap::new(),
            initial_page: None,
        }
    }

    /// Feeds one BTT row (a `LopData` packet for magazine-page `0x1F0`).
    pub fn add_btt_row(&mut self, row: usize, cells: [u8; 40]) {
        if row >= 1 && row <= self.btt_cells.len() {
            self.btt_cells[row - 1] = Some(cells);
        }
        if self.btt_cells.iter().all(Option::is_some) {
            self.compute_top_links();
        }
    }

    /// Feeds an X/27/0 editorial links packet's six raw page-id fields
    /// (already corrected by the collector); only the first four (colour
    /// keys) are modelled.
    pub fn add_editorial_links(&mut self, page: u16, links_raw: [u16; 4]) {
        let color_keys = links_raw.map(|raw| PageId::new(raw, PageId::default().subpage));
        self.editorial_links
            .insert(page, EditorialLinks { color_keys });
    }

    /// Records the channel's initial page, from an M/8/30 broadcast service
    /// data packet.
    pub fn set_initial_page(&mut self, page: PageId) {
        self.initial_page = Some(page);
    }

    /// Returns the channel's initial page, if one has been seen.
    pub fn initial_page(&self) -> Option<PageId> {
        self.initial_page
    }

    /// Returns TOP adjacency for a decimal magazine-page, if the BTT table
    /// has been fully received.
    pub fn top_links(&self, decimal_page: u16) -> Option<TopLinks> {
        self.top_links.get(&decimal_page).copied()
    }

    /// Returns FLOF links for a decimal magazine-page, if an X/27/0 packet
    /// was received for it.
    pub fn editorial_links(&self, decimal_page: u16) -> Option<EditorialLinks> {
        self.editorial_links.get(&decimal_page).copied()
    }

    fn compute_top_links(&mut self) {
        let mut flat = Vec::with_capacity(800);
        for row in self.btt_cells.iter().flatten() {
            flat.extend_from_slice(row);
        }
        let types: Vec<BttPageType> = flat.iter().map(|&b| BttPageType::from_cell(b)).collect();

        let mut next_program: Vec<u16> = vec![0; 800];
        let mut next_group: Vec<u16> = vec![0; 800];
        let mut next_block: Vec<u16> = vec![0; 800];
        let mut last_program = 0u16;
        let mut last_group = 0u16;
        let mut last_block = 0u16;
        for i in (0..800).rev() {
            if !matches!(types[i], BttPageType::NotPartOfPage) {
                last_program = decimal_of(i);
            }
            if matches!(types[i], BttPageType::GroupStart) {
                last_group = decimal_of(i);
            }
            if matches!(types[i], BttPageType::BlockStart) {
                last_block = decimal_of(i);
            }
            next_program[i] = last_program;
            next_group[i] = last_group;
            next_block[i] = last_block;
        }

        let mut prev_program = 0u16;
        for i in 0..800 {
            let page = decimal_of(i);
            if !matches!(types[i], BttPageType::NotPartOfPage) {
                self.top_links.insert(
                    page,
                    TopLinks {
                        prev_page: prev_program,
                        next_page: next_program[(i + 1) % 800],
                        next_group: next_group[i],
                        next_block: next_block[i],
                    },
                );
                prev_program = page;
            }
        }
    }
}

/// Converts a 0-based BTT cell index into its decimal page number (`100..899`).
fn decimal_of(index: usize) -> u16 {
    100 + index as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_top_adjacency_for_simple_table() {
        let mut mp = MetadataProcessor::new();
        let mut grid = vec![[0u8; 40]; 20];
        // Page 100 (index 0) is a group start, page 101 a plain program page.
        grid[0][0] = 1;
        grid[0][1] = 3;
        for (row, cells) in grid.into_iter().enumerate() {
            mp.add_btt_row(row + 1, cells);
        }
        let links_100 = mp.top_links(100).unwrap();
        assert_eq!(links_100.next_page, 101);
        let links_101 = mp.top_links(101).unwrap();
        assert_eq!(links_101.prev_page, 100);
    }

    #[test]
    fn editorial_links_round_trip() {
        let mut mp = MetadataProcessor::new();
        mp.add_editorial_links(100, [0x101, 0x102, 0x103, 0x104]);
        let links = mp.editorial_links(100).unwrap();
        assert_eq!(links.color_keys[0].magazine_page, 0x101);
    }
}

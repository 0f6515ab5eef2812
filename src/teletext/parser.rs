//! Character-level row parser: control-code attribute state machine, G0/G1
//! character set selection, box mode, and double-height propagation
//! (ETSI EN 300 706 §12).

use crate::config::CharsetOverrides;
use crate::teletext::charset;
use crate::teletext::page::{Cell, CellProperties, PAGE_COLUMNS};

/// Mosaic colour code base (`0x10..0x17` select mosaic colours and G1).
const MOSAIC_COLOR_BASE: u8 = 0x10;
/// Alpha colour code base (`0x00..0x07` select alpha colours and G0).
const ALPHA_COLOR_BASE: u8 = 0x00;

#[derive(Debug, Clone, Copy)]
struct Attributes {
    fg: u8,
    bg: u8,
    graphics: bool,
    separated: bool,
    double_height: bool,
    double_width: bool,
    flash: bool,
    conceal: bool,
    box_mode: bool,
    hold_mosaic: bool,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            fg: 7,
            bg: 0,
            graphics: false,
            separated: false,
            double_height: false,
            double_width: false,
            flash: false,
            conceal: false,
            box_mode: false,
            hold_mosaic: false,
        }
    }
}

/// Result of parsing one 40-byte display row.
pub struct ParsedRow {
    /// Decoded cells for this row.
    pub cells: [Cell; PAGE_COLUMNS],
    /// Per-column double-height flag: the following row's matching cells
    /// must be hidden (the glyph already spans both rows).
    pub double_height_mask: [bool; PAGE_COLUMNS],
}

fn is_set_at(byte: u8) -> bool {
    matches!(byte, 0x09 | 0x0C | 0x18..=0x1A | 0x1C..=0x1E)
}

fn build_cell(attrs: &Attributes, character: char) -> Cell {
    let mut properties = CellProperties::empty();
    if attrs.flash {
        properties.insert(CellProperties::FLASH);
    }
    if attrs.conceal {
        properties.insert(CellProperties::CONCEAL);
    }
    if attrs.double_width {
        properties.insert(CellProperties::DOUBLE_WIDTH);
    }
    if attrs.double_height {
        properties.insert(CellProperties::DOUBLE_HEIGHT);
    }
    if attrs.graphics {
        properties.insert(CellProperties::MOSAIC);
        if attrs.separated {
            properties.insert(CellProperties::MOSAIC_SEPARATED);
        }
    }
    Cell {
        character,
        bg_color: attrs.bg,
        fg_color: attrs.fg,
        properties,
    }
}

/// Parses one display row (a `LopData` packet's 40 bytes) into 40 cells.
///
/// `national_option` selects the G0 national subset; `suppress_outside_box`
/// implements the SUBTITLE/NEWSFLASH "hidden unless boxed" rule.
pub fn parse_row(
    bytes: &[u8; PAGE_COLUMNS],
    national_option: u8,
    overrides: &CharsetOverrides,
    suppress_outside_box: bool,
) -> ParsedRow {
    let mut current = Attributes::default();
    let mut pending = current;
    let mut held_mosaic_char = ' ';
    let mut cells = [Cell::default(); PAGE_COLUMNS];
    let mut double_height_mask = [false; PAGE_COLUMNS];

    for (col, &byte) in bytes.iter().enumerate() {
        current = pending;

        let character = if byte < 0x20 {
            apply_control_code(byte, &mut current, &mut pending, &mut held_mosaic_char)
        } else if current.graphics {
            let ch = charset::map_g1(byte);
            if current.hold_mosaic {
                held_mosaic_char = ch;
            }
            ch
        } else {
            charset::map_g0(byte, national_option, overrides)
        };

        let mut cell = build_cell(&current, character);
        if suppress_outside_box && !current.box_mode {
            cell.properties.insert(CellProperties::HIDDEN);
        }
        double_height_mask[col] = current.double_height;
        cells[col] = cell;
    }

    ParsedRow {
        cells,
        double_height_mask,
    }
}

/// Applies one control byte, mutating `current` for set-at attributes (which
/// affect this very cell) and `pending` for set-after attributes (which take
/// effect starting the next cell). Returns the character this cell renders
/// as: a space, or the last-held mosaic glyph while hold mode is active.
fn apply_control_code(
    byte: u8,
    current: &mut Attributes,
    pending: &mut Attributes,
    held_mosaic_char: &mut char,
) -> char {
    let set_at = is_set_at(byte);
    let prior_fg = current.fg;
    let mut attrs = if set_at { *current } else { *pending };

    match byte {
        ALPHA_COLOR_BASE..=0x07 => {
            attrs.fg = byte - ALPHA_COLOR_BASE;
            attrs.graphics = false;
        }
        0x08 => attrs.flash = true,
        0x09 => attrs.flash = false,
        0x0A => attrs.box_mode = false,
        0x0B => attrs.box_mode = true,
        0x0C => attrs.double_height = false,
        0x0D => attrs.double_height = true,
        0x0E => attrs.double_width = true,
        0x0F => {
            attrs.double_height = true;
            attrs.double_width = true;
        }
        MOSAIC_COLOR_BASE..=0x17 => {
            attrs.fg = byte - MOSAIC_COLOR_BASE;
            attrs.graphics = true;
        }
        0x18 => attrs.conceal = true,
        0x19 => attrs.separated = false,
        0x1A => attrs.separated = true,
        0x1B => {}
        0x1C => attrs.bg = 0,
        // New Background takes the foreground colour in effect just before
        // this control code.
        0x1D => attrs.bg = prior_fg,
        0x1E => attrs.hold_mosaic = true,
        0x1F => attrs.hold_mosaic = false,
        _ => {}
    }

    *pending = attrs;
    if set_at {
        *current = attrs;
    }

    if current.hold_mosaic && current.graphics {
        *held_mosaic_char
    } else {
        ' '
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with(bytes: &[(usize, u8)]) -> [u8; PAGE_COLUMNS] {
        let mut row = [b' '; PAGE_COLUMNS];
        for &(i, b) in bytes {
            row[i] = b;
        }
        row
    }

    #[test]
    fn plain_text_passes_through() {
        let row = row_with(&[(0, b'H'), (1, b'I')]);
        let parsed = parse_row(&row, 0, &CharsetOverrides::default(), false);
        assert_eq!(parsed.cells[0].character, 'H');
        assert_eq!(parsed.cells[1].character, 'I');
    }

    #[test]
    fn alpha_colour_is_set_after() {
        let row = row_with(&[(0, 0x01), (1, b'X')]);
        let parsed = parse_row(&row, 0, &CharsetOverrides::default(), false);
        assert_eq!(parsed.cells[0].fg_color, 7); // unaffected at the control cell
        assert_eq!(parsed.cells[1].fg_color, 1); // red from column 1 onward
    }

    #[test]
    fn double_height_marks_mask() {
        let row = row_with(&[(0, 0x0D), (1, b'A')]);
        let parsed = parse_row(&row, 0, &CharsetOverrides::default(), false);
        assert!(parsed.double_height_mask[1]);
    }

    #[test]
    fn box_mode_hides_cells_outside_box_when_suppressed() {
        let row = row_with(&[(0, b'A'), (5, 0x0B), (6, b'B')]);
        let parsed = parse_row(&row, 0, &CharsetOverrides::default(), true);
        assert!(parsed.cells[0].properties.contains(CellProperties::HIDDEN));
        assert!(!parsed.cells[6].properties.contains(CellProperties::HIDDEN));
    }
}

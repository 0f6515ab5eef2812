//! Host-facing configuration for both decode pipelines.

/// DVB subtitling specification revision. Controls the [`dvb::arena::PixmapArena`]
/// upper bound, per ETSI EN 300 743's evolution between editions.
///
/// [`dvb::arena::PixmapArena`]: crate::dvb::arena::PixmapArena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    /// ETSI EN 300 743 V1.2.1. Bounds the arena to `80 KiB * 4`.
    V1_2_1,
    /// ETSI EN 300 743 V1.3.1. Bounds the arena to `320 KiB * 4`.
    V1_3_1,
}

impl SpecVersion {
    /// Upper bound, in bytes, the [`dvb::arena::PixmapArena`] will request from the
    /// host's graphics allocator for this spec revision.
    ///
    /// [`dvb::arena::PixmapArena`]: crate::dvb::arena::PixmapArena
    pub fn arena_max_size(self) -> usize {
        match self {
            SpecVersion::V1_2_1 => 80 * 1024 * 4,
            SpecVersion::V1_3_1 => 320 * 1024 * 4,
        }
    }
}

impl Default for SpecVersion {
    fn default() -> Self {
        SpecVersion::V1_3_1
    }
}

/// Navigation metadata precedence for Teletext page links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    /// No navigation metadata is populated.
    Default,
    /// TOP metadata only.
    TopDefault,
    /// FLOF metadata only.
    FlofDefault,
    /// TOP first, falling back to FLOF if TOP is unavailable.
    TopFlofDefault,
    /// FLOF first, falling back to TOP if FLOF is unavailable.
    FlofTopDefault,
}

impl Default for NavigationMode {
    fn default() -> Self {
        NavigationMode::Default
    }
}

/// Per-national-option character set override maps for Teletext G0/G2 sets.
///
/// Empty by default; a host may populate entries to override the built-in tables in
/// [`crate::teletext::charset`] for a given national option code.
#[derive(Debug, Clone, Default)]
pub struct CharsetOverrides {
    /// `(national_option_code, g0_overrides)` pairs. Each override replaces the
    /// default glyph for the given 7-bit code position.
    pub g0: Vec<(u8, [(u8, char); 13])>,
}

/// Host-tunable knobs shared by both decode pipelines.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which edition of ETSI EN 300 743 to bound the pixmap arena against.
    pub spec_version: SpecVersion,
    /// Navigation metadata precedence used by the Teletext engine.
    pub navigation_mode: NavigationMode,
    /// When `true`, the timing gate treats every packet as `PROCESS` regardless of
    /// its PTS.
    pub ignore_pts: bool,
    /// National-option character set overrides for Teletext.
    pub charset_overrides: CharsetOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spec_version: SpecVersion::default(),
            navigation_mode: NavigationMode::default(),
            ignore_pts: false,
            charset_overrides: CharsetOverrides::default(),
        }
    }
}

//! EQ presets and slider-scale conversion
//!
//! The app shows EQ bands as 0-100 sliders with 50 as flat; the device takes
//! signed dB within ±12.

use bdk_transport::protocol::limits;
use bdk_transport::{EqLevels, Rgb};

/// Slider value for a flat band
pub const LEVEL_FLAT: u8 = 50;
/// Largest slider value
pub const LEVEL_MAX: u8 = 100;

/// A built-in EQ preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqPreset {
    /// Index sent with SET_EQ_PRESET
    pub id: u8,
    pub name: &'static str,
    pub description: &'static str,
    /// Slider levels, 0-100
    pub bass: u8,
    pub mid: u8,
    pub treble: u8,
    /// Accent color for UIs
    pub color: Rgb,
    /// Shown only in the extended list
    pub extended: bool,
}

impl EqPreset {
    /// Preset gains in dB
    pub fn levels(&self) -> EqLevels {
        levels_from_sliders(self.bass, self.mid, self.treble)
    }
}

const fn preset(
    id: u8,
    name: &'static str,
    description: &'static str,
    (bass, mid, treble): (u8, u8, u8),
    color: u32,
    extended: bool,
) -> EqPreset {
    EqPreset {
        id,
        name,
        description,
        bass,
        mid,
        treble,
        color: Rgb::new((color >> 16) as u8, (color >> 8) as u8, color as u8),
        extended,
    }
}

/// All presets in id order
pub const PRESETS: [EqPreset; limits::EQ_PRESET_COUNT as usize] = [
    preset(0, "Balanced", "Flat response, true to source", (50, 50, 50), 0x00D4FF, false),
    preset(1, "Deep Bass", "Enhanced low frequencies", (80, 45, 40), 0xFF6B35, false),
    preset(2, "Clear Vocals", "Enhanced clarity for speech and vocals", (35, 70, 55), 0x9C27B0, false),
    preset(3, "Bright & Clear", "Crisp highs, detailed sound", (40, 55, 75), 0x00E676, false),
    preset(4, "Punchy", "Tight bass with presence", (70, 60, 55), 0xFF5252, false),
    preset(5, "Warm", "Smooth and relaxed sound", (60, 50, 35), 0xFFAB40, false),
    preset(6, "Studio", "Reference monitoring profile", (48, 52, 50), 0x78909C, true),
    preset(7, "Club", "Dance and electronic music", (85, 40, 60), 0xE040FB, true),
    preset(8, "Cinema", "Immersive movie experience", (65, 55, 45), 0xFF7043, true),
    preset(9, "Podcast", "Optimized for spoken content", (30, 75, 50), 0x26A69A, true),
    preset(10, "Gaming", "Enhanced spatial awareness", (55, 65, 70), 0x7C4DFF, true),
    preset(11, "Late Night", "Reduced bass for quiet listening", (30, 55, 45), 0x5C6BC0, true),
];

/// Look up a preset by id
pub fn preset_by_id(id: u8) -> Option<&'static EqPreset> {
    PRESETS.get(usize::from(id))
}

/// Look up a preset by name (case-insensitive, `-`/`_` match spaces)
pub fn preset_by_name(name: &str) -> Option<&'static EqPreset> {
    let wanted = normalize(name);
    PRESETS.iter().find(|p| normalize(p.name) == wanted)
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Convert a 0-100 slider value to dB (rounded to nearest)
pub fn slider_to_db(level: u8) -> i8 {
    let level = i32::from(level.min(LEVEL_MAX));
    let max = i32::from(limits::EQ_DB_MAX);
    let scaled = (level - i32::from(LEVEL_FLAT)) * max;
    let half = i32::from(LEVEL_FLAT) / 2;
    // round half away from zero
    let db = if scaled >= 0 {
        (scaled + half) / i32::from(LEVEL_FLAT)
    } else {
        (scaled - half) / i32::from(LEVEL_FLAT)
    };
    db.clamp(-max, max) as i8
}

/// Convert dB to the nearest 0-100 slider value
pub fn db_to_slider(db: i8) -> u8 {
    let max = i32::from(limits::EQ_DB_MAX);
    let db = i32::from(db).clamp(-max, max);
    let level = i32::from(LEVEL_FLAT) + (db * i32::from(LEVEL_FLAT) + db.signum() * max / 2) / max;
    level.clamp(0, i32::from(LEVEL_MAX)) as u8
}

/// Convert three slider values to dB levels
pub fn levels_from_sliders(bass: u8, mid: u8, treble: u8) -> EqLevels {
    EqLevels {
        bass: slider_to_db(bass),
        mid: slider_to_db(mid),
        treble: slider_to_db(treble),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_ids_match_index() {
        for (i, p) in PRESETS.iter().enumerate() {
            assert_eq!(usize::from(p.id), i);
        }
        assert_eq!(PRESETS.iter().filter(|p| !p.extended).count(), 6);
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(preset_by_name("deep-bass").unwrap().id, 1);
        assert_eq!(preset_by_name("Bright & Clear").unwrap().id, 3);
        assert_eq!(preset_by_name("late_night").unwrap().id, 11);
        assert!(preset_by_name("loudness").is_none());
        assert!(preset_by_id(12).is_none());
    }

    #[test]
    fn test_slider_conversion() {
        assert_eq!(slider_to_db(50), 0);
        assert_eq!(slider_to_db(0), -12);
        assert_eq!(slider_to_db(100), 12);
        assert_eq!(slider_to_db(80), 7);
        assert_eq!(slider_to_db(30), -5);
        assert_eq!(slider_to_db(255), 12);
    }

    #[test]
    fn test_db_to_slider() {
        assert_eq!(db_to_slider(0), 50);
        assert_eq!(db_to_slider(12), 100);
        assert_eq!(db_to_slider(-12), 0);
        for db in -12..=12 {
            assert_eq!(slider_to_db(db_to_slider(db)), db);
        }
    }

    #[test]
    fn test_balanced_is_flat() {
        assert_eq!(PRESETS[0].levels(), EqLevels::FLAT);
        assert_eq!(PRESETS[0].color, Rgb::new(0x00, 0xD4, 0xFF));
    }
}

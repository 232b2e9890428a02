//! Luminance -> glyph lookup (SPEC_FULL.md §4.8 step 3). A palette's grapheme
//! clusters are precomputed once into (byte-offset, byte-length) pairs so per-pixel
//! lookup is O(1) even for multi-byte UTF-8 glyphs.

use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

pub const PRESET_STANDARD: &str = "   ...',;:clodxkO0KXNWM";
pub const PRESET_BLOCKS: &str = " \u{2591}\u{2592}\u{2593}\u{2588}";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("palette must contain at least one glyph")]
pub struct InvalidPalette;

/// A precomputed luminance-to-glyph table. Construction is the only place grapheme
/// segmentation happens; `glyph_for` is a plain array index plus a string slice.
#[derive(Debug, Clone)]
pub struct Palette {
    text: String,
    /// (byte_offset, byte_len) for each grapheme cluster, in palette order (darkest
    /// to lightest, by convention of the preset strings).
    entries: Vec<(usize, usize)>,
    /// 256-entry lookup: luminance value -> index into `entries`.
    lut: [u16; 256],
}

impl Palette {
    pub fn new(text: &str) -> Result<Self, InvalidPalette> {
        let entries: Vec<(usize, usize)> = text.grapheme_indices(true).map(|(i, g)| (i, g.len())).collect();
        if entries.is_empty() {
            return Err(InvalidPalette);
        }
        let n = entries.len();
        let mut lut = [0u16; 256];
        for (luminance, slot) in lut.iter_mut().enumerate() {
            let idx = (luminance * n) / 256;
            *slot = idx.min(n - 1) as u16;
        }
        Ok(Self {
            text: text.to_string(),
            entries,
            lut,
        })
    }

    /// Returns the glyph for a luminance value, or `"?"` if the client does not
    /// support UTF-8 and the selected glyph is multi-byte (SPEC_FULL.md §4.8 edge
    /// cases).
    pub fn glyph_for(&self, luminance: u8, utf8_support: bool) -> &str {
        let (offset, len) = self.entries[self.lut[luminance as usize] as usize];
        if !utf8_support && len > 1 {
            return "?";
        }
        &self.text[offset..offset + len]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_palette_is_rejected() {
        assert_eq!(Palette::new(""), Err(InvalidPalette));
    }

    #[test]
    fn single_glyph_palette_is_used_for_every_luminance() {
        let palette = Palette::new("#").unwrap();
        assert_eq!(palette.glyph_for(0, true), "#");
        assert_eq!(palette.glyph_for(255, true), "#");
    }

    #[test]
    fn preset_spans_dark_to_light() {
        let palette = Palette::new(PRESET_STANDARD).unwrap();
        assert_eq!(palette.glyph_for(0, true), " ");
        assert_eq!(palette.glyph_for(255, true), "M");
    }

    #[test]
    fn multi_byte_glyph_falls_back_to_question_mark_without_utf8_support() {
        let palette = Palette::new(PRESET_BLOCKS).unwrap();
        assert_eq!(palette.glyph_for(255, false), "?");
        assert_eq!(palette.glyph_for(255, true), "\u{2588}");
    }
}

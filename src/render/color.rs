//! Color quantization (SPEC_FULL.md §4.8 step 4): ANSI-16 with optional ordered
//! Bayer dithering, the xterm 6x6x6 cube + grayscale ramp for 256-color, and
//! verbatim 24-bit SGR for truecolor.

use crate::session::{ColorLevel, RenderMode};

/// 4x4 ordered (Bayer) dither matrix, values pre-scaled to a 0..16 range so they can
/// be added directly to an 8-bit channel before quantizing to 16 colors.
const BAYER_4X4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

const ANSI16_PALETTE: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (128, 0, 0),
    (0, 128, 0),
    (128, 128, 0),
    (0, 0, 128),
    (128, 0, 128),
    (0, 128, 128),
    (192, 192, 192),
    (128, 128, 128),
    (255, 0, 0),
    (0, 255, 0),
    (255, 255, 0),
    (0, 0, 255),
    (255, 0, 255),
    (0, 255, 255),
    (255, 255, 255),
];

fn dither_offset(x: u32, y: u32) -> i16 {
    BAYER_4X4[(y % 4) as usize][(x % 4) as usize] as i16 - 8
}

fn squared_distance(a: (u8, u8, u8), b: (u8, u8, u8)) -> u32 {
    let dr = a.0 as i32 - b.0 as i32;
    let dg = a.1 as i32 - b.1 as i32;
    let db = a.2 as i32 - b.2 as i32;
    (dr * dr + dg * dg + db * db) as u32
}

/// Nearest ANSI-16 color index (0..=15) for an RGB triple, with an optional ordered
/// dither offset applied per-channel beforehand to break up banding.
pub fn quantize_ansi16(r: u8, g: u8, b: u8, x: u32, y: u32, dither: bool) -> u8 {
    let (r, g, b) = if dither {
        let offset = dither_offset(x, y);
        (
            (r as i16 + offset).clamp(0, 255) as u8,
            (g as i16 + offset).clamp(0, 255) as u8,
            (b as i16 + offset).clamp(0, 255) as u8,
        )
    } else {
        (r, g, b)
    };
    ANSI16_PALETTE
        .iter()
        .enumerate()
        .min_by_key(|(_, &candidate)| squared_distance((r, g, b), candidate))
        .map(|(idx, _)| idx as u8)
        .unwrap_or(0)
}

/// xterm 256-color index: the 16 base colors are never emitted from this path (the
/// renderer uses the dedicated 16-color path for `ColorLevel::Ansi16`), so this
/// covers only the 6x6x6 color cube (16..=231) and the 24-step grayscale ramp
/// (232..=255), picking whichever is closer to the input.
pub fn quantize_ansi256(r: u8, g: u8, b: u8) -> u8 {
    let to_cube_step = |c: u8| -> u8 {
        // xterm cube steps: 0, 95, 135, 175, 215, 255.
        const STEPS: [u8; 6] = [0, 95, 135, 175, 215, 255];
        STEPS
            .iter()
            .enumerate()
            .min_by_key(|(_, &step)| (c as i32 - step as i32).abs())
            .map(|(idx, _)| idx as u8)
            .unwrap_or(0)
    };
    let cube_r = to_cube_step(r);
    let cube_g = to_cube_step(g);
    let cube_b = to_cube_step(b);
    let cube_index = 16 + 36 * cube_r + 6 * cube_g + cube_b;
    const CUBE_STEPS: [u8; 6] = [0, 95, 135, 175, 215, 255];
    let cube_rgb = (CUBE_STEPS[cube_r as usize], CUBE_STEPS[cube_g as usize], CUBE_STEPS[cube_b as usize]);

    let gray_level = ((r as u32 + g as u32 + b as u32) / 3) as u8;
    let gray_step = ((gray_level as u32).saturating_sub(8) * 24 / 238).min(23) as u8;
    let gray_value = 8 + gray_step as u32 * 10;
    let gray_index = 232 + gray_step;

    if squared_distance((r, g, b), cube_rgb) <= squared_distance((r, g, b), (gray_value as u8, gray_value as u8, gray_value as u8)) {
        cube_index
    } else {
        gray_index
    }
}

/// Builds the SGR parameter bytes (without the leading `ESC[` or trailing `m`) for
/// one color, at the given `color_level`, in the given `ground` (38 for foreground,
/// 48 for background).
fn sgr_params(ground: u8, color_level: ColorLevel, r: u8, g: u8, b: u8, x: u32, y: u32, dither: bool) -> String {
    match color_level {
        ColorLevel::None => String::new(),
        ColorLevel::Ansi16 => {
            let idx = quantize_ansi16(r, g, b, x, y, dither);
            let base = if ground == 38 { 30 } else { 40 };
            let code = if idx < 8 { base + idx } else { base + 60 + (idx - 8) };
            code.to_string()
        }
        ColorLevel::Ansi256 => format!("{ground};5;{}", quantize_ansi256(r, g, b)),
        ColorLevel::TrueColor => format!("{ground};2;{r};{g};{b}"),
    }
}

/// Full SGR escape sequence for one cell, honoring `RenderMode`: `Foreground` colors
/// only the glyph, `Background` colors only the cell background, `HalfBlock` colors
/// both halves of a `\u{2580}` (upper half block) glyph via fg=upper, bg=lower.
pub fn sgr_for_cell(color_level: ColorLevel, render_mode: RenderMode, fg: (u8, u8, u8), bg: (u8, u8, u8), x: u32, y: u32, dither: bool) -> String {
    if color_level == ColorLevel::None {
        return String::new();
    }
    let fg_params = sgr_params(38, color_level, fg.0, fg.1, fg.2, x, y, dither);
    match render_mode {
        RenderMode::Foreground => format!("\u{1b}[{fg_params}m"),
        RenderMode::Background => {
            let bg_params = sgr_params(48, color_level, bg.0, bg.1, bg.2, x, y, dither);
            format!("\u{1b}[{bg_params}m")
        }
        RenderMode::HalfBlock => {
            let bg_params = sgr_params(48, color_level, bg.0, bg.1, bg.2, x, y, dither);
            format!("\u{1b}[{fg_params};{bg_params}m")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_colors_quantize_to_the_exact_ansi16_slot() {
        assert_eq!(quantize_ansi16(255, 0, 0, 0, 0, false), 9);
        assert_eq!(quantize_ansi16(0, 0, 0, 0, 0, false), 0);
    }

    #[test]
    fn ansi256_cube_corners_round_trip() {
        assert_eq!(quantize_ansi256(0, 0, 0), 16);
        assert_eq!(quantize_ansi256(255, 255, 255), 231);
    }

    #[test]
    fn none_color_level_emits_no_escape() {
        assert_eq!(sgr_for_cell(ColorLevel::None, RenderMode::Foreground, (1, 2, 3), (4, 5, 6), 0, 0, false), "");
    }

    #[test]
    fn truecolor_foreground_emits_38_2_rgb() {
        let sgr = sgr_for_cell(ColorLevel::TrueColor, RenderMode::Foreground, (10, 20, 30), (0, 0, 0), 0, 0, false);
        assert_eq!(sgr, "\u{1b}[38;2;10;20;30m");
    }

    #[test]
    fn half_block_mode_emits_both_foreground_and_background() {
        let sgr = sgr_for_cell(ColorLevel::TrueColor, RenderMode::HalfBlock, (10, 20, 30), (40, 50, 60), 0, 0, false);
        assert_eq!(sgr, "\u{1b}[38;2;10;20;30;48;2;40;50;60m");
    }

    #[test]
    fn dithering_perturbs_but_stays_within_one_palette_step() {
        let undithered = quantize_ansi16(130, 130, 130, 0, 0, false);
        let dithered = quantize_ansi16(130, 130, 130, 0, 0, true);
        // Dithering may or may not flip the nearest slot for this particular input,
        // but it must never panic and must stay a valid index.
        assert!(undithered < 16 && dithered < 16);
    }
}

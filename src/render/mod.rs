//! The ASCII rendering pipeline (SPEC_FULL.md §4.8): RGB canvas -> palette-indexed
//! glyph stream with per-cell SGR color codes and run-length-encoded repeats. No
//! teacher module renders ASCII art; this is grounded directly in SPEC_FULL.md's
//! algorithm description, built from primitives (`luminance`, `palette`, `color`)
//! each grounded separately.

pub mod canvas;
pub mod color;
pub mod luminance;
pub mod palette;

pub use canvas::Canvas;
pub use luminance::{dispatch, force_path_for_tests, luminance_row, luminance_scalar, luminance_simd, LuminancePath};
pub use palette::{InvalidPalette, Palette, PRESET_BLOCKS, PRESET_STANDARD};

use crate::session::{Capabilities, RenderMode};

const CURSOR_HOME: &[u8] = b"\x1b[H";
const RESET: &[u8] = b"\x1b[0m";

fn average_cell(canvas: &Canvas, x0: u32, y0: u32, w: u32, h: u32) -> (u8, u8, u8) {
    let (mut sr, mut sg, mut sb, mut count) = (0u64, 0u64, 0u64, 0u64);
    for y in y0..(y0 + h).min(canvas.height) {
        for x in x0..(x0 + w).min(canvas.width) {
            let (r, g, b) = canvas.pixel(x, y);
            sr += r as u64;
            sg += g as u64;
            sb += b as u64;
            count += 1;
        }
    }
    if count == 0 {
        return (0, 0, 0);
    }
    ((sr / count) as u8, (sg / count) as u8, (sb / count) as u8)
}

/// For `HalfBlock` render mode, averages the top half and bottom half of a cell
/// separately so the upper-half-block glyph can carry two independently colored
/// halves (SPEC_FULL.md §4.8 step 1).
fn average_half_cell(canvas: &Canvas, x0: u32, y0: u32, w: u32, h: u32) -> ((u8, u8, u8), (u8, u8, u8)) {
    let half_h = (h / 2).max(1);
    let upper = average_cell(canvas, x0, y0, w, half_h);
    let lower = average_cell(canvas, x0, y0 + half_h, w, h.saturating_sub(half_h).max(1));
    (upper, lower)
}

struct Run {
    sgr: String,
    glyph: String,
    count: u32,
}

/// A run only benefits from `REP` once it saves at least one byte over writing
/// the glyph out literally twice more: the `ESC [ n b` encoding costs at least
/// 4 bytes, so a 2-glyph run (one literal + one repeated) is never shorter.
const REP_MIN_RUN: u32 = 3;

fn flush_run(out: &mut Vec<u8>, run: &Run, supports_rep: bool) {
    out.extend_from_slice(run.sgr.as_bytes());
    out.extend_from_slice(run.glyph.as_bytes());
    if run.count == 1 {
        return;
    }
    if supports_rep && run.count >= REP_MIN_RUN {
        out.extend_from_slice(format!("\x1b[{}b", run.count - 1).as_bytes());
    } else {
        for _ in 1..run.count {
            out.extend_from_slice(run.glyph.as_bytes());
        }
    }
}

/// Renders one composited canvas into a byte stream for the given capabilities.
/// `caps.width`/`caps.height` are the terminal cell grid dimensions; the canvas is
/// divided into that many blocks. A zero-area canvas produces an empty, legal frame
/// (SPEC_FULL.md §4.8 edge cases); `palette` must already be non-empty, which
/// `Palette::new` guarantees by construction.
pub fn render(canvas: &Canvas, caps: &Capabilities, palette: &Palette) -> Vec<u8> {
    if canvas.is_empty() {
        return Vec::new();
    }
    let cols = caps.width.max(1) as u32;
    let rows = caps.height.max(1) as u32;
    let cell_w = (canvas.width / cols).max(1);
    let cell_h = (canvas.height / rows).max(1);
    let color_level = if caps.wants_color { caps.color_level } else { crate::session::ColorLevel::None };

    let mut out = Vec::with_capacity((cols * rows) as usize * 8);
    out.extend_from_slice(CURSOR_HOME);

    // Averaged colors are gathered for the whole row before any glyph lookup so
    // luminance can be computed through a single `luminance_row` dispatch call per
    // row (scalar or SIMD, SPEC_FULL.md §4.8/§9) instead of once per cell.
    let mut row_fg = Vec::with_capacity(cols as usize);
    let mut row_bg = Vec::with_capacity(cols as usize);
    let mut row_luminance_rgb = Vec::with_capacity(cols as usize);
    let mut row_luminance = Vec::with_capacity(cols as usize);

    for row in 0..rows {
        let y0 = row * cell_h;
        row_fg.clear();
        row_bg.clear();
        row_luminance_rgb.clear();
        for col in 0..cols {
            let x0 = col * cell_w;
            if caps.render_mode == RenderMode::HalfBlock {
                let (upper, lower) = average_half_cell(canvas, x0, y0, cell_w, cell_h);
                row_fg.push(upper);
                row_bg.push(lower);
                row_luminance_rgb.push(upper);
            } else {
                let rgb = average_cell(canvas, x0, y0, cell_w, cell_h);
                row_fg.push(rgb);
                row_bg.push(rgb);
                row_luminance_rgb.push(rgb);
            }
        }
        luminance_row(&row_luminance_rgb, &mut row_luminance);

        let mut current: Option<Run> = None;
        for col in 0..cols as usize {
            let (fg, bg) = (row_fg[col], row_bg[col]);
            let sgr = color::sgr_for_cell(color_level, caps.render_mode, fg, bg, col as u32, row, caps.dither);
            let glyph = if caps.render_mode == RenderMode::HalfBlock {
                "\u{2580}".to_string()
            } else {
                palette.glyph_for(row_luminance[col], caps.utf8_support).to_string()
            };

            match current.as_mut() {
                Some(run) if run.sgr == sgr && run.glyph == glyph => run.count += 1,
                _ => {
                    if let Some(run) = current.take() {
                        flush_run(&mut out, &run, caps.supports_rep);
                    }
                    current = Some(Run { sgr, glyph, count: 1 });
                }
            }
        }
        if let Some(run) = current.take() {
            flush_run(&mut out, &run, caps.supports_rep);
        }
        out.extend_from_slice(RESET);
        if row + 1 < rows {
            out.extend_from_slice(b"\r\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientCapabilitiesPayload;
    use crate::session::{FLAG_COLOR, FLAG_REP};

    fn caps(width: u16, height: u16, color_level: u32, render_mode: u32) -> Capabilities {
        caps_with_flags(width, height, color_level, render_mode, 0)
    }

    fn caps_with_flags(width: u16, height: u16, color_level: u32, render_mode: u32, extra_flags: u32) -> Capabilities {
        Capabilities::from_payload(&ClientCapabilitiesPayload {
            capabilities: (if color_level > 0 { FLAG_COLOR } else { 0 }) | extra_flags,
            color_level,
            color_count: 0,
            render_mode,
            width,
            height,
            palette_type: 0,
            utf8_support: 1,
            desired_fps: 30,
            term_type: String::new(),
            colorterm: String::new(),
            palette_custom: String::new(),
            wants_padding: false,
            detection_reliable: true,
        })
    }

    #[test]
    fn zero_area_canvas_renders_an_empty_frame() {
        let canvas = Canvas::new(0, 0);
        let palette = Palette::new(PRESET_STANDARD).unwrap();
        let out = render(&canvas, &caps(80, 24, 3, 0), &palette);
        assert!(out.is_empty());
    }

    #[test]
    fn single_cell_capabilities_emit_exactly_one_glyph_one_sgr_one_reset() {
        let canvas = Canvas::from_rgb(4, 4, vec![255; 4 * 4 * 3]);
        let palette = Palette::new(PRESET_STANDARD).unwrap();
        let out = render(&canvas, &caps(1, 1, 3, 0), &palette);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches('\u{1b}').count(), 3); // cursor-home + one SGR + reset
        assert!(text.ends_with("\u{1b}[0m"));
    }

    #[test]
    fn no_color_level_emits_glyphs_without_any_sgr_sequence() {
        let canvas = Canvas::from_rgb(2, 2, vec![128; 2 * 2 * 3]);
        let palette = Palette::new(PRESET_STANDARD).unwrap();
        let out = render(&canvas, &caps(2, 2, 0, 0), &palette);
        let text = String::from_utf8(out).unwrap();
        // Only the cursor-home and the two per-row resets should carry an escape.
        assert_eq!(text.matches('\u{1b}').count(), 3);
    }

    #[test]
    fn identical_adjacent_cells_collapse_into_a_single_run() {
        let canvas = Canvas::from_rgb(4, 1, vec![200; 4 * 1 * 3]);
        let palette = Palette::new("#").unwrap();
        let out = render(&canvas, &caps(4, 1, 0, 0), &palette);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches('#').count(), 4);
    }

    #[test]
    fn long_runs_use_rep_when_the_client_supports_it() {
        let canvas = Canvas::from_rgb(4, 1, vec![200; 4 * 1 * 3]);
        let palette = Palette::new("#").unwrap();
        let out = render(&canvas, &caps_with_flags(4, 1, 0, 0, FLAG_REP), &palette);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches('#').count(), 1);
        assert!(text.contains("\x1b[3b"));
    }

    #[test]
    fn short_runs_never_use_rep_even_when_supported() {
        let canvas = Canvas::from_rgb(2, 1, vec![200; 2 * 1 * 3]);
        let palette = Palette::new("#").unwrap();
        let out = render(&canvas, &caps_with_flags(2, 1, 0, 0, FLAG_REP), &palette);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches('#').count(), 2);
        assert!(!text.contains('b'));
    }

    #[test]
    fn scalar_and_simd_luminance_dispatch_render_byte_identical_frames() {
        let pixels: Vec<u8> = (0..(32 * 9 * 3)).map(|i| (i * 37) as u8).collect();
        let canvas = Canvas::from_rgb(32, 9, pixels);
        let palette = Palette::new(PRESET_STANDARD).unwrap();

        force_path_for_tests(Some(LuminancePath::Scalar));
        let scalar_out = render(&canvas, &caps(16, 3, 3, 0), &palette);

        force_path_for_tests(Some(LuminancePath::Simd));
        let simd_out = render(&canvas, &caps(16, 3, 3, 0), &palette);

        force_path_for_tests(None);
        assert_eq!(scalar_out, simd_out);
    }
}

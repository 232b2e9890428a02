//! Tile layout and canvas composition (SPEC_FULL.md §4.6 steps 3-5): pick a grid
//! that minimizes wasted cells while keeping each tile close to 16:9, then resize
//! each remote's frame into its tile by bilinear interpolation, letterboxing unless
//! the participant opted into stretch.

use std::sync::Arc;

use crate::media::Frame;
use crate::render::Canvas;

const TARGET_ASPECT: f64 = 16.0 / 9.0;
const ASPECT_TOLERANCE: f64 = 0.15;

/// Picks `(cols, rows)` for `remote_count` tiles within a `canvas_width x
/// canvas_height` destination, preferring the grid with the least wasted cells
/// among those whose tile aspect is within 15% of 16:9, falling back to the
/// least-waste grid overall if none qualifies.
pub fn choose_tile_grid(remote_count: usize, canvas_width: u32, canvas_height: u32) -> (u32, u32) {
    if remote_count == 0 {
        return (1, 1);
    }
    let n = remote_count as u32;
    let mut best_within_tolerance: Option<(u32, u32, u32)> = None; // (cols, rows, waste)
    let mut best_overall: Option<(u32, u32, u32)> = None;
    for cols in 1..=n {
        let rows = n.div_ceil(cols);
        let waste = cols * rows - n;
        let tile_w = canvas_width as f64 / cols as f64;
        let tile_h = canvas_height as f64 / rows as f64;
        let aspect = if tile_h > 0.0 { tile_w / tile_h } else { 0.0 };
        let deviation = (aspect - TARGET_ASPECT).abs() / TARGET_ASPECT;

        if best_overall.map(|(_, _, w)| waste < w).unwrap_or(true) {
            best_overall = Some((cols, rows, waste));
        }
        if deviation <= ASPECT_TOLERANCE && best_within_tolerance.map(|(_, _, w)| waste < w).unwrap_or(true) {
            best_within_tolerance = Some((cols, rows, waste));
        }
    }
    let (cols, rows, _) = best_within_tolerance.or(best_overall).unwrap();
    (cols, rows)
}

fn sample_bilinear(frame: &Frame, src_x: f32, src_y: f32) -> (u8, u8, u8) {
    let x0 = src_x.floor().max(0.0) as u32;
    let y0 = src_y.floor().max(0.0) as u32;
    let x1 = (x0 + 1).min(frame.width.saturating_sub(1));
    let y1 = (y0 + 1).min(frame.height.saturating_sub(1));
    let fx = src_x - x0 as f32;
    let fy = src_y - y0 as f32;

    let p00 = frame.pixel(x0, y0);
    let p10 = frame.pixel(x1, y0);
    let p01 = frame.pixel(x0, y1);
    let p11 = frame.pixel(x1, y1);

    let lerp = |a: u8, b: u8, t: f32| -> f32 { a as f32 * (1.0 - t) + b as f32 * t };
    let top = (lerp(p00.0, p10.0, fx), lerp(p00.1, p10.1, fx), lerp(p00.2, p10.2, fx));
    let bottom = (lerp(p01.0, p11.0, fx), lerp(p01.1, p11.1, fx), lerp(p01.2, p11.2, fx));
    (
        lerp(top.0 as u8, bottom.0 as u8, fy) as u8,
        lerp(top.1 as u8, bottom.1 as u8, fy) as u8,
        lerp(top.2 as u8, bottom.2 as u8, fy) as u8,
    )
}

/// Draws `frame` bilinearly resized into `canvas` at the rectangle
/// `(dst_x, dst_y, dst_w, dst_h)`. If `stretch` is false, the frame is letterboxed
/// to preserve its own aspect ratio, with the remaining border left untouched
/// (already-black background).
fn blit_tile(canvas: &mut Canvas, frame: &Frame, dst_x: u32, dst_y: u32, dst_w: u32, dst_h: u32, stretch: bool) {
    if frame.width == 0 || frame.height == 0 || dst_w == 0 || dst_h == 0 {
        return;
    }
    let (draw_w, draw_h, offset_x, offset_y) = if stretch {
        (dst_w, dst_h, 0u32, 0u32)
    } else {
        let scale = (dst_w as f64 / frame.width as f64).min(dst_h as f64 / frame.height as f64);
        let draw_w = ((frame.width as f64 * scale).round() as u32).max(1).min(dst_w);
        let draw_h = ((frame.height as f64 * scale).round() as u32).max(1).min(dst_h);
        ((draw_w, draw_h, (dst_w - draw_w) / 2, (dst_h - draw_h) / 2))
    };

    for y in 0..draw_h {
        for x in 0..draw_w {
            let src_x = (x as f32 + 0.5) / draw_w as f32 * frame.width as f32 - 0.5;
            let src_y = (y as f32 + 0.5) / draw_h as f32 * frame.height as f32 - 0.5;
            let rgb = sample_bilinear(frame, src_x.max(0.0), src_y.max(0.0));
            canvas.set_pixel(dst_x + offset_x + x, dst_y + offset_y + y, rgb);
        }
    }
}

/// Composes one destination canvas from a snapshot of each remote's current frame
/// (`None` for a remote with no video yet, drawn as a "no signal" placeholder tile).
pub fn compose(canvas_width: u32, canvas_height: u32, tiles: &[Option<Arc<Frame>>], stretch: bool) -> Canvas {
    let mut canvas = Canvas::new(canvas_width, canvas_height);
    if tiles.is_empty() {
        return canvas;
    }
    let (cols, rows) = choose_tile_grid(tiles.len(), canvas_width, canvas_height);
    let tile_w = canvas_width / cols.max(1);
    let tile_h = canvas_height / rows.max(1);

    for (index, tile) in tiles.iter().enumerate() {
        let col = index as u32 % cols;
        let row = index as u32 / cols;
        let dst_x = col * tile_w;
        let dst_y = row * tile_h;
        let placeholder;
        let frame: &Frame = match tile {
            Some(frame) => frame,
            None => {
                placeholder = Frame::no_signal(tile_w.max(1), tile_h.max(1));
                &placeholder
            }
        };
        blit_tile(&mut canvas, frame, dst_x, dst_y, tile_w, tile_h, stretch);
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_single_remote_gets_a_one_by_one_grid() {
        assert_eq!(choose_tile_grid(1, 1920, 1080), (1, 1));
    }

    #[test]
    fn four_remotes_prefer_a_square_ish_grid() {
        let (cols, rows) = choose_tile_grid(4, 1920, 1080);
        assert_eq!(cols * rows, 4);
    }

    #[test]
    fn zero_remotes_still_returns_a_valid_grid() {
        assert_eq!(choose_tile_grid(0, 1920, 1080), (1, 1));
    }

    #[test]
    fn compose_with_no_tiles_returns_a_blank_canvas_of_the_requested_size() {
        let canvas = compose(64, 32, &[], true);
        assert_eq!((canvas.width, canvas.height), (64, 32));
    }

    #[test]
    fn compose_draws_a_single_solid_frame_into_the_full_canvas_when_stretched() {
        let frame = Arc::new(Frame::new(2, 2, vec![10, 20, 30, 10, 20, 30, 10, 20, 30, 10, 20, 30], 0));
        let canvas = compose(8, 8, &[Some(frame)], true);
        assert_eq!(canvas.pixel(0, 0), (10, 20, 30));
        assert_eq!(canvas.pixel(7, 7), (10, 20, 30));
    }
}

//! ITU-R BT.601 luminance (SPEC_FULL.md §4.8 step 2): integer weights only, no
//! floating point in the hot path. Weights are the standard fixed-point
//! approximation of 0.299/0.587/0.114 scaled to a 256 denominator.
//!
//! Dispatch between the scalar and SIMD paths (SPEC_FULL.md §9) is decided once
//! per process and cached in a `OnceCell`, rather than re-checked per frame.

use std::sync::atomic::{AtomicU8, Ordering};

use once_cell::sync::OnceCell;

const WEIGHT_R: u32 = 77;
const WEIGHT_G: u32 = 150;
const WEIGHT_B: u32 = 29;

#[inline]
pub fn luminance_scalar(r: u8, g: u8, b: u8) -> u8 {
    ((WEIGHT_R * r as u32 + WEIGHT_G * g as u32 + WEIGHT_B * b as u32) >> 8) as u8
}

/// Same computation, eight pixels at a time via `wide::u32x8`. Must produce results
/// byte-identical to `luminance_scalar` for every input (SPEC_FULL.md §8).
pub fn luminance_simd(pixels: &[(u8, u8, u8)], out: &mut Vec<u8>) {
    use wide::u32x8;
    out.clear();
    out.reserve(pixels.len());
    let mut chunks = pixels.chunks_exact(8);
    for chunk in &mut chunks {
        let r = u32x8::new(std::array::from_fn(|i| chunk[i].0 as u32));
        let g = u32x8::new(std::array::from_fn(|i| chunk[i].1 as u32));
        let b = u32x8::new(std::array::from_fn(|i| chunk[i].2 as u32));
        let lum = (r * u32x8::splat(WEIGHT_R) + g * u32x8::splat(WEIGHT_G) + b * u32x8::splat(WEIGHT_B)) >> 8;
        let lanes: [u32; 8] = lum.into();
        out.extend(lanes.iter().map(|&l| l as u8));
    }
    for &(r, g, b) in chunks.remainder() {
        out.push(luminance_scalar(r, g, b));
    }
}

/// Which luminance implementation `dispatch()` has selected for this process.
/// The only two members here are "scalar" and "the `wide` portable-SIMD path";
/// the spec's SSE2/SSSE3/AVX2/NEON/SVE split is `wide`'s concern at compile time,
/// not something this crate re-derives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuminancePath {
    Scalar,
    Simd,
}

static FORCED_PATH: AtomicU8 = AtomicU8::new(0);
static DISPATCH: OnceCell<LuminancePath> = OnceCell::new();

fn detect_path() -> LuminancePath {
    #[cfg(target_arch = "x86_64")]
    {
        if std::is_x86_feature_detected!("sse2") {
            return LuminancePath::Simd;
        }
        return LuminancePath::Scalar;
    }
    #[cfg(target_arch = "aarch64")]
    {
        return LuminancePath::Simd;
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        LuminancePath::Scalar
    }
}

/// Returns the cached dispatch decision, computing and caching it on first call.
/// A test-forced path (via [`force_path_for_tests`]) always takes precedence.
pub fn dispatch() -> LuminancePath {
    match FORCED_PATH.load(Ordering::Relaxed) {
        1 => LuminancePath::Scalar,
        2 => LuminancePath::Simd,
        _ => *DISPATCH.get_or_init(detect_path),
    }
}

/// Test-only hook (SPEC_FULL.md §9): force `dispatch()` to return a specific path
/// regardless of runtime feature detection, so both paths can be exercised for
/// byte-identical output on any machine. Pass `None` to clear the override.
#[doc(hidden)]
pub fn force_path_for_tests(path: Option<LuminancePath>) {
    FORCED_PATH.store(
        match path {
            None => 0,
            Some(LuminancePath::Scalar) => 1,
            Some(LuminancePath::Simd) => 2,
        },
        Ordering::Relaxed,
    );
}

/// Computes luminance for a whole row of cells through whichever path
/// `dispatch()` selects, writing results into `out` (cleared first).
pub fn luminance_row(pixels: &[(u8, u8, u8)], out: &mut Vec<u8>) {
    match dispatch() {
        LuminancePath::Simd => luminance_simd(pixels, out),
        LuminancePath::Scalar => {
            out.clear();
            out.extend(pixels.iter().map(|&(r, g, b)| luminance_scalar(r, g, b)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_matches_known_values() {
        assert_eq!(luminance_scalar(255, 255, 255), 255);
        assert_eq!(luminance_scalar(0, 0, 0), 0);
    }

    #[test]
    fn simd_matches_scalar_for_arbitrary_input() {
        let pixels: Vec<(u8, u8, u8)> = (0..37u32).map(|i| ((i * 7) as u8, (i * 13) as u8, (i * 3) as u8)).collect();
        let mut simd_out = Vec::new();
        luminance_simd(&pixels, &mut simd_out);
        let scalar_out: Vec<u8> = pixels.iter().map(|&(r, g, b)| luminance_scalar(r, g, b)).collect();
        assert_eq!(simd_out, scalar_out);
    }

    #[test]
    fn luminance_row_is_byte_identical_whichever_path_is_forced() {
        let pixels: Vec<(u8, u8, u8)> = (0..19u32).map(|i| ((i * 11) as u8, (i * 5) as u8, (i * 17) as u8)).collect();

        force_path_for_tests(Some(LuminancePath::Scalar));
        assert_eq!(dispatch(), LuminancePath::Scalar);
        let mut scalar_out = Vec::new();
        luminance_row(&pixels, &mut scalar_out);

        force_path_for_tests(Some(LuminancePath::Simd));
        assert_eq!(dispatch(), LuminancePath::Simd);
        let mut simd_out = Vec::new();
        luminance_row(&pixels, &mut simd_out);

        force_path_for_tests(None);
        assert_eq!(scalar_out, simd_out);
    }
}

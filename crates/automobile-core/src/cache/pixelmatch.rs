//! Per-pixel difference measurement used to confirm what the perceptual
//! hash suggests (§4.6 step 3, GLOSSARY). A hand-rolled equivalent of the JS
//! `pixelmatch` library the design spec names; no direct Rust port exists in
//! the retrieval pack, so this is implemented directly against the `image`
//! crate's pixel buffers.

use image::{DynamicImage, GenericImageView};

/// Fraction of pixels, out of the total, whose per-channel difference
/// exceeds `threshold` (0.0–1.0, applied against the 0–255 channel range).
/// Returns `1.0` (no match at all) when image dimensions differ.
pub fn diff_ratio(a: &DynamicImage, b: &DynamicImage, threshold: f64) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 1.0;
    }
    let (width, height) = a.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let a = a.to_rgba8();
    let b = b.to_rgba8();
    let channel_threshold = (threshold * 255.0) as i32;

    let mut mismatched = 0u64;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let delta = pa
            .0
            .iter()
            .zip(pb.0.iter())
            .map(|(&x, &y)| (x as i32 - y as i32).abs())
            .max()
            .unwrap_or(0);
        if delta > channel_threshold {
            mismatched += 1;
        }
    }
    mismatched as f64 / (width as u64 * height as u64) as f64
}

/// Similarity as `1.0 - diff_ratio`, matching the convention the observation
/// cache compares against a `>= 99.8%` threshold (§4.6 step 3).
pub fn similarity(a: &DynamicImage, b: &DynamicImage, threshold: f64) -> f64 {
    1.0 - diff_ratio(a, b, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn identical_images_are_fully_similar() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 255])));
        assert_eq!(similarity(&image, &image, 0.1), 1.0);
    }

    #[test]
    fn differing_dimensions_are_never_similar() {
        let a = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255])));
        let b = DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255])));
        assert_eq!(similarity(&a, &b, 0.1), 0.0);
    }

    #[test]
    fn a_few_changed_pixels_drop_similarity_below_threshold() {
        let mut buf = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        buf.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        let a = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255])));
        let b = DynamicImage::ImageRgba8(buf);
        let sim = similarity(&a, &b, 0.1);
        assert!(sim < 1.0 && sim > 0.9);
    }
}

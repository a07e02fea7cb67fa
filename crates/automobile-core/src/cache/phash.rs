//! Perceptual hashing (§4.6 step 1, GLOSSARY).

use image::{imageops::FilterType, DynamicImage, GenericImageView};

/// A 64-bit perceptual hash of an image, robust to minor rescaling and
/// colour shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Resizes to 8×8 grayscale, computes the mean pixel value, and sets bit
    /// _i_ when pixel _i_ exceeds the mean (§4.6 step 1).
    pub fn compute(image: &DynamicImage) -> Self {
        let small = image.resize_exact(8, 8, FilterType::Triangle).to_luma8();
        let pixels: Vec<u8> = small.pixels().map(|p| p.0[0]).collect();
        let mean = pixels.iter().map(|&p| p as u32).sum::<u32>() as f64 / pixels.len() as f64;

        let mut bits: u64 = 0;
        for (i, &pixel) in pixels.iter().enumerate() {
            if (pixel as f64) > mean {
                bits |= 1 << i;
            }
        }
        Self(bits)
    }

    /// Hamming-distance-derived similarity, normalised to a `[0.0, 1.0]` ratio.
    pub fn similarity(&self, other: &PerceptualHash) -> f64 {
        let distance = (self.0 ^ other.0).count_ones();
        1.0 - (distance as f64 / 64.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn solid_image(value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([value, value, value, 255])))
    }

    #[test]
    fn identical_images_have_full_similarity() {
        let image = solid_image(128);
        let h1 = PerceptualHash::compute(&image);
        let h2 = PerceptualHash::compute(&image);
        assert_eq!(h1.similarity(&h2), 1.0);
    }

    #[test]
    fn solid_black_and_white_hash_all_bits_equal() {
        // A solid-colour image has every pixel equal to the mean, so no bit
        // is strictly greater than the mean: the hash is all zero bits.
        let black = PerceptualHash::compute(&solid_image(0));
        assert_eq!(black.0, 0);
    }

    #[test]
    fn distinct_images_reduce_similarity() {
        let mut half = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 255]));
        for y in 0..8 {
            for x in 0..16 {
                half.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let a = PerceptualHash::compute(&solid_image(0));
        let b = PerceptualHash::compute(&DynamicImage::ImageRgba8(half));
        assert!(a.similarity(&b) < 1.0);
    }
}

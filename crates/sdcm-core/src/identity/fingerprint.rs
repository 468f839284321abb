//! Perceptual fingerprints for thumbnail images.
//!
//! A difference hash: the image is reduced to a 9x8 grayscale grid and each
//! bit records whether a pixel is brighter than its right neighbour. Visually
//! similar images produce fingerprints with a small Hamming distance.

use crate::error::{Result, SdcmError};
use image::imageops::FilterType;
use std::path::Path;

const GRID_WIDTH: u32 = 9;
const GRID_HEIGHT: u32 = 8;

/// Fingerprint an image file as 16 lowercase hex digits.
pub fn fingerprint_image(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| SdcmError::io_with_path(e, path))?;
    let img = image::load_from_memory(&bytes).map_err(|e| SdcmError::Image {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let grid = img
        .resize_exact(GRID_WIDTH, GRID_HEIGHT, FilterType::Triangle)
        .to_luma8();

    let mut bits: u64 = 0;
    for y in 0..GRID_HEIGHT {
        for x in 0..GRID_WIDTH - 1 {
            let left = grid.get_pixel(x, y)[0];
            let right = grid.get_pixel(x + 1, y)[0];
            bits = (bits << 1) | u64::from(left > right);
        }
    }
    Ok(format!("{:016x}", bits))
}

/// Fingerprint an image on the blocking thread pool.
pub async fn fingerprint_image_async(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_image(&path)).await?
}

/// Number of differing bits between two fingerprints, if both parse.
pub fn distance(a: &str, b: &str) -> Option<u32> {
    let a = u64::from_str_radix(a, 16).ok()?;
    let b = u64::from_str_radix(b, 16).ok()?;
    Some((a ^ b).count_ones())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32, reversed: bool) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
        ImageBuffer::from_fn(width, height, |x, _| {
            let v = (x * 255 / (width - 1)) as u8;
            let v = if reversed { 255 - v } else { v };
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_scaled_copies_match() {
        let temp = TempDir::new().unwrap();
        let small = temp.path().join("small.png");
        let large = temp.path().join("large.png");
        gradient(64, 64, false).save(&small).unwrap();
        gradient(256, 256, false).save(&large).unwrap();

        let a = fingerprint_image(&small).unwrap();
        let b = fingerprint_image(&large).unwrap();
        assert_eq!(a.len(), 16);
        assert!(distance(&a, &b).unwrap() <= 4);
    }

    #[test]
    fn test_mirrored_image_differs() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.png");
        let b = temp.path().join("b.png");
        gradient(64, 64, false).save(&a).unwrap();
        gradient(64, 64, true).save(&b).unwrap();

        let fa = fingerprint_image(&a).unwrap();
        let fb = fingerprint_image(&b).unwrap();
        assert!(distance(&fa, &fb).unwrap() > 32);
    }

    #[test]
    fn test_not_an_image() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.preview.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(matches!(
            fingerprint_image(&path),
            Err(SdcmError::Image { .. })
        ));
    }
}

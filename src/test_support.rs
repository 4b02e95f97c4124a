//! Shared fixtures for unit tests

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Noise image encoded as PNG
pub fn sample_png(seed: u64, width: u32, height: u32) -> Vec<u8> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut pixels = vec![0u8; (width * height * 3) as usize];
    rng.fill_bytes(&mut pixels);

    let img = RgbImage::from_raw(width, height, pixels).unwrap();
    encode_png(&img)
}

/// Same PNG with one pixel inverted
pub fn flip_pixel(png: &[u8], x: u32, y: u32) -> Vec<u8> {
    let mut img = image::load_from_memory(png).unwrap().into_rgb8();
    let Rgb([r, g, b]) = *img.get_pixel(x, y);
    img.put_pixel(x, y, Rgb([255 - r, 255 - g, 255 - b]));
    encode_png(&img)
}

pub fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}

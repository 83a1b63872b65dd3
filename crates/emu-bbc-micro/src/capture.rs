//! Headless capture: PNG screenshots.

#![allow(clippy::cast_possible_truncation)]

use std::error::Error;
use std::fs;
use std::io::BufWriter;
use std::path::Path;

use emu_core::Frame;

use crate::Bbc;

/// Save the latest completed frame as a PNG file.
pub fn save_screenshot(bbc: &Bbc, path: &Path) -> Result<(), Box<dyn Error>> {
    save_frame(&bbc.framebuffer(), path)
}

/// Save a frame as a PNG file.
///
/// Frames hold `0x00RRGGBB` pixels. These are converted to opaque RGBA
/// bytes for the encoder.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<(), Box<dyn Error>> {
    let file = fs::File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&to_rgba(&frame.pixels))?;
    Ok(())
}

fn to_rgba(pixels: &[u32]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(pixels.len() * 4);
    for &pixel in pixels {
        rgba.push((pixel >> 16) as u8);
        rgba.push((pixel >> 8) as u8);
        rgba.push(pixel as u8);
        rgba.push(0xFF);
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixels_become_opaque_rgba() {
        assert_eq!(
            to_rgba(&[0x00FF_8001, 0]),
            vec![0xFF, 0x80, 0x01, 0xFF, 0, 0, 0, 0xFF]
        );
    }

    #[test]
    fn frame_is_written_as_png() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shot.png");
        let mut frame = Frame::blank(4, 2);
        frame.pixels[0] = 0x00FF_FFFF;
        save_frame(&frame, &path).expect("save");

        let bytes = fs::read(&path).expect("read back");
        assert_eq!(&bytes[1..4], b"PNG");
    }
}

//! Camera frame normalization.
//!
//! Camera pipelines hand over frames in whatever layout the sensor produced,
//! together with the rotation needed to bring them upright for display.
//! Detection always runs on upright RGB images, so every live frame passes
//! through [`CameraFrame::into_upright_rgb`] before it reaches a backend.
//!
//! Rotation changes the frame geometry: a 640x480 sensor frame rotated by 90
//! degrees is detected as 480x640. Overlay code must use the dimensions that
//! come back with the results, not the ones the camera was asked for.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};

/// Pixel layouts accepted from camera pipelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
    Rgb24,
    Nv12,
}

impl PixelFormat {
    fn expected_len(self, width: u32, height: u32) -> Result<usize> {
        let plane = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let len = match self {
            PixelFormat::Rgba8888 => plane.checked_mul(4),
            PixelFormat::Rgb24 => plane.checked_mul(3),
            PixelFormat::Nv12 => plane.checked_add(plane / 2),
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

/// One frame as delivered by a camera analyzer.
#[derive(Clone, Debug)]
pub struct CameraFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Clockwise rotation that makes the frame upright.
    pub rotation_degrees: u32,
}

impl CameraFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
            rotation_degrees: 0,
        }
    }

    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = degrees;
        self
    }

    /// Convert to RGB without applying rotation.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let expected = self.format.expected_len(self.width, self.height)?;
        if self.pixels.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                self.format,
                expected,
                self.pixels.len()
            ));
        }

        let rgb = match self.format {
            PixelFormat::Rgb24 => self.pixels.clone(),
            PixelFormat::Rgba8888 => self
                .pixels
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            PixelFormat::Nv12 => nv12_to_rgb(&self.pixels, self.width, self.height),
        };

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("converted buffer does not fit {}x{}", self.width, self.height))
    }

    /// Convert to RGB and rotate upright.
    pub fn into_upright_rgb(self) -> Result<RgbImage> {
        let rgb = self.to_rgb_image()?;
        rotate_image(rgb, self.rotation_degrees)
    }
}

/// Rotate clockwise by a multiple of 90 degrees.
pub fn rotate_image(image: RgbImage, degrees: u32) -> Result<RgbImage> {
    match degrees % 360 {
        0 => Ok(image),
        90 => Ok(imageops::rotate90(&image)),
        180 => Ok(imageops::rotate180(&image)),
        270 => Ok(imageops::rotate270(&image)),
        other => Err(anyhow!("unsupported rotation of {} degrees", other)),
    }
}

// Caller has already validated the buffer length.
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

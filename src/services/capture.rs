use anyhow::{anyhow, bail, Context, Result};
use image::{imageops, imageops::FilterType, DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::{io::Cursor, process::Command};

use super::CaptureService;
use crate::config::CaptureSource;

const BACKGROUND: Rgba<u8> = Rgba([30, 30, 30, 255]);

/// One encoded image plus how it should be laid out.
#[derive(Debug, Clone)]
pub struct Frame {
    pub label: String,
    pub png: Vec<u8>,
    pub scale: f32,
}

/// Captures every configured source by running its command and stitches the
/// frames into a single PNG.
pub struct CommandCapture {
    sources: Vec<CaptureSource>,
}

impl CommandCapture {
    pub fn new(sources: Vec<CaptureSource>) -> Self {
        Self { sources }
    }

    fn run_source(source: &CaptureSource) -> Result<Vec<u8>> {
        let (program, args) = source
            .command
            .split_first()
            .ok_or_else(|| anyhow!("capture source '{}' has no command", source.label))?;

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to run {program} for '{}'", source.label))?;

        if !output.status.success() {
            bail!(
                "'{}' capture exited with {}: {}",
                source.label,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if output.stdout.is_empty() {
            bail!("'{}' capture produced no image data", source.label);
        }
        Ok(output.stdout)
    }
}

impl CaptureService for CommandCapture {
    fn capture_stitched(&self) -> Result<Vec<u8>> {
        let mut frames = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match Self::run_source(source) {
                Ok(png) => frames.push(Frame {
                    label: source.label.clone(),
                    png,
                    scale: source.scale,
                }),
                Err(err) if source.optional => {
                    log::warn!("{err:#}");
                }
                Err(err) => return Err(err),
            }
        }

        stitch_frames(&frames)
    }
}

/// Stacks frames vertically, left-aligned, and encodes the result as PNG.
pub fn stitch_frames(frames: &[Frame]) -> Result<Vec<u8>> {
    if frames.is_empty() {
        bail!("no images captured");
    }

    if let [only] = frames {
        if only.scale == 1.0 {
            return Ok(only.png.clone());
        }
    }

    let mut images = Vec::with_capacity(frames.len());
    for frame in frames {
        let decoded = image::load_from_memory(&frame.png)
            .with_context(|| format!("failed to decode '{}' frame", frame.label))?;
        images.push(scale_image(decoded, frame.scale));
    }

    let width = images.iter().map(|img| img.width()).max().unwrap_or(0);
    let height = images.iter().map(|img| img.height()).sum::<u32>();
    if width == 0 || height == 0 {
        bail!("captured frames are empty");
    }

    let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);
    let mut y_offset: i64 = 0;
    for img in &images {
        imageops::overlay(&mut canvas, &img.to_rgba8(), 0, y_offset);
        y_offset += i64::from(img.height());
    }

    let mut encoded = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .context("failed to encode stitched image")?;
    Ok(encoded)
}

fn scale_image(img: DynamicImage, scale: f32) -> DynamicImage {
    if scale <= 0.0 || (scale - 1.0).abs() < f32::EPSILON {
        return img;
    }
    let width = ((img.width() as f32) * scale).round().max(1.0) as u32;
    let height = ((img.height() as f32) * scale).round().max(1.0) as u32;
    img.resize_exact(width, height, FilterType::Lanczos3)
}

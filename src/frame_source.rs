use image::{Rgb, RgbImage};
use log::info;
use std::path::{Path, PathBuf};

/// A live video feed of known size, sampled by the frame pipeline.
pub trait FrameSource {
    /// Current frame size, `None` (or a zero side) when nothing is available.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Copy the current frame into `dst`, which is already sized to
    /// [`FrameSource::dimensions`]. Returns false if no frame was produced.
    fn copy_into(&mut self, dst: &mut RgbImage) -> bool;
}

/// Which source to open, parsed from the command line.
///
/// `synthetic`, `synthetic:WxH`, `image:<path>` or `none` (no device).
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    Synthetic { width: u32, height: u32 },
    StillImage(PathBuf),
    None,
}

impl SourceSpec {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw == "none" {
            return Ok(SourceSpec::None);
        }
        if raw == "synthetic" {
            return Ok(SourceSpec::Synthetic {
                width: 640,
                height: 480,
            });
        }
        if let Some(size) = raw.strip_prefix("synthetic:") {
            let (w, h) = size
                .split_once('x')
                .ok_or_else(|| format!("expected WxH, got {}", size))?;
            let width = w.parse().map_err(|_| format!("bad width {}", w))?;
            let height = h.parse().map_err(|_| format!("bad height {}", h))?;
            return Ok(SourceSpec::Synthetic { width, height });
        }
        if let Some(path) = raw.strip_prefix("image:") {
            return Ok(SourceSpec::StillImage(PathBuf::from(path)));
        }
        Err(format!("unknown source {:?}", raw))
    }

    /// Acquire the source. `Err` means the device is unavailable.
    pub fn open(&self) -> Result<Box<dyn FrameSource + Send>, String> {
        match self {
            SourceSpec::Synthetic { width, height } => {
                if *width == 0 || *height == 0 {
                    return Err("synthetic source has zero size".into());
                }
                Ok(Box::new(SyntheticSource::new(*width, *height)))
            }
            SourceSpec::StillImage(path) => Ok(Box::new(StillImageSource::open(path)?)),
            SourceSpec::None => Err("no video device available".into()),
        }
    }
}

// ─── Synthetic test pattern ─────────────────────────────────────────────────

/// Gradient background with a square bouncing across it. Stands in for a
/// webcam when no hardware is attached.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    tick: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn copy_into(&mut self, dst: &mut RgbImage) -> bool {
        self.tick += 1;
        let side = (self.width.min(self.height) / 4).max(1);
        let span_x = self.width.saturating_sub(side).max(1) as u64;
        let span_y = self.height.saturating_sub(side).max(1) as u64;
        let sq_x = bounce(self.tick * 7, span_x) as u32;
        let sq_y = bounce(self.tick * 5, span_y) as u32;

        for (x, y, px) in dst.enumerate_pixels_mut() {
            let inside = x >= sq_x && x < sq_x + side && y >= sq_y && y < sq_y + side;
            *px = if inside {
                Rgb([240, 200, 40])
            } else {
                let r = (x * 255 / self.width.max(1)) as u8;
                let b = (y * 255 / self.height.max(1)) as u8;
                Rgb([r / 3, 40, b / 2])
            };
        }
        true
    }
}

fn bounce(step: u64, span: u64) -> u64 {
    let period = span * 2;
    let p = step % period;
    if p < span {
        p
    } else {
        period - p
    }
}

// ─── Still image ────────────────────────────────────────────────────────────

/// Replays one decoded image file as every frame.
pub struct StillImageSource {
    image: RgbImage,
}

impl StillImageSource {
    pub fn open(path: &Path) -> Result<Self, String> {
        let image = image::open(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?
            .to_rgb8();
        info!(
            "Still image source: {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }
}

impl FrameSource for StillImageSource {
    fn dimensions(&self) -> Option<(u32, u32)> {
        Some(self.image.dimensions())
    }

    fn copy_into(&mut self, dst: &mut RgbImage) -> bool {
        if dst.dimensions() != self.image.dimensions() {
            return false;
        }
        dst.copy_from_slice(self.image.as_raw());
        true
    }
}

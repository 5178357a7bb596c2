//! Detection overlay: display-space drawing commands, click hit-testing and
//! a raster surface that executes the commands.

use crate::types::{DetectionBatch, DetectionBox, DisplaySize, Point, TrackId};
use image::{Rgb, RgbImage};
use std::time::Duration;

pub const BASE_COLOR: [u8; 3] = [56, 189, 248];
pub const ACCENT_COLOR: [u8; 3] = [250, 204, 21];
const OUTLINE_PX: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxStyle {
    Base,
    Accent,
}

impl BoxStyle {
    pub fn color(self) -> [u8; 3] {
        match self {
            BoxStyle::Base => BASE_COLOR,
            BoxStyle::Accent => ACCENT_COLOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    /// Wipe the whole surface. Always the first command of a redraw.
    Clear { width: f64, height: f64 },
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        style: BoxStyle,
        label: String,
        track_id: TrackId,
    },
}

// ─── Rendering ──────────────────────────────────────────────────────────────

/// Drawing commands for the current batch in display space. X and Y are
/// scaled independently; a batch with an empty frame size draws nothing.
pub fn render_commands<F>(
    batch: Option<&DetectionBatch>,
    display: DisplaySize,
    label: F,
    selected: Option<TrackId>,
) -> Vec<DrawCommand>
where
    F: Fn(TrackId) -> String,
{
    let mut commands = vec![DrawCommand::Clear {
        width: display.width,
        height: display.height,
    }];
    let Some(batch) = batch else {
        return commands;
    };
    if batch.frame_size.is_empty() {
        return commands;
    }

    let sx = display.width / batch.frame_size.width;
    let sy = display.height / batch.frame_size.height;
    commands.extend(batch.boxes.iter().map(|b| DrawCommand::Rect {
        x: b.x1 * sx,
        y: b.y1 * sy,
        width: (b.x2 - b.x1) * sx,
        height: (b.y2 - b.y1) * sy,
        style: if selected == Some(b.track_id) {
            BoxStyle::Accent
        } else {
            BoxStyle::Base
        },
        label: label(b.track_id),
        track_id: b.track_id,
    }));
    commands
}

// ─── Hit testing ────────────────────────────────────────────────────────────

/// Track under a click, or `None` for a miss. Among overlapping boxes the
/// most confident wins; on equal confidence the first in the batch wins.
pub fn hit_test(point: Point, batch: Option<&DetectionBatch>, display: DisplaySize) -> Option<TrackId> {
    let batch = batch?;
    if batch.frame_size.is_empty() || !(display.width > 0.0 && display.height > 0.0) {
        return None;
    }
    let x = point.x * batch.frame_size.width / display.width;
    let y = point.y * batch.frame_size.height / display.height;

    batch
        .boxes
        .iter()
        .filter(|b| b.contains(x, y))
        .fold(None, |best: Option<&DetectionBox>, b| match best {
            Some(cur) if cur.conf >= b.conf => Some(cur),
            _ => Some(b),
        })
        .map(|b| b.track_id)
}

// ─── Redraw instrumentation ─────────────────────────────────────────────────

/// Timing of one redraw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedrawStats {
    pub render_ms: f64,
    /// Instantaneous overlay rate; `None` on the first redraw.
    pub fps: Option<f64>,
}

/// Remembers when the previous redraw happened.
#[derive(Debug, Default)]
pub struct OverlayClock {
    last_redraw_ms: Option<u64>,
}

impl OverlayClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration, now_ms: u64) -> RedrawStats {
        let fps = self.last_redraw_ms.map(|prev| {
            let dt = now_ms.saturating_sub(prev).max(1);
            1000.0 / dt as f64
        });
        self.last_redraw_ms = Some(now_ms);
        RedrawStats {
            render_ms: elapsed.as_secs_f64() * 1000.0,
            fps,
        }
    }
}

// ─── Surfaces ───────────────────────────────────────────────────────────────

pub trait Surface {
    fn apply(&mut self, commands: &[DrawCommand]);
}

/// Overlay drawn into an RGB image.
pub struct RasterSurface {
    image: RgbImage,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    fn outline(&mut self, x: f64, y: f64, w: f64, h: f64, color: [u8; 3]) {
        let (iw, ih) = (self.image.width() as i64, self.image.height() as i64);
        if iw == 0 || ih == 0 {
            return;
        }
        let x_min = (x.floor() as i64).clamp(0, iw - 1);
        let y_min = (y.floor() as i64).clamp(0, ih - 1);
        let x_max = ((x + w).ceil() as i64).clamp(0, iw - 1);
        let y_max = ((y + h).ceil() as i64).clamp(0, ih - 1);
        if x_min >= x_max || y_min >= y_max {
            return;
        }

        for t in 0..OUTLINE_PX as i64 {
            let (top, bottom) = ((y_min + t).min(y_max), (y_max - t).max(y_min));
            let (left, right) = ((x_min + t).min(x_max), (x_max - t).max(x_min));
            for px in x_min..=x_max {
                self.image.put_pixel(px as u32, top as u32, Rgb(color));
                self.image.put_pixel(px as u32, bottom as u32, Rgb(color));
            }
            for py in y_min..=y_max {
                self.image.put_pixel(left as u32, py as u32, Rgb(color));
                self.image.put_pixel(right as u32, py as u32, Rgb(color));
            }
        }
    }
}

impl Surface for RasterSurface {
    fn apply(&mut self, commands: &[DrawCommand]) {
        for cmd in commands {
            match cmd {
                DrawCommand::Clear { width, height } => {
                    let (w, h) = (width.max(0.0) as u32, height.max(0.0) as u32);
                    if self.image.dimensions() != (w, h) {
                        self.image = RgbImage::new(w, h);
                    } else {
                        self.image.fill(0);
                    }
                }
                DrawCommand::Rect {
                    x,
                    y,
                    width,
                    height,
                    style,
                    ..
                } => self.outline(*x, *y, *width, *height, style.color()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameSize;

    fn det(x1: f64, y1: f64, x2: f64, y2: f64, conf: f64, track_id: TrackId) -> DetectionBox {
        DetectionBox {
            x1,
            y1,
            x2,
            y2,
            conf,
            cls: 0.0,
            track_id,
        }
    }

    fn batch(boxes: Vec<DetectionBox>) -> DetectionBatch {
        DetectionBatch {
            boxes,
            frame_size: FrameSize {
                width: 100.0,
                height: 100.0,
            },
        }
    }

    fn hash_label(id: TrackId) -> String {
        format!("#{}", id)
    }

    #[test]
    fn test_scales_box_into_display() {
        let b = batch(vec![det(0.0, 0.0, 10.0, 10.0, 0.9, 1)]);
        let cmds = render_commands(Some(&b), DisplaySize::new(200.0, 200.0), hash_label, None);
        assert_eq!(
            cmds[0],
            DrawCommand::Clear {
                width: 200.0,
                height: 200.0
            }
        );
        assert_eq!(
            cmds[1],
            DrawCommand::Rect {
                x: 0.0,
                y: 0.0,
                width: 20.0,
                height: 20.0,
                style: BoxStyle::Base,
                label: "#1".into(),
                track_id: 1,
            }
        );
    }

    #[test]
    fn test_independent_axis_scaling_and_accent() {
        let b = batch(vec![det(10.0, 10.0, 20.0, 30.0, 0.5, 3)]);
        let cmds = render_commands(Some(&b), DisplaySize::new(400.0, 50.0), |_| "Bob".into(), Some(3));
        let DrawCommand::Rect {
            x,
            y,
            width,
            height,
            style,
            label,
            ..
        } = &cmds[1]
        else {
            panic!("expected rect");
        };
        assert_eq!((*x, *y, *width, *height), (40.0, 5.0, 40.0, 10.0));
        assert_eq!(*style, BoxStyle::Accent);
        assert_eq!(label, "Bob");
    }

    #[test]
    fn test_no_batch_only_clears() {
        let cmds = render_commands(None, DisplaySize::new(10.0, 10.0), hash_label, None);
        assert_eq!(cmds.len(), 1);
    }

    #[test]
    fn test_hit_and_miss() {
        let b = batch(vec![det(0.0, 0.0, 10.0, 10.0, 0.9, 1)]);
        let display = DisplaySize::new(200.0, 200.0);
        assert_eq!(hit_test(Point { x: 5.0, y: 5.0 }, Some(&b), display), Some(1));
        assert_eq!(hit_test(Point { x: 5.0, y: 5.0 }, Some(&b), display), Some(1));
        assert_eq!(hit_test(Point { x: 150.0, y: 150.0 }, Some(&b), display), None);
        assert_eq!(hit_test(Point { x: 5.0, y: 5.0 }, None, display), None);
    }

    #[test]
    fn test_overlap_picks_highest_confidence() {
        let b = batch(vec![
            det(0.0, 0.0, 50.0, 50.0, 0.4, 1),
            det(10.0, 10.0, 60.0, 60.0, 0.8, 2),
            det(20.0, 20.0, 30.0, 30.0, 0.8, 3),
        ]);
        let display = DisplaySize::new(100.0, 100.0);
        assert_eq!(hit_test(Point { x: 25.0, y: 25.0 }, Some(&b), display), Some(2));
        assert_eq!(hit_test(Point { x: 5.0, y: 5.0 }, Some(&b), display), Some(1));
    }

    #[test]
    fn test_fps_guard() {
        let mut clock = OverlayClock::new();
        let first = clock.record(Duration::from_micros(1500), 1_000);
        assert_eq!(first.fps, None);
        assert!((first.render_ms - 1.5).abs() < 1e-9);
        assert_eq!(clock.record(Duration::ZERO, 1_016).fps, Some(62.5));
        assert_eq!(clock.record(Duration::ZERO, 1_016).fps, Some(1000.0));
    }

    #[test]
    fn test_raster_clears_stale_boxes() {
        let mut surface = RasterSurface::new(200, 200);
        let b = batch(vec![det(0.0, 0.0, 10.0, 10.0, 0.9, 1)]);
        let display = DisplaySize::new(200.0, 200.0);
        surface.apply(&render_commands(Some(&b), display, hash_label, None));
        assert_eq!(surface.image().get_pixel(0, 0), &Rgb(BASE_COLOR));
        assert_eq!(surface.image().get_pixel(20, 10), &Rgb(BASE_COLOR));

        surface.apply(&render_commands(None, display, hash_label, None));
        assert!(surface.image().pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}

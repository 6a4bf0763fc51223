//! Sprite sheet packing and the WebVTT cue file that indexes it.
//!
//! Cells are laid out row-major on a near-square grid. Each cue covers the
//! span from its cell's timestamp to the next one; the first cue starts at 0
//! and the last ends at the video duration.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, ImageEncoder, Rgb, RgbImage};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use reel_models::timestamp::format_cue_time;
use reel_models::{Sprite, ThumbnailSize};

use crate::error::{MediaError, MediaResult};

pub const SPRITE_FILE_NAME: &str = "sprite.jpg";
pub const VTT_FILE_NAME: &str = "sprite.vtt";

const SPRITE_JPEG_QUALITY: u8 = 85;
/// Minimum cue length so every cue has `end > start`.
const MIN_CUE_SECS: f64 = 0.001;

/// One sprite cell: the frame at `timestamp` stored at `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteCell {
    pub timestamp: f64,
    pub path: PathBuf,
}

impl SpriteCell {
    pub fn new(timestamp: f64, path: impl Into<PathBuf>) -> Self {
        Self {
            timestamp,
            path: path.into(),
        }
    }
}

/// Cue time range for each cell, in cell order.
pub fn cue_ranges(timestamps: &[f64], duration: f64) -> Vec<(f64, f64)> {
    timestamps
        .iter()
        .enumerate()
        .map(|(i, &ts)| {
            let start = if i == 0 { 0.0 } else { ts.max(0.0) };
            let next = timestamps.get(i + 1).copied().unwrap_or(duration);
            let end = next.max(start + MIN_CUE_SECS);
            (start, end)
        })
        .collect()
}

/// Pack `cells` into `sprite.jpg` and write `sprite.vtt` next to it.
///
/// `grid` fixes `(columns, rows)`; cells beyond its capacity are dropped.
/// Without it the grid is [`Sprite::grid_for`] the cell count. This is
/// CPU-bound; async callers should run it on a blocking thread.
pub fn build_sprite(
    cells: &[SpriteCell],
    cell_size: &ThumbnailSize,
    grid: Option<(u32, u32)>,
    duration: f64,
    output_dir: &Path,
) -> MediaResult<Sprite> {
    if cells.is_empty() {
        return Err(MediaError::invalid_input("sprite needs at least one cell"));
    }
    if cell_size.width == 0 || cell_size.height == 0 {
        return Err(MediaError::invalid_input("sprite cell size must be non-zero"));
    }

    let (columns, rows) = match grid {
        Some((c, r)) if c > 0 && r > 0 => (c, r),
        Some(_) => return Err(MediaError::invalid_input("sprite grid must be non-empty")),
        None => Sprite::grid_for(cells.len()),
    };
    let capacity = (columns * rows) as usize;
    if cells.len() > capacity {
        warn!(
            cells = cells.len(),
            capacity, "Sprite grid too small, dropping trailing cells"
        );
    }
    let cells = &cells[..cells.len().min(capacity)];

    std::fs::create_dir_all(output_dir)?;
    let sprite_path = output_dir.join(SPRITE_FILE_NAME);
    let vtt_path = output_dir.join(VTT_FILE_NAME);

    let mut sprite = Sprite {
        path: sprite_path.clone(),
        columns,
        rows,
        cell_width: cell_size.width,
        cell_height: cell_size.height,
        vtt_path: vtt_path.clone(),
        cue_count: 0,
    };

    let mut canvas = RgbImage::from_pixel(columns * cell_size.width, rows * cell_size.height, Rgb([0, 0, 0]));
    for (index, cell) in cells.iter().enumerate() {
        let frame = image::open(&cell.path)?.to_rgb8();
        let frame = if frame.dimensions() == (cell_size.width, cell_size.height) {
            frame
        } else {
            imageops::resize(&frame, cell_size.width, cell_size.height, FilterType::Triangle)
        };
        let (x, y) = sprite.cell_origin(index);
        imageops::overlay(&mut canvas, &frame, x as i64, y as i64);
    }
    write_jpeg(&canvas, &sprite_path)?;

    let timestamps: Vec<f64> = cells.iter().map(|c| c.timestamp).collect();
    let ranges = cue_ranges(&timestamps, duration);
    std::fs::write(&vtt_path, render_vtt(&sprite, &ranges))?;
    sprite.cue_count = ranges.len();

    debug!(
        columns,
        rows,
        cues = sprite.cue_count,
        path = %sprite_path.display(),
        "Sprite sheet written"
    );
    Ok(sprite)
}

/// WebVTT body mapping each range to its cell rectangle.
pub fn render_vtt(sprite: &Sprite, ranges: &[(f64, f64)]) -> String {
    let image_name = sprite
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| SPRITE_FILE_NAME.to_string());

    let mut out = String::from("WEBVTT\n");
    for (index, (start, end)) in ranges.iter().enumerate() {
        let (x, y) = sprite.cell_origin(index);
        let _ = write!(
            out,
            "\n{} --> {}\n{}#xywh={},{},{},{}\n",
            format_cue_time(*start),
            format_cue_time(*end),
            image_name,
            x,
            y,
            sprite.cell_width,
            sprite.cell_height
        );
    }
    out
}

pub(crate) fn write_jpeg(image: &RgbImage, path: &Path) -> MediaResult<()> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, SPRITE_JPEG_QUALITY).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    std::fs::write(path, buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_cells(dir: &Path, n: usize, size: &ThumbnailSize) -> Vec<SpriteCell> {
        (0..n)
            .map(|i| {
                let path = dir.join(format!("cell_{i}.jpg"));
                let shade = (i * 20) as u8;
                let img = RgbImage::from_pixel(size.width, size.height, Rgb([shade, 100, 200]));
                write_jpeg(&img, &path).unwrap();
                SpriteCell::new(i as f64 * 2.0 + 1.0, path)
            })
            .collect()
    }

    #[test]
    fn test_twelve_cells() {
        let dir = tempfile::tempdir().unwrap();
        let size = ThumbnailSize::preview();
        let cells = write_cells(dir.path(), 12, &size);

        let sprite = build_sprite(&cells, &size, None, 25.0, &dir.path().join("out")).unwrap();
        assert!(sprite.columns * sprite.rows >= 12);
        assert_eq!(sprite.cue_count, 12);

        let mosaic = image::open(&sprite.path).unwrap();
        assert_eq!(mosaic.width(), sprite.columns * size.width);
        assert_eq!(mosaic.height(), sprite.rows * size.height);

        let vtt = std::fs::read_to_string(&sprite.vtt_path).unwrap();
        assert!(vtt.starts_with("WEBVTT\n"));
        assert_eq!(vtt.matches(" --> ").count(), 12);
        assert!(vtt.contains("sprite.jpg#xywh=0,0,160,90"));
        assert!(vtt.contains("sprite.jpg#xywh=160,0,160,90"));
        assert!(vtt.contains("sprite.jpg#xywh=0,90,160,90"));
    }

    #[test]
    fn test_cue_ranges() {
        let ranges = cue_ranges(&[1.0, 3.0, 5.0], 6.0);
        assert_eq!(ranges, vec![(0.0, 3.0), (3.0, 5.0), (5.0, 6.0)]);

        let clamped = cue_ranges(&[4.0], 4.0);
        assert!(clamped[0].1 > clamped[0].0);
        let tail = cue_ranges(&[1.0, 6.0], 6.0);
        assert!(tail[1].1 > tail[1].0);
    }

    #[test]
    fn test_fixed_grid_drops_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let size = ThumbnailSize::preview();
        let cells = write_cells(dir.path(), 5, &size);

        let sprite = build_sprite(&cells, &size, Some((2, 2)), 12.0, dir.path()).unwrap();
        assert_eq!((sprite.columns, sprite.rows), (2, 2));
        assert_eq!(sprite.cue_count, 4);
    }

    #[test]
    fn test_mismatched_cells_are_resized() {
        let dir = tempfile::tempdir().unwrap();
        let big = ThumbnailSize::small();
        let cells = write_cells(dir.path(), 2, &big);

        let cell = ThumbnailSize::preview();
        let sprite = build_sprite(&cells, &cell, None, 4.0, dir.path()).unwrap();
        let mosaic = image::open(&sprite.path).unwrap();
        assert_eq!(mosaic.width(), 2 * cell.width);
        assert_eq!(mosaic.height(), cell.height);
    }

    #[test]
    fn test_empty_cells_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = build_sprite(&[], &ThumbnailSize::small(), None, 1.0, dir.path());
        assert!(matches!(result, Err(MediaError::InvalidInput(_))));
    }
}

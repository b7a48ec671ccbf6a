use image::{DynamicImage, GenericImage, GenericImageView, ImageFormat, RgbaImage};
use std::io::Cursor;

use crate::Error;

const CELL_EDGE: u32 = 100;

/// Chooses a `(cols, rows)` grid that minimizes `|cols/rows - 4/3|`, ties
/// broken toward fewer rows (§4.2). The original tool describes the ratio
/// qualitatively; the tie-break direction is an explicit Open Question
/// decision recorded in DESIGN.md.
pub fn grid_dims(n: usize) -> (usize, usize) {
    if n == 0 {
        return (1, 1);
    }
    const TARGET: f64 = 4.0 / 3.0;
    let mut best = (n, 1usize);
    let mut best_metric = f64::INFINITY;
    for cols in 1..=n {
        let rows = n.div_ceil(cols);
        let metric = (cols as f64 / rows as f64 - TARGET).abs();
        let better = metric < best_metric
            || (metric == best_metric && rows < best.1)
            || (metric == best_metric && rows == best.1 && cols > best.0);
        if better {
            best = (cols, rows);
            best_metric = metric;
        }
    }
    best
}

/// Builds the cover-image collage used as the steganographic wrapper for
/// a session artifact (§4.2 "Derivation"): each embedded image is
/// downscaled to fit a `100px` box on its longer edge, then arranged in a
/// grid and PNG-encoded.
pub fn thumbnail_collage(images: &[DynamicImage]) -> Result<Vec<u8>, Error> {
    if images.is_empty() {
        // an artifact always carries *some* valid PNG cover; a 1x1
        // transparent pixel is the degenerate collage for a session with
        // no captured windows.
        let img = RgbaImage::new(1, 1);
        return encode_png(&DynamicImage::ImageRgba8(img));
    }

    let thumbs: Vec<DynamicImage> = images
        .iter()
        .map(|img| img.thumbnail(CELL_EDGE, CELL_EDGE))
        .collect();

    let (cols, rows) = grid_dims(thumbs.len());
    let canvas_width = cols as u32 * CELL_EDGE;
    let canvas_height = rows as u32 * CELL_EDGE;
    let mut canvas = RgbaImage::new(canvas_width.max(1), canvas_height.max(1));

    for (i, thumb) in thumbs.iter().enumerate() {
        let col = (i % cols) as u32;
        let row = (i / cols) as u32;
        // center the thumbnail within its cell since `thumbnail` preserves
        // aspect ratio and may not fill the full 100x100 box.
        let x_offset = (CELL_EDGE.saturating_sub(thumb.width())) / 2;
        let y_offset = (CELL_EDGE.saturating_sub(thumb.height())) / 2;
        let dest_x = col * CELL_EDGE + x_offset;
        let dest_y = row * CELL_EDGE + y_offset;
        canvas
            .copy_from(&thumb.to_rgba8(), dest_x, dest_y)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    }

    encode_png(&DynamicImage::ImageRgba8(canvas))
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, Error> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_dims_picks_near_4_3_ratio() {
        // 12 images: 4x3 gives ratio exactly 4/3
        assert_eq!(grid_dims(12), (4, 3));
    }

    #[test]
    fn grid_dims_ties_toward_fewer_rows() {
        // 1 image: every (cols=1, rows=1) is the only option
        assert_eq!(grid_dims(1), (1, 1));
    }

    #[test]
    fn grid_dims_picks_closest_ratio_not_a_naive_sqrt_estimate() {
        // 4 images: (3, 2) has ratio 1.5, distance 0.167 from 4/3; (2, 2)
        // has ratio 1.0, distance 0.333. The closer grid wins even though
        // it isn't a perfect rectangle.
        assert_eq!(grid_dims(4), (3, 2));
    }

    #[test]
    fn collage_of_empty_set_is_a_valid_png() {
        let bytes = thumbnail_collage(&[]).unwrap();
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    #[test]
    fn collage_of_several_images_is_a_valid_png_sized_to_grid() {
        let images: Vec<DynamicImage> = (0..5)
            .map(|_| DynamicImage::ImageRgba8(RgbaImage::new(40, 20)))
            .collect();
        let bytes = thumbnail_collage(&images).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        let (cols, rows) = grid_dims(5);
        assert_eq!(decoded.width(), cols as u32 * CELL_EDGE);
        assert_eq!(decoded.height(), rows as u32 * CELL_EDGE);
    }
}

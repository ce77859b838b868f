//! CPU reference implementation of the block-pixelation transform.
//!
//! The GPU kernel in `shaders/pixelation.comp` is the production path; this
//! module is the authoritative reference its output is validated against.
//! Both partition the image into non-overlapping `block x block` tiles,
//! clamp the trailing row/column of tiles to the remaining pixels, and
//! replace every pixel in a tile with the tile's arithmetic mean. Alpha is
//! passed through as fully opaque.

/// Pixelate an RGBA8 image in place.
///
/// `data` must be exactly `width * height * 4` bytes, tightly packed.
/// `block` of zero is treated as one (identity tiling).
pub fn pixelate_rgba(data: &mut [u8], width: u32, height: u32, block: u32) {
    assert_eq!(
        data.len(),
        width as usize * height as usize * 4,
        "pixel buffer does not match dimensions"
    );
    let block = block.max(1);

    for tile_y in (0..height).step_by(block as usize) {
        for tile_x in (0..width).step_by(block as usize) {
            // Trailing tiles clamp to the image, never reading out of range.
            let tile_w = block.min(width - tile_x);
            let tile_h = block.min(height - tile_y);
            let mean = tile_mean(data, width, tile_x, tile_y, tile_w, tile_h);

            for y in tile_y..tile_y + tile_h {
                for x in tile_x..tile_x + tile_w {
                    let i = pixel_offset(width, x, y);
                    data[i..i + 3].copy_from_slice(&mean);
                    data[i + 3] = 255;
                }
            }
        }
    }
}

/// Arithmetic mean (rounded) of one tile's RGB channels.
fn tile_mean(data: &[u8], width: u32, tile_x: u32, tile_y: u32, tile_w: u32, tile_h: u32) -> [u8; 3] {
    let mut sum = [0u32; 3];
    for y in tile_y..tile_y + tile_h {
        for x in tile_x..tile_x + tile_w {
            let i = pixel_offset(width, x, y);
            sum[0] += u32::from(data[i]);
            sum[1] += u32::from(data[i + 1]);
            sum[2] += u32::from(data[i + 2]);
        }
    }
    let count = tile_w * tile_h;
    [
        ((sum[0] + count / 2) / count) as u8,
        ((sum[1] + count / 2) / count) as u8,
        ((sum[2] + count / 2) / count) as u8,
    ]
}

fn pixel_offset(width: u32, x: u32, y: u32) -> usize {
    (y as usize * width as usize + x as usize) * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSource;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        rgba.repeat(width as usize * height as usize)
    }

    #[test]
    fn test_already_blocky_input_is_unchanged() {
        // 4x4 image with a uniform color per 2x2 quadrant: pixelation with
        // block 2 must be the identity.
        let quads = [[10, 20, 30, 255], [40, 50, 60, 255], [70, 80, 90, 255], [100, 110, 120, 255]];
        let mut data = Vec::new();
        for y in 0..4u32 {
            for x in 0..4u32 {
                let q = (y / 2 * 2 + x / 2) as usize;
                data.extend_from_slice(&quads[q]);
            }
        }
        let expected = data.clone();
        pixelate_rgba(&mut data, 4, 4, 2);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_tile_mean_is_arithmetic_mean() {
        // One 2x2 tile with channel values 0, 10, 20, 30 -> mean 15.
        let mut data = vec![
            0, 0, 0, 255, 10, 10, 10, 255, //
            20, 20, 20, 255, 30, 30, 30, 255,
        ];
        pixelate_rgba(&mut data, 2, 2, 2);
        assert!(data.chunks_exact(4).all(|px| px == [15, 15, 15, 255]));
    }

    #[test]
    fn test_trailing_tiles_clamp_to_image() {
        // 5x5 with block 2 leaves a 1-wide column, a 1-high row, and a 1x1
        // corner tile. The corner tile's mean is its own pixel.
        let mut data = solid(5, 5, [100, 100, 100, 255]);
        let corner = pixel_offset(5, 4, 4);
        data[corner] = 7;
        data[corner + 1] = 7;
        data[corner + 2] = 7;
        pixelate_rgba(&mut data, 5, 5, 2);
        assert_eq!(&data[corner..corner + 4], &[7, 7, 7, 255]);
        // Interior tiles untouched by the corner pixel.
        assert_eq!(&data[0..4], &[100, 100, 100, 255]);
    }

    #[test]
    fn test_block_larger_than_image_averages_everything() {
        let mut data = vec![
            0, 0, 0, 255, 0, 0, 0, 255, //
            0, 0, 0, 255, 40, 80, 120, 255,
        ];
        pixelate_rgba(&mut data, 2, 2, 16);
        assert!(data.chunks_exact(4).all(|px| px == [10, 20, 30, 255]));
    }

    #[test]
    fn test_alpha_forced_opaque() {
        let mut data = solid(4, 4, [50, 60, 70, 0]);
        pixelate_rgba(&mut data, 4, 4, 2);
        assert!(data.chunks_exact(4).all(|px| px == [50, 60, 70, 255]));
    }

    #[test]
    fn test_block_zero_treated_as_identity_tiling() {
        let mut source = crate::capture::TestPatternSource::new(6, 3);
        let frame = source.grab().unwrap();
        let mut data = frame.data.clone();
        pixelate_rgba(&mut data, 6, 3, 0);
        assert_eq!(data, frame.data);
    }
}

//! RGB to planar YUV420 conversion
//!
//! Integer BT.601 (studio swing) arithmetic. Chroma is taken from the
//! top-left pixel of each 2x2 block rather than averaged.

use crate::error::{Result, ShutterError};

/// BT.601 luma of one RGB pixel
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8
}

/// BT.601 chroma (U, V) of one RGB pixel
#[inline]
pub fn chroma(r: u8, g: u8, b: u8) -> (u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let u = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255);
    let v = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255);
    (u as u8, v as u8)
}

/// Convert one RGB pixel to (Y, U, V)
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (u, v) = chroma(r, g, b);
    (luma(r, g, b), u, v)
}

/// Convert packed RGB24 into an I420 buffer (Y plane, then U, then V)
pub fn rgb_to_i420(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    if rgb.len() < w * h * 3 {
        return Err(ShutterError::decode(format!(
            "RGB buffer holds {} bytes, {}x{} needs {}",
            rgb.len(),
            width,
            height,
            w * h * 3
        )));
    }

    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);
    let mut out = vec![0u8; w * h + 2 * cw * ch];
    let (y_plane, chroma_planes) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma_planes.split_at_mut(cw * ch);

    for row in 0..h {
        let src = &rgb[row * w * 3..(row + 1) * w * 3];
        let dst = &mut y_plane[row * w..(row + 1) * w];

        for (col, px) in src.chunks_exact(3).enumerate() {
            dst[col] = luma(px[0], px[1], px[2]);

            if row % 2 == 0 && col % 2 == 0 {
                let (u, v) = chroma(px[0], px[1], px[2]);
                let ci = (row / 2) * cw + col / 2;
                u_plane[ci] = u;
                v_plane[ci] = v;
            }
        }
    }

    Ok(out)
}

/// Borrowed view of the three planes of an I420 buffer
pub struct I420Planes<'a> {
    /// Luma
    pub y: &'a [u8],
    /// Blue-difference chroma
    pub u: &'a [u8],
    /// Red-difference chroma
    pub v: &'a [u8],
}

/// Split a contiguous I420 buffer into its planes
pub fn split_planes(data: &[u8], width: u32, height: u32) -> Option<I420Planes<'_>> {
    let luma_len = width as usize * height as usize;
    let chroma_len = width.div_ceil(2) as usize * height.div_ceil(2) as usize;
    if data.len() < luma_len + 2 * chroma_len {
        return None;
    }

    let (y, rest) = data.split_at(luma_len);
    let (u, rest) = rest.split_at(chroma_len);
    Some(I420Planes {
        y,
        u,
        v: &rest[..chroma_len],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_red() {
        assert_eq!(rgb_to_yuv(255, 0, 0), (82, 90, 240));
    }

    #[test]
    fn test_solid_white_and_black() {
        assert_eq!(rgb_to_yuv(255, 255, 255), (235, 128, 128));
        assert_eq!(rgb_to_yuv(0, 0, 0), (16, 128, 128));
    }

    #[test]
    fn test_blue_chroma_clamps() {
        let (u, v) = chroma(0, 0, 255);
        assert_eq!(u, 240);
        assert_eq!(v, 110);
    }

    #[test]
    fn test_plane_layout() {
        // 4x2 image: left half red, right half white
        let mut rgb = Vec::new();
        for _ in 0..2 {
            rgb.extend_from_slice(&[255, 0, 0, 255, 0, 0, 255, 255, 255, 255, 255, 255]);
        }
        let out = rgb_to_i420(&rgb, 4, 2).unwrap();
        assert_eq!(out.len(), 8 + 2 + 2);

        let planes = split_planes(&out, 4, 2).unwrap();
        assert_eq!(planes.y, &[82, 82, 235, 235, 82, 82, 235, 235]);
        assert_eq!(planes.u, &[90, 128]);
        assert_eq!(planes.v, &[240, 128]);
    }

    #[test]
    fn test_chroma_sampled_from_even_positions() {
        // 2x2 block: only the top-left pixel decides chroma
        let rgb = [255, 0, 0, 0, 0, 255, 0, 255, 0, 255, 255, 255];
        let out = rgb_to_i420(&rgb, 2, 2).unwrap();
        assert_eq!(out[4], 90);
        assert_eq!(out[5], 240);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(rgb_to_i420(&[0; 5], 2, 2).is_err());
    }
}

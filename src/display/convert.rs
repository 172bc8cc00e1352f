//! Channel-order conversion between the packed 8-bit layouts.
//!
//! Pure byte shuffling: no resampling, no color-space transform.

use std::borrow::Cow;

use thiserror::Error;

use crate::capture::PixelFormat;

/// Layout every texture upload uses
pub const UPLOAD_FORMAT: PixelFormat = PixelFormat::Rgb8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("{len} bytes is not a whole number of {bpp}-byte pixels")]
    Misaligned { len: usize, bpp: usize },
}

/// Logical position of red, green and blue inside one pixel of `format`
const fn rgb_offsets(format: PixelFormat) -> [usize; 3] {
    match format {
        PixelFormat::Rgb8 => [0, 1, 2],
        PixelFormat::Bgr8 | PixelFormat::Bgra8 => [2, 1, 0],
    }
}

/// Reorder `src` from `from` into `to`. Borrows when the layouts match.
///
/// Widening to BGRA8 writes an opaque alpha; narrowing drops it.
pub fn convert(
    from: PixelFormat,
    to: PixelFormat,
    src: &[u8],
) -> Result<Cow<'_, [u8]>, ConvertError> {
    let src_bpp = from.bytes_per_pixel();
    if src.len() % src_bpp != 0 {
        return Err(ConvertError::Misaligned {
            len: src.len(),
            bpp: src_bpp,
        });
    }
    if from == to {
        return Ok(Cow::Borrowed(src));
    }

    let dst_bpp = to.bytes_per_pixel();
    let pixels = src.len() / src_bpp;
    let mut out = vec![0xFFu8; pixels * dst_bpp];

    let [sr, sg, sb] = rgb_offsets(from);
    let [dr, dg, db] = rgb_offsets(to);
    for (s, d) in src.chunks_exact(src_bpp).zip(out.chunks_exact_mut(dst_bpp)) {
        d[dr] = s[sr];
        d[dg] = s[sg];
        d[db] = s[sb];
    }

    Ok(Cow::Owned(out))
}

/// Convert into [`UPLOAD_FORMAT`]
pub fn to_upload(from: PixelFormat, src: &[u8]) -> Result<Cow<'_, [u8]>, ConvertError> {
    convert(from, UPLOAD_FORMAT, src)
}

/// Expand packed RGB8 to RGBA8 with opaque alpha, for GPUs without a 3-byte format
pub fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for chunk in rgb.chunks_exact(3) {
        rgba.extend_from_slice(chunk);
        rgba.push(255);
    }
    rgba
}

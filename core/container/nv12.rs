//! NV12 → RGB conversion and model-input preprocessing. BT.601
//! coefficients for the color conversion; bilinear resize, per-channel
//! normalization to `[0, 1]`, and an `(H, W, 3) -> (3, H, W)` transpose
//! to produce the tensor a model's forward pass expects.

/// An `(H, W, 3)` 8-bit RGB image, row-major, channel-last.
#[derive(Clone, Debug, PartialEq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    /// Length `width * height * 3`.
    pub data: Vec<u8>,
}

/// Converts an NV12 buffer of length `width*height*3/2` to RGB. The
/// caller guarantees `nv12.len() == width*height*3/2` (the frame reader
/// and ring buffer both enforce this via `FrameGeometry`); out-of-range
/// indices here would indicate a contract violation upstream, not a
/// recoverable runtime condition, so this function assumes valid input.
pub fn nv12_to_rgb(nv12: &[u8], width: u32, height: u32) -> RgbImage {
    let w = width as usize;
    let h = height as usize;
    let luma_len = w * h;
    let y_plane = &nv12[..luma_len];
    let uv_plane = &nv12[luma_len..luma_len + luma_len / 2];

    let mut out = vec![0u8; w * h * 3];
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col] as f32;
            let uv_row = row / 2;
            let uv_col = col / 2;
            let uv_idx = (uv_row * (w / 2) + uv_col) * 2;
            let u = uv_plane[uv_idx] as f32;
            let v = uv_plane[uv_idx + 1] as f32;

            let r = y + 1.402 * (v - 128.0);
            let g = y - 0.344136 * (u - 128.0) - 0.714136 * (v - 128.0);
            let b = y + 1.772 * (u - 128.0);

            let pixel = (row * w + col) * 3;
            out[pixel] = r.clamp(0.0, 255.0) as u8;
            out[pixel + 1] = g.clamp(0.0, 255.0) as u8;
            out[pixel + 2] = b.clamp(0.0, 255.0) as u8;
        }
    }
    RgbImage { width, height, data: out }
}

/// A preprocessed model input tensor: `(C, H, W)`, normalized to `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

/// Resizes `rgb` to `(target_width, target_height)` with bilinear
/// interpolation, normalizes each channel to `[0, 1]`, and transposes
/// `(H, W, 3) -> (3, H, W)`.
pub fn preprocess(rgb: &RgbImage, target_width: u32, target_height: u32) -> InputTensor {
    let resized = resize_bilinear(rgb, target_width, target_height);
    let (tw, th) = (target_width as usize, target_height as usize);
    let mut data = vec![0.0f32; 3 * tw * th];
    for row in 0..th {
        for col in 0..tw {
            let src = (row * tw + col) * 3;
            for c in 0..3 {
                data[c * th * tw + row * tw + col] = resized.data[src + c] as f32 / 255.0;
            }
        }
    }
    InputTensor { channels: 3, height: th, width: tw, data }
}

fn resize_bilinear(src: &RgbImage, target_width: u32, target_height: u32) -> RgbImage {
    if src.width == target_width && src.height == target_height {
        return src.clone();
    }
    let (sw, sh) = (src.width as usize, src.height as usize);
    let (tw, th) = (target_width as usize, target_height as usize);
    let mut out = vec![0u8; tw * th * 3];

    let x_ratio = if tw > 1 { (sw - 1) as f32 / (tw - 1).max(1) as f32 } else { 0.0 };
    let y_ratio = if th > 1 { (sh - 1) as f32 / (th - 1).max(1) as f32 } else { 0.0 };

    for ty in 0..th {
        let sy = (ty as f32 * y_ratio).min((sh - 1) as f32);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(sh - 1);
        let fy = sy - y0 as f32;

        for tx in 0..tw {
            let sx = (tx as f32 * x_ratio).min((sw - 1) as f32);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(sw - 1);
            let fx = sx - x0 as f32;

            for c in 0..3 {
                let p00 = src.data[(y0 * sw + x0) * 3 + c] as f32;
                let p01 = src.data[(y0 * sw + x1) * 3 + c] as f32;
                let p10 = src.data[(y1 * sw + x0) * 3 + c] as f32;
                let p11 = src.data[(y1 * sw + x1) * 3 + c] as f32;
                let top = p00 * (1.0 - fx) + p01 * fx;
                let bottom = p10 * (1.0 - fx) + p11 * fx;
                let value = top * (1.0 - fy) + bottom * fy;
                out[(ty * tw + tx) * 3 + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    RgbImage { width: target_width, height: target_height, data: out }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_gray_nv12_converts_to_gray_rgb() {
        // Y=128, U=V=128 is mid-gray; BT.601 math should produce R=G=B=128.
        let w = 2;
        let h = 2;
        let mut nv12 = vec![128u8; w * h];
        nv12.extend_from_slice(&[128u8; 2]); // one interleaved UV pair for 2x2
        let rgb = nv12_to_rgb(&nv12, w as u32, h as u32);
        assert_eq!(rgb.data, vec![128u8; w * h * 3]);
    }

    #[test]
    fn full_white_luma_saturates_rgb_high() {
        let w = 2;
        let h = 2;
        let mut nv12 = vec![255u8; w * h];
        nv12.extend_from_slice(&[128u8; 2]);
        let rgb = nv12_to_rgb(&nv12, w as u32, h as u32);
        assert!(rgb.data.iter().all(|&b| b >= 254));
    }

    #[test]
    fn preprocess_produces_chw_normalized_tensor() {
        let rgb = RgbImage { width: 2, height: 2, data: vec![255u8; 12] };
        let tensor = preprocess(&rgb, 2, 2);
        assert_eq!(tensor.channels, 3);
        assert_eq!(tensor.height, 2);
        assert_eq!(tensor.width, 2);
        assert_eq!(tensor.data.len(), 12);
        assert!(tensor.data.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn resize_preserves_identity_when_dimensions_match() {
        let rgb = RgbImage { width: 3, height: 3, data: (0..27).map(|v| v as u8).collect() };
        let resized = resize_bilinear(&rgb, 3, 3);
        assert_eq!(resized, rgb);
    }

    #[test]
    fn resize_changes_output_dimensions() {
        let rgb = RgbImage { width: 4, height: 4, data: vec![100u8; 48] };
        let resized = resize_bilinear(&rgb, 2, 2);
        assert_eq!(resized.width, 2);
        assert_eq!(resized.height, 2);
        assert_eq!(resized.data.len(), 12);
        // Uniform input resizes to a uniform output.
        assert!(resized.data.iter().all(|&v| v == 100));
    }
}

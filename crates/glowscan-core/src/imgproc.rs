//! Grayscale conversion, bilinear resize and integral images.

/// Convert packed RGB8 to 8-bit luma with BT.601 weights (0.299, 0.587, 0.114).
///
/// Fixed-point with 14 fractional bits, rounded.
pub fn rgb_to_gray(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| {
            let y = p[0] as u32 * 4899 + p[1] as u32 * 9617 + p[2] as u32 * 1868;
            ((y + (1 << 13)) >> 14) as u8
        })
        .collect()
}

/// Resize a grayscale image with bilinear interpolation (pixel-centre aligned).
pub fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let mut resized = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return resized;
    }

    let inv_scale_x = width as f32 / new_w as f32;
    let inv_scale_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
        let fy = if src_y < 0.0 { 0.0 } else { fy };

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fx = if src_x < 0.0 { 0.0 } else { fx };

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    resized
}

/// Summed-area tables of pixel values and squared pixel values.
///
/// Both tables are `(width + 1) × (height + 1)` with a zero first row and column.
pub struct IntegralImage {
    pub width: usize,
    pub height: usize,
    sum: Vec<u32>,
    sqsum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(gray: &[u8], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0u32; stride * (height + 1)];
        let mut sqsum = vec![0u64; stride * (height + 1)];

        for y in 0..height {
            let mut row_sum = 0u32;
            let mut row_sqsum = 0u64;
            for x in 0..width {
                let p = gray[y * width + x] as u32;
                row_sum += p;
                row_sqsum += (p * p) as u64;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sqsum[idx] = sqsum[idx - stride] + row_sqsum;
            }
        }

        Self {
            width,
            height,
            sum,
            sqsum,
        }
    }

    /// Sum of pixels in the rectangle with top-left `(x, y)`.
    #[inline]
    pub fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u32 {
        let stride = self.width + 1;
        let a = self.sum[y * stride + x];
        let b = self.sum[y * stride + x + w];
        let c = self.sum[(y + h) * stride + x];
        let d = self.sum[(y + h) * stride + x + w];
        // d - b - c + a, ordered to stay non-negative
        (d + a) - (b + c)
    }

    /// Sum of squared pixels in the rectangle with top-left `(x, y)`.
    #[inline]
    pub fn rect_sqsum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let stride = self.width + 1;
        let a = self.sqsum[y * stride + x];
        let b = self.sqsum[y * stride + x + w];
        let c = self.sqsum[(y + h) * stride + x];
        let d = self.sqsum[(y + h) * stride + x + w];
        (d + a) - (b + c)
    }
}

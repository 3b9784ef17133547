/// Widest kernel half-width, in pixels.
const MAX_KERNEL_RADIUS: u32 = 128;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BlurError {
    #[error("blur buffer is {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("blur sigma must be finite and > 0, got {0}")]
    Sigma(f32),
}

/// Gaussian blur of premultiplied RGBA8 with standard deviation `sigma` pixels.
///
/// Two separable passes with q16 fixed-point weights; edges clamp. A non-positive `sigma`
/// returns the input unchanged.
pub fn blur_rgba8_premul(
    src: &[u8],
    width: u32,
    height: u32,
    sigma: f32,
) -> Result<Vec<u8>, BlurError> {
    let expected = (width as usize) * (height as usize) * 4;
    if src.len() != expected {
        return Err(BlurError::BufferSize {
            expected,
            actual: src.len(),
        });
    }
    if sigma <= 0.0 || width == 0 || height == 0 {
        return Ok(src.to_vec());
    }
    let radius = kernel_radius(sigma)?;
    let kernel = gaussian_kernel_q16(radius, sigma)?;
    let mut tmp = vec![0u8; expected];
    let mut out = vec![0u8; expected];
    horizontal_pass(src, &mut tmp, width as usize, &kernel);
    vertical_pass(&tmp, &mut out, width as usize, height as usize, &kernel);
    Ok(out)
}

/// Half-width covering three standard deviations.
pub(crate) fn kernel_radius(sigma: f32) -> Result<u32, BlurError> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(BlurError::Sigma(sigma));
    }
    Ok(((sigma * 3.0).ceil() as u32).clamp(1, MAX_KERNEL_RADIUS))
}

/// Normalized weights summing to exactly `1 << 16`.
pub(crate) fn gaussian_kernel_q16(radius: u32, sigma: f32) -> Result<Vec<u32>, BlurError> {
    if radius == 0 {
        return Ok(vec![1 << 16]);
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(BlurError::Sigma(sigma));
    }
    let r = radius as i32;
    let denom = 2.0 * f64::from(sigma) * f64::from(sigma);
    let weights_f: Vec<f64> = (-r..=r)
        .map(|i| (-(f64::from(i) * f64::from(i)) / denom).exp())
        .collect();
    let sum: f64 = weights_f.iter().sum();

    let mut weights: Vec<u32> = weights_f
        .iter()
        .map(|w| ((w / sum) * 65536.0).round().clamp(0.0, 65536.0) as u32)
        .collect();
    let acc: i64 = weights.iter().map(|&w| i64::from(w)).sum();
    let mid = weights.len() / 2;
    // Rounding drift goes to the center tap.
    weights[mid] = (i64::from(weights[mid]) + (65536 - acc)).clamp(0, 65536) as u32;
    Ok(weights)
}

fn horizontal_pass(src: &[u8], dst: &mut [u8], width: usize, k: &[u32]) {
    let radius = (k.len() / 2) as isize;
    let last = width as isize - 1;
    for (src_row, dst_row) in src.chunks_exact(width * 4).zip(dst.chunks_exact_mut(width * 4)) {
        for x in 0..width {
            let mut acc = [0u64; 4];
            for (ki, &kw) in k.iter().enumerate() {
                let sx = (x as isize + ki as isize - radius).clamp(0, last) as usize;
                let px = &src_row[sx * 4..sx * 4 + 4];
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(px[c]);
                }
            }
            for c in 0..4 {
                dst_row[x * 4 + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn vertical_pass(src: &[u8], dst: &mut [u8], width: usize, height: usize, k: &[u32]) {
    let radius = (k.len() / 2) as isize;
    let last = height as isize - 1;
    for y in 0..height {
        for x in 0..width {
            let mut acc = [0u64; 4];
            for (ki, &kw) in k.iter().enumerate() {
                let sy = (y as isize + ki as isize - radius).clamp(0, last) as usize;
                let i = (sy * width + x) * 4;
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(src[i + c]);
                }
            }
            let o = (y * width + x) * 4;
            for c in 0..4 {
                dst[o + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn q16_to_u8(acc: u64) -> u8 {
    ((acc + 32768) >> 16).min(255) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/render/blur.rs"]
mod tests;

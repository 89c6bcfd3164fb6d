//! Image sharpness estimation for the autofocus search.
//!
//! Implements the normalized DCT Shannon entropy metric: a 2-D DCT-II of
//! the image, L2 normalization of the spectrum, then
//! `-2 · Σ |d|·ln|d| / (otf_x · otf_y)` where the OTF support is the image
//! extent divided by the PSF support diameter. A sharper image spreads
//! energy across more DCT coefficients and scores higher.
//!
//! The metric is scale-invariant (the normalization cancels any constant
//! gain), so the DCT here carries no normalization factor of its own.

use num_complex::Complex;
use rustfft::FftPlanner;

/// Unnormalized DCT-II of one real sequence, computed through a 2N-point
/// FFT of the mirrored input.
fn dct2_inplace(planner: &mut FftPlanner<f64>, input: &mut [f64], scratch: &mut Vec<Complex<f64>>) {
    let n = input.len();
    if n == 0 {
        return;
    }
    scratch.clear();
    scratch.reserve(2 * n);
    for &x in input.iter() {
        scratch.push(Complex::new(x, 0.0));
    }
    for &x in input.iter().rev() {
        scratch.push(Complex::new(x, 0.0));
    }

    let fft = planner.plan_fft_forward(2 * n);
    fft.process(scratch);

    let phase = -std::f64::consts::PI / (2.0 * n as f64);
    for (k, out) in input.iter_mut().enumerate() {
        let twiddle = Complex::from_polar(1.0, phase * k as f64);
        *out = (twiddle * scratch[k]).re;
    }
}

/// 2-D DCT-II, separable: rows first, then columns.
fn dct2d(pixels: &[f64], width: usize, height: usize) -> Vec<f64> {
    let mut planner = FftPlanner::new();
    let mut scratch = Vec::new();
    let mut spectrum = pixels.to_vec();

    for row in spectrum.chunks_mut(width) {
        dct2_inplace(&mut planner, row, &mut scratch);
    }

    let mut column = vec![0.0; height];
    for x in 0..width {
        for (y, value) in column.iter_mut().enumerate() {
            *value = spectrum[y * width + x];
        }
        dct2_inplace(&mut planner, &mut column, &mut scratch);
        for (y, value) in column.iter().enumerate() {
            spectrum[y * width + x] = *value;
        }
    }
    spectrum
}

/// Normalized DCT Shannon entropy of one image plane.
///
/// `psf_support_diameter` is the PSF support in pixels; it sets the OTF
/// support the entropy is normalized by. Returns 0.0 for an empty or
/// all-zero image.
pub fn normalized_dct_shannon_entropy(
    pixels: &[f64],
    width: usize,
    height: usize,
    psf_support_diameter: f64,
) -> f64 {
    debug_assert_eq!(pixels.len(), width * height);
    if pixels.is_empty() {
        return 0.0;
    }

    let mut spectrum = dct2d(pixels, width, height);

    let norm = spectrum.iter().map(|d| d * d).sum::<f64>().sqrt();
    if norm == 0.0 {
        return 0.0;
    }
    for d in &mut spectrum {
        *d /= norm;
    }

    let otf_support_x = width as f64 / psf_support_diameter;
    let otf_support_y = height as f64 / psf_support_diameter;

    let raw: f64 = spectrum
        .iter()
        .filter(|d| **d != 0.0)
        .map(|d| d.abs() * d.abs().ln())
        .sum();

    -2.0 * raw / (otf_support_x * otf_support_y)
}

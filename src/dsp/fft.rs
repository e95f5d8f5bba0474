//! Windowed one-sided Fourier transform of real sequences.

use realfft::num_complex::Complex;
use realfft::RealFftPlanner;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static FFT_PLANNER: RefCell<RealFftPlanner<f64>> = RefCell::new(RealFftPlanner::new());
    static HANN_CACHE: RefCell<HashMap<usize, Vec<f64>>> = RefCell::new(HashMap::new());
}

/// Symmetric Hann window normalized so its mean square equals 1.
///
/// The normalization keeps the variance of a windowed segment unbiased, so
/// power spectra need no separate window correction.
pub fn hann_window(size: usize) -> Vec<f64> {
    HANN_CACHE.with(|cache| {
        cache
            .borrow_mut()
            .entry(size)
            .or_insert_with(|| {
                if size == 1 {
                    return vec![1.0];
                }
                let n_minus_1 = (size - 1) as f64;
                let mut w: Vec<f64> = (0..size)
                    .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n_minus_1).cos()))
                    .collect();
                let ms = w.iter().map(|x| x * x).sum::<f64>() / size as f64;
                let norm = ms.sqrt();
                for x in &mut w {
                    *x /= norm;
                }
                w
            })
            .clone()
    })
}

/// Subtract the least-squares line along the buffer, in place.
pub fn detrend(buf: &mut [f64]) {
    let n = buf.len();
    if n == 0 {
        return;
    }
    let nf = n as f64;
    let ybar = buf.iter().sum::<f64>() / nf;
    if n == 1 {
        buf[0] = 0.0;
        return;
    }
    let xbar = (nf - 1.0) / 2.0;
    let mut sxy = 0.0;
    for (i, &y) in buf.iter().enumerate() {
        sxy += (i as f64 - xbar) * (y - ybar);
    }
    // closed form for the index coordinate: sum (i - xbar)^2
    let sxx = nf * (nf * nf - 1.0) / 12.0;
    let slope = sxy / sxx;
    for (i, y) in buf.iter_mut().enumerate() {
        *y -= ybar + slope * (i as f64 - xbar);
    }
}

/// One-sided Fourier transform of a real buffer, optionally detrended and
/// Hann-windowed in place first.
///
/// Returns `len/2 + 1` complex coefficients. Only `buf` is mutated, so
/// callers working over overlapping segments of a shared array must pass a
/// private copy per invocation.
pub fn fourier_transform(buf: &mut [f64], detrend_first: bool, window: bool) -> Vec<Complex<f64>> {
    if detrend_first {
        detrend(buf);
    }
    if window {
        let w = hann_window(buf.len());
        for (y, &wi) in buf.iter_mut().zip(w.iter()) {
            *y *= wi;
        }
    }

    let fft = FFT_PLANNER.with(|p| p.borrow_mut().plan_fft_forward(buf.len()));
    let mut spectrum = fft.make_output_vec();
    fft.process(buf, &mut spectrum).expect("FFT failed");
    spectrum
}

/// One-sided FFT sample frequencies: `k * sample_rate / nfft` for
/// `k in 0..=nfft/2`.
pub fn rfft_frequencies(nfft: usize, sample_rate: f64) -> Vec<f64> {
    (0..=nfft / 2)
        .map(|k| k as f64 * sample_rate / nfft as f64)
        .collect()
}

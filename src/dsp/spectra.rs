//! Sliding-window segment spectra of a T-chain section.
//!
//! Converts the temperature record of each sensor into an along-chain
//! gradient signal via the flow speed past the sensor (Taylor's hypothesis),
//! then estimates one-sided power spectra over overlapping segments. With
//! wave contamination enabled, the normalized vertical sensor velocity is
//! transformed alongside as a proxy for wave orbital motion, together with
//! its cross-spectrum against the gradient signal.

use chrono::Duration;
use log::debug;
use realfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::dsp::fft::{fourier_transform, rfft_frequencies};
use crate::error::{SpectraError, SpectraResult};
use crate::flow::FlowPastSensor;
use crate::types::{seconds_between, Section, SpectraSet};

/// Sensor roll-off constant (Hz) of the transfer function `1 + (f/FC)^2`
/// correcting for high-frequency attenuation of the thermistor response.
pub const FC: f64 = 0.255;

/// Parameters for segment spectra computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpectraParams {
    /// Segment length in samples.
    pub nfft: usize,
    /// Samples shared between consecutive segments.
    pub overlap: usize,
    /// Also compute vertical-velocity spectra and the cross-spectrum.
    pub wave_contamination: bool,
    /// Correct all reported spectra for sensor roll-off.
    pub roll_off: bool,
}

impl Default for SpectraParams {
    fn default() -> Self {
        Self {
            nfft: 256,
            overlap: 128,
            wave_contamination: false,
            roll_off: false,
        }
    }
}

/// Per-(time, sensor) signals derived once per call.
struct Derived {
    tx: Vec<f64>,         // along-chain temperature gradient
    wu: Option<Vec<f64>>, // normalized vertical sensor velocity
    u: Vec<f64>,          // flow speed past each sensor
}

/// Compute per-segment spectra for every sensor of a section.
///
/// Segments are `nfft` samples long and advance by `nfft - overlap`; a
/// section shorter than one segment yields an empty, well-formed result.
pub fn compute_spectra(
    section: &Section,
    flow: &dyn FlowPastSensor,
    params: &SpectraParams,
) -> SpectraResult<SpectraSet> {
    let nfft = params.nfft;
    if nfft < 2 {
        return Err(SpectraError::InvalidParameter(format!(
            "nfft must be at least 2, got {nfft}"
        )));
    }
    if nfft <= params.overlap {
        return Err(SpectraError::InvalidParameter(format!(
            "nfft ({nfft}) must be greater than overlap ({})",
            params.overlap
        )));
    }
    let step = nfft - params.overlap;
    let npoints = section.ntime();
    let nsensors = section.nsensors();
    let fs = section.sample_rate();

    // Reported grid drops the DC bin
    let frequency: Vec<f64> = rfft_frequencies(nfft, fs)[1..].to_vec();
    let nfreq = frequency.len();

    let nspectra = if npoints + 1 > nfft {
        (npoints - nfft + 1) / step
    } else {
        0
    };
    debug!(
        "computing {nspectra} spectra of {nfft} samples (step {step}) over {nsensors} sensors"
    );
    if nspectra == 0 {
        return SpectraSet::new(
            Vec::new(),
            section.sensors().to_vec(),
            frequency,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            params.wave_contamination.then(Vec::new),
            params.wave_contamination.then(Vec::new),
        );
    }

    let t0 = section.time()[0];
    let seconds: Vec<f64> = section
        .time()
        .iter()
        .map(|&t| seconds_between(t0, t))
        .collect();
    let derived = derive_gradients(section, &seconds, flow, params.wave_contamination)?;

    let nbins = nspectra * nsensors * nfreq;
    let npairs = nspectra * nsensors;
    let mut phi_tx = vec![0.0; nbins];
    let mut phi_w = params.wave_contamination.then(|| vec![0.0; nbins]);
    let mut phi_txw = params
        .wave_contamination
        .then(|| vec![Complex::new(0.0, 0.0); nbins]);
    let mut time = Vec::with_capacity(nspectra);
    let mut z = vec![0.0; npairs];
    let mut lat = vec![0.0; npairs];
    let mut lon = vec![0.0; npairs];
    let mut u = vec![0.0; npairs];

    // Scratch buffers are private per call: segments overlap the shared
    // derived arrays, and the transform mutates its input.
    let mut scratch = vec![0.0; nfft];
    let psd_scale = 2.0 / (nfft as f64 * fs);

    for ii in 0..nspectra {
        let start = ii * step;
        for s in 0..nsensors {
            for (k, slot) in scratch.iter_mut().enumerate() {
                *slot = derived.tx[section.grid_index(start + k, s)];
            }
            let tx_hat = fourier_transform(&mut scratch, true, true);

            let row = (ii * nsensors + s) * nfreq;
            for k in 0..nfreq {
                phi_tx[row + k] = psd_scale * tx_hat[k + 1].norm_sqr();
            }

            if let (Some(phi_w), Some(phi_txw), Some(wu)) =
                (phi_w.as_mut(), phi_txw.as_mut(), derived.wu.as_ref())
            {
                for (k, slot) in scratch.iter_mut().enumerate() {
                    *slot = wu[section.grid_index(start + k, s)];
                }
                let wu_hat = fourier_transform(&mut scratch, true, true);
                for k in 0..nfreq {
                    phi_w[row + k] = psd_scale * wu_hat[k + 1].norm_sqr();
                    phi_txw[row + k] = psd_scale * tx_hat[k + 1] * wu_hat[k + 1].conj();
                }
            }

            // Window means of the slowly varying fields
            let pair = ii * nsensors + s;
            let mut mz = 0.0;
            let mut mlat = 0.0;
            let mut mlon = 0.0;
            let mut mu = 0.0;
            for k in 0..nfft {
                let idx = section.grid_index(start + k, s);
                mz += section.z()[idx];
                mlat += section.lat()[idx];
                mlon += section.lon()[idx];
                mu += derived.u[idx];
            }
            z[pair] = mz / nfft as f64;
            lat[pair] = mlat / nfft as f64;
            lon[pair] = mlon / nfft as f64;
            u[pair] = mu / nfft as f64;
        }

        let mean_s = seconds[start..start + nfft].iter().sum::<f64>() / nfft as f64;
        time.push(t0 + Duration::nanoseconds((mean_s * 1e9).round() as i64));
    }

    if params.roll_off {
        let tf: Vec<f64> = frequency.iter().map(|f| 1.0 + (f / FC).powi(2)).collect();
        for (b, p) in phi_tx.iter_mut().enumerate() {
            *p *= tf[b % nfreq];
        }
        if let Some(phi_w) = phi_w.as_mut() {
            for (b, p) in phi_w.iter_mut().enumerate() {
                *p *= tf[b % nfreq];
            }
        }
        if let Some(phi_txw) = phi_txw.as_mut() {
            for (b, p) in phi_txw.iter_mut().enumerate() {
                *p *= tf[b % nfreq];
            }
        }
    }

    SpectraSet::new(
        time,
        section.sensors().to_vec(),
        frequency,
        z,
        lat,
        lon,
        u,
        phi_tx,
        phi_w,
        phi_txw,
    )
}

/// Derive flow speed, the along-chain temperature gradient, and (optionally)
/// the normalized vertical sensor velocity for the whole section.
fn derive_gradients(
    section: &Section,
    seconds: &[f64],
    flow: &dyn FlowPastSensor,
    wave_contamination: bool,
) -> SpectraResult<Derived> {
    let nsensors = section.nsensors();
    let u = flow.flow_past_sensor(section.time(), section.z(), nsensors);
    if u.len() != section.ntime() * nsensors {
        return Err(SpectraError::ShapeMismatch {
            name: "flow speed",
            expected: section.ntime() * nsensors,
            actual: u.len(),
        });
    }
    if let Some((idx, _)) = u
        .iter()
        .enumerate()
        .find(|(_, &s)| !s.is_finite() || s == 0.0)
    {
        return Err(SpectraError::DegenerateFlow {
            time: idx / nsensors,
            sensor: idx % nsensors,
        });
    }

    // Taylor's hypothesis: temporal gradient over advection speed
    let mut tx = gradient_along_time(section.temperature(), seconds, nsensors);
    for (g, &s) in tx.iter_mut().zip(u.iter()) {
        *g /= s;
    }

    let wu = wave_contamination.then(|| {
        let mut w = gradient_along_time(section.z(), seconds, nsensors);
        for (g, &s) in w.iter_mut().zip(u.iter()) {
            *g /= s;
        }
        w
    });

    Ok(Derived { tx, wu, u })
}

/// Derivative along the time axis: second-order central differences on a
/// possibly non-uniform coordinate, first-order one-sided at the edges.
fn gradient_along_time(values: &[f64], seconds: &[f64], nsensors: usize) -> Vec<f64> {
    let ntime = seconds.len();
    let mut out = vec![0.0; values.len()];
    if ntime < 2 {
        return out;
    }
    for s in 0..nsensors {
        let at = |i: usize| values[i * nsensors + s];
        out[s] = (at(1) - at(0)) / (seconds[1] - seconds[0]);
        out[(ntime - 1) * nsensors + s] =
            (at(ntime - 1) - at(ntime - 2)) / (seconds[ntime - 1] - seconds[ntime - 2]);
        for i in 1..ntime - 1 {
            let hs = seconds[i] - seconds[i - 1];
            let hd = seconds[i + 1] - seconds[i];
            let a = -hd / (hs * (hs + hd));
            let b = (hd - hs) / (hs * hd);
            let c = hs / (hd * (hs + hd));
            out[i * nsensors + s] = a * at(i - 1) + b * at(i) + c * at(i + 1);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::UniformFlow;
    use chrono::{DateTime, TimeZone, Utc};
    use std::f64::consts::PI;

    struct ZeroFlow;

    impl FlowPastSensor for ZeroFlow {
        fn flow_past_sensor(&self, _t: &[DateTime<Utc>], z: &[f64], _n: usize) -> Vec<f64> {
            vec![0.0; z.len()]
        }
    }

    struct ConstantFlow(f64);

    impl FlowPastSensor for ConstantFlow {
        fn flow_past_sensor(&self, _t: &[DateTime<Utc>], z: &[f64], _n: usize) -> Vec<f64> {
            vec![self.0; z.len()]
        }
    }

    fn times(n: usize, fs: f64) -> Vec<DateTime<Utc>> {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        (0..n)
            .map(|i| t0 + Duration::nanoseconds((i as f64 / fs * 1e9).round() as i64))
            .collect()
    }

    fn sinusoid_section(n: usize, fs: f64, freq: f64, amp: f64) -> Section {
        let temperature: Vec<f64> = (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f64 / fs).sin())
            .collect();
        Section::new(
            times(n, fs),
            vec![0],
            vec![-5.0; n],
            vec![45.0; n],
            vec![-123.0; n],
            temperature,
            fs,
        )
        .unwrap()
    }

    #[test]
    fn test_segment_count_formula() {
        // floor((npoints - nfft + 1) / step) with step = nfft - overlap
        let section = sinusoid_section(3600, 1.0, 0.125, 1.0);
        let params = SpectraParams {
            nfft: 256,
            overlap: 128,
            ..Default::default()
        };
        let set = compute_spectra(&section, &UniformFlow, &params).unwrap();
        assert_eq!(set.nspectra(), 26);
        assert_eq!(set.nfreq(), 128);
    }

    #[test]
    fn test_segment_count_boundaries_at_step_one() {
        let params = SpectraParams {
            nfft: 64,
            overlap: 63,
            ..Default::default()
        };

        // npoints == nfft: exactly one segment
        let section = sinusoid_section(64, 1.0, 0.125, 1.0);
        let set = compute_spectra(&section, &UniformFlow, &params).unwrap();
        assert_eq!(set.nspectra(), 1);

        // npoints == nfft - 1: none, but the result is well formed
        let section = sinusoid_section(63, 1.0, 0.125, 1.0);
        let set = compute_spectra(&section, &UniformFlow, &params).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.nfreq(), 32);
        assert_eq!(set.nsensors(), 1);
    }

    #[test]
    fn test_rejects_step_zero_and_tiny_nfft() {
        let section = sinusoid_section(64, 1.0, 0.125, 1.0);
        let params = SpectraParams {
            nfft: 32,
            overlap: 32,
            ..Default::default()
        };
        assert!(matches!(
            compute_spectra(&section, &UniformFlow, &params),
            Err(SpectraError::InvalidParameter(_))
        ));

        let params = SpectraParams {
            nfft: 1,
            overlap: 0,
            ..Default::default()
        };
        assert!(matches!(
            compute_spectra(&section, &UniformFlow, &params),
            Err(SpectraError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rejects_zero_flow() {
        let section = sinusoid_section(64, 1.0, 0.125, 1.0);
        let params = SpectraParams {
            nfft: 32,
            overlap: 16,
            ..Default::default()
        };
        assert!(matches!(
            compute_spectra(&section, &ZeroFlow, &params),
            Err(SpectraError::DegenerateFlow { .. })
        ));
    }

    #[test]
    fn test_end_to_end_sinusoid_peak() {
        // 3600 samples at 1 Hz, bin-aligned signal at bin 32 of a 256-point
        // grid (0.125 Hz), unit flow
        let fs = 1.0;
        let signal_freq = 32.0 / 256.0;
        let section = sinusoid_section(3600, fs, signal_freq, 1.5);
        let params = SpectraParams {
            nfft: 256,
            overlap: 128,
            ..Default::default()
        };
        let set = compute_spectra(&section, &UniformFlow, &params).unwrap();
        assert_eq!(set.nspectra(), 26);
        assert_eq!(set.nfreq(), 128);

        // DC dropped: bin 32 of the full grid is index 31
        let expected_bin = 31;
        assert!((set.frequency()[expected_bin] - signal_freq).abs() < 1e-12);

        for seg in 0..set.nspectra() {
            let spec = &set.phi_tx()[set.spectrum_range(seg, 0)];
            let peak = spec
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .unwrap()
                .0;
            assert_eq!(peak, expected_bin, "segment {seg} peaked at {peak}");
        }
    }

    #[test]
    fn test_psd_integrates_to_signal_variance() {
        // The gradient of A sin(2πf t) under unit flow is a sinusoid of
        // amplitude 2πfA scaled by the central-difference response
        // sin(ω dt)/(ω dt); the one-sided PSD must integrate to half the
        // squared amplitude.
        let fs = 1.0;
        let nfft = 256;
        let signal_freq = 32.0 / 256.0;
        let amp = 1.5;
        let section = sinusoid_section(3600, fs, signal_freq, amp);
        let params = SpectraParams {
            nfft,
            overlap: 128,
            ..Default::default()
        };
        let set = compute_spectra(&section, &UniformFlow, &params).unwrap();

        let omega = 2.0 * PI * signal_freq;
        let diff_gain = (omega / fs).sin() / (omega / fs);
        let expected = (amp * omega * diff_gain).powi(2) / 2.0;

        let df = fs / nfft as f64;
        let spec = &set.phi_tx()[set.spectrum_range(1, 0)];
        let total: f64 = spec.iter().map(|p| p * df).sum();
        assert!(
            (total - expected).abs() / expected < 0.05,
            "integrated PSD {total}, expected {expected}"
        );
    }

    #[test]
    fn test_unit_flow_gradient_is_time_derivative() {
        // On a linear ramp the central difference is exact, so Tx under unit
        // flow equals the slope; a constant flow of 2 halves it.
        let n = 32;
        let fs = 2.0;
        let slope = 0.75; // degC per second
        let temperature: Vec<f64> = (0..n).map(|i| slope * i as f64 / fs).collect();
        let section = Section::new(
            times(n, fs),
            vec![0],
            vec![-5.0; n],
            vec![0.0; n],
            vec![0.0; n],
            temperature,
            fs,
        )
        .unwrap();
        let seconds: Vec<f64> = (0..n).map(|i| i as f64 / fs).collect();

        let derived = derive_gradients(&section, &seconds, &UniformFlow, false).unwrap();
        for &g in &derived.tx {
            assert!((g - slope).abs() < 1e-12, "gradient {g}");
        }

        let derived = derive_gradients(&section, &seconds, &ConstantFlow(2.0), false).unwrap();
        for &g in &derived.tx {
            assert!((g - slope / 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gradient_exact_for_quadratic_interior() {
        let seconds: Vec<f64> = vec![0.0, 1.0, 2.5, 3.0, 4.5]; // non-uniform
        let values: Vec<f64> = seconds.iter().map(|t| t * t).collect();
        let grad = gradient_along_time(&values, &seconds, 1);
        for i in 1..seconds.len() - 1 {
            let expected = 2.0 * seconds[i];
            assert!(
                (grad[i] - expected).abs() < 1e-12,
                "interior gradient {} at {i}, expected {expected}",
                grad[i]
            );
        }
    }

    #[test]
    fn test_segment_means_and_timestamps() {
        let n = 96;
        let fs = 1.0;
        let section = Section::new(
            times(n, fs),
            vec![0],
            (0..n).map(|i| -(i as f64)).collect(), // z descends linearly
            vec![45.0; n],
            vec![-123.0; n],
            vec![20.0; n],
            fs,
        )
        .unwrap();
        let params = SpectraParams {
            nfft: 64,
            overlap: 32,
            ..Default::default()
        };
        let set = compute_spectra(&section, &UniformFlow, &params).unwrap();
        assert_eq!(set.nspectra(), 1);

        // Mean of z over samples 0..64 is -(0 + 63)/2
        assert!((set.z()[0] + 31.5).abs() < 1e-12);
        assert!((set.lat()[0] - 45.0).abs() < 1e-12);
        assert!((set.u()[0] - 1.0).abs() < 1e-12);

        let expected = section.time()[0] + Duration::milliseconds(31_500);
        assert_eq!(set.time()[0], expected);
    }

    #[test]
    fn test_roll_off_transfer_function() {
        let fs = 1.0;
        let section = sinusoid_section(512, fs, 0.125, 1.0);
        let base = SpectraParams {
            nfft: 128,
            overlap: 64,
            ..Default::default()
        };
        let rolled = SpectraParams {
            roll_off: true,
            ..base
        };
        let plain = compute_spectra(&section, &UniformFlow, &base).unwrap();
        let corrected = compute_spectra(&section, &UniformFlow, &rolled).unwrap();

        let tf: Vec<f64> = plain
            .frequency()
            .iter()
            .map(|f| 1.0 + (f / FC).powi(2))
            .collect();

        // Strictly increasing over the reported grid, approaching 1 at low f
        assert!(tf.windows(2).all(|w| w[1] > w[0]));
        assert!(tf[0] > 1.0 && tf[0] < 1.01);

        // Applying then dividing out the transfer function is a no-op
        let range = plain.spectrum_range(0, 0);
        for (k, (&p, &c)) in plain.phi_tx()[range.clone()]
            .iter()
            .zip(&corrected.phi_tx()[range])
            .enumerate()
        {
            if p > 1e-20 {
                assert!(
                    (c / tf[k] - p).abs() <= 1e-12 * p.max(1.0),
                    "bin {k}: {c} / {} != {p}",
                    tf[k]
                );
            }
        }
    }

    #[test]
    fn test_wave_spectra_present_when_requested() {
        let section = sinusoid_section(512, 1.0, 0.125, 1.0);
        let params = SpectraParams {
            nfft: 128,
            overlap: 64,
            wave_contamination: true,
            ..Default::default()
        };
        let set = compute_spectra(&section, &UniformFlow, &params).unwrap();
        assert!(set.has_wave_spectra());
        assert_eq!(set.phi_w().unwrap().len(), set.phi_tx().len());
        assert_eq!(set.phi_txw().unwrap().len(), set.phi_tx().len());
    }
}

//! Spectrum averaging, wave decontamination, and inertial-subrange fitting.
//!
//! Segment spectra from a group are averaged per sensor; the part of the
//! gradient spectrum coherent with the wave-induced vertical sensor motion
//! is subtracted, and the remainder is rescaled into flow-compensated units
//! under the frozen-turbulence assumption. The compensated spectrum is then
//! fit to the inertial-convective power law over a chosen frequency band.

use log::warn;
use realfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{SpectraError, SpectraResult};
use crate::types::{AveragedSpectrum, FitResult, SpectraSet};

/// Obukhov-Corrsin constant for the inertial-convective subrange.
pub const OBUKHOV_CORRSIN: f64 = 0.4;

/// Canonical mixing efficiency for turbulent buoyancy flux.
pub const MIXING_EFFICIENCY: f64 = 0.2;

/// Parameters for spectrum averaging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AverageParams {
    /// Assumed flow-speed dependence of the measured spectra.
    pub beta: f64,
    /// Subtract the part of the spectrum coherent with the surface waves.
    pub wave_contamination: bool,
}

impl Default for AverageParams {
    fn default() -> Self {
        Self {
            beta: 4.0 / 3.0,
            wave_contamination: true,
        }
    }
}

/// Average a group of segment spectra per sensor, optionally removing
/// wave-coherent variance, and attach the flow-compensated spectrum
/// `Phi_f = Phi_Tx (1 - γ) (U / 2π)^β`.
///
/// The squared coherence γ is estimated from the group means and applied per
/// segment before the flow rescaling.
pub fn average_spectra(
    spectra: &SpectraSet,
    params: &AverageParams,
) -> SpectraResult<AveragedSpectrum> {
    let nspectra = spectra.nspectra();
    if nspectra == 0 {
        return Err(SpectraError::InvalidParameter(
            "cannot average an empty spectra group".into(),
        ));
    }
    if !params.beta.is_finite() {
        return Err(SpectraError::InvalidParameter(format!(
            "beta must be finite, got {}",
            params.beta
        )));
    }
    let nsensors = spectra.nsensors();
    let nfreq = spectra.nfreq();
    let norm = 1.0 / nspectra as f64;

    let mean_pairs = |src: &[f64]| -> Vec<f64> {
        let mut out = vec![0.0; nsensors];
        for seg in 0..nspectra {
            for (s, acc) in out.iter_mut().enumerate() {
                *acc += src[seg * nsensors + s];
            }
        }
        out.iter_mut().for_each(|v| *v *= norm);
        out
    };
    let mean_bins = |src: &[f64]| -> Vec<f64> {
        let row = nsensors * nfreq;
        let mut out = vec![0.0; row];
        for seg in 0..nspectra {
            for (b, acc) in out.iter_mut().enumerate() {
                *acc += src[seg * row + b];
            }
        }
        out.iter_mut().for_each(|v| *v *= norm);
        out
    };

    let z = mean_pairs(spectra.z());
    let lat = mean_pairs(spectra.lat());
    let lon = mean_pairs(spectra.lon());
    let u = mean_pairs(spectra.u());
    let phi_tx = mean_bins(spectra.phi_tx());

    let (phi_w, phi_txw, gamma) = if params.wave_contamination {
        let w = spectra
            .phi_w()
            .ok_or(SpectraError::MissingField("phi_w"))?;
        let txw = spectra
            .phi_txw()
            .ok_or(SpectraError::MissingField("phi_txw"))?;

        let w_mean = mean_bins(w);
        let row = nsensors * nfreq;
        let mut txw_mean = vec![Complex::new(0.0, 0.0); row];
        for seg in 0..nspectra {
            for (b, acc) in txw_mean.iter_mut().enumerate() {
                *acc += txw[seg * row + b];
            }
        }
        txw_mean.iter_mut().for_each(|v| *v *= norm);

        let g: Vec<f64> = (0..row)
            .map(|b| txw_mean[b].norm_sqr() / (w_mean[b] * phi_tx[b]))
            .collect();
        let out_of_range = g
            .iter()
            .filter(|v| v.is_finite() && (**v < 0.0 || **v > 1.0))
            .count();
        if out_of_range > 0 {
            warn!("coherence outside [0, 1] in {out_of_range} of {row} bins");
        }

        (Some(w_mean), Some(txw_mean), Some(g))
    } else {
        (None, None, None)
    };

    // Per-segment compensation, then the group mean
    let mut phi_f = vec![0.0; nsensors * nfreq];
    for seg in 0..nspectra {
        for s in 0..nsensors {
            let scale = (spectra.u()[spectra.pair_index(seg, s)] / (2.0 * PI)).powf(params.beta);
            let row = &spectra.phi_tx()[spectra.spectrum_range(seg, s)];
            for (k, &p) in row.iter().enumerate() {
                let clean = match &gamma {
                    Some(g) => p * (1.0 - g[s * nfreq + k]),
                    None => p,
                };
                phi_f[s * nfreq + k] += clean * scale;
            }
        }
    }
    phi_f.iter_mut().for_each(|v| *v *= norm);

    AveragedSpectrum::new(
        spectra.sensors().to_vec(),
        spectra.frequency().to_vec(),
        z,
        lat,
        lon,
        u,
        phi_tx,
        phi_w,
        phi_txw,
        gamma,
        phi_f,
    )
}

/// Fit the compensated spectrum to the inertial-convective `f^(1/3)` slope
/// over the inclusive band `[fmin, fmax]`.
///
/// The model is a pure log-domain offset, so the regression reduces to the
/// mean and standard deviation of `ln(Phi_f / f^(1/3))` over the band.
pub fn fit_inertial_subrange(
    average: &AveragedSpectrum,
    fmin: f64,
    fmax: f64,
) -> SpectraResult<FitResult> {
    if !fmin.is_finite() || !fmax.is_finite() || fmin > fmax {
        return Err(SpectraError::InvalidParameter(format!(
            "invalid fitting band [{fmin}, {fmax}]"
        )));
    }
    let band: Vec<usize> = average
        .frequency()
        .iter()
        .enumerate()
        .filter(|&(_, &f)| f >= fmin && f <= fmax)
        .map(|(k, _)| k)
        .collect();
    if band.is_empty() {
        return Err(SpectraError::EmptyBand { fmin, fmax });
    }

    let nband = band.len() as f64;
    let mut m = Vec::with_capacity(average.nsensors());
    let mut std = Vec::with_capacity(average.nsensors());
    let mut level = Vec::with_capacity(average.nsensors());
    for s in 0..average.nsensors() {
        let phi_f = &average.phi_f()[average.spectrum_range(s)];
        let residual = |&k: &usize| -> f64 {
            let f = average.frequency()[k];
            (phi_f[k] / f.powf(1.0 / 3.0)).ln()
        };
        let mean = band.iter().map(residual).sum::<f64>() / nband;
        let var = band
            .iter()
            .map(|k| {
                let r = residual(k) - mean;
                r * r
            })
            .sum::<f64>()
            / nband;
        m.push(mean);
        std.push(var.sqrt());
        level.push(mean.exp());
    }

    FitResult::new(
        average.sensors().to_vec(),
        m,
        std,
        level,
        fmin,
        fmax,
        band.len(),
    )
}

/// Background temperature gradient dT/dz: the slope of the least-squares
/// line of temperature against height.
pub fn background_gradient(z: &[f64], temperature: &[f64]) -> SpectraResult<f64> {
    if z.len() != temperature.len() {
        return Err(SpectraError::ShapeMismatch {
            name: "temperature",
            expected: z.len(),
            actual: temperature.len(),
        });
    }
    if z.len() < 2 {
        return Err(SpectraError::InvalidParameter(
            "background gradient needs at least two samples".into(),
        ));
    }
    let n = z.len() as f64;
    let zbar = z.iter().sum::<f64>() / n;
    let tbar = temperature.iter().sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (&zi, &ti) in z.iter().zip(temperature.iter()) {
        sxy += (zi - zbar) * (ti - tbar);
        sxx += (zi - zbar) * (zi - zbar);
    }
    if sxx == 0.0 {
        return Err(SpectraError::InvalidParameter(
            "background gradient needs spread in z".into(),
        ));
    }
    Ok(sxy / sxx)
}

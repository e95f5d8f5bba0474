//! Data types for gridded T-chain sections and their spectra.
//!
//! Multi-axis data is stored as flat row-major vectors inside explicit
//! structs: (time, sensor) for section fields, (segment, sensor, frequency)
//! for spectra. Constructors check every shared axis length so downstream
//! indexing never has to.

use chrono::{DateTime, Utc};
use realfft::num_complex::Complex;

use crate::error::{SpectraError, SpectraResult};

/// Signed seconds from `t0` to `t`, exact to the nanosecond.
pub(crate) fn seconds_between(t0: DateTime<Utc>, t: DateTime<Utc>) -> f64 {
    let d = t.signed_duration_since(t0);
    d.num_seconds() as f64 + f64::from(d.subsec_nanos()) * 1e-9
}

fn check_len(name: &'static str, expected: usize, actual: usize) -> SpectraResult<()> {
    if actual != expected {
        return Err(SpectraError::ShapeMismatch {
            name,
            expected,
            actual,
        });
    }
    Ok(())
}

/// A gridded section of T-chain data.
///
/// Timestamps are strictly increasing; per-(time, sensor) fields are flat
/// row-major with the sensor axis fastest. The section is immutable once
/// built; derived quantities (flow speed, gradients) live in the estimator.
#[derive(Clone, Debug)]
pub struct Section {
    time: Vec<DateTime<Utc>>,
    sensors: Vec<u32>,
    z: Vec<f64>,
    lat: Vec<f64>,
    lon: Vec<f64>,
    temperature: Vec<f64>,
    sample_rate: f64, // Hz
}

impl Section {
    pub fn new(
        time: Vec<DateTime<Utc>>,
        sensors: Vec<u32>,
        z: Vec<f64>,
        lat: Vec<f64>,
        lon: Vec<f64>,
        temperature: Vec<f64>,
        sample_rate: f64,
    ) -> SpectraResult<Self> {
        if time.is_empty() {
            return Err(SpectraError::InvalidParameter(
                "section has no timestamps".into(),
            ));
        }
        if sensors.is_empty() {
            return Err(SpectraError::InvalidParameter(
                "section has no sensors".into(),
            ));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(SpectraError::InvalidParameter(format!(
                "sample rate must be finite and positive, got {sample_rate}"
            )));
        }
        if time.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SpectraError::InvalidParameter(
                "timestamps must be strictly increasing".into(),
            ));
        }
        let n = time.len() * sensors.len();
        check_len("z", n, z.len())?;
        check_len("lat", n, lat.len())?;
        check_len("lon", n, lon.len())?;
        check_len("temperature", n, temperature.len())?;

        Ok(Self {
            time,
            sensors,
            z,
            lat,
            lon,
            temperature,
            sample_rate,
        })
    }

    pub fn ntime(&self) -> usize {
        self.time.len()
    }

    pub fn nsensors(&self) -> usize {
        self.sensors.len()
    }

    /// Flat index of (time, sensor) into the gridded fields.
    pub fn grid_index(&self, time_idx: usize, sensor_idx: usize) -> usize {
        time_idx * self.sensors.len() + sensor_idx
    }

    pub fn time(&self) -> &[DateTime<Utc>] {
        &self.time
    }

    pub fn sensors(&self) -> &[u32] {
        &self.sensors
    }

    pub fn z(&self) -> &[f64] {
        &self.z
    }

    pub fn lat(&self) -> &[f64] {
        &self.lat
    }

    pub fn lon(&self) -> &[f64] {
        &self.lon
    }

    pub fn temperature(&self) -> &[f64] {
        &self.temperature
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

/// Per-segment one-sided spectra for every sensor of a section.
///
/// Segment axis first, then sensor, then frequency (DC excluded). The wave
/// fields are either both present or both absent.
#[derive(Clone, Debug)]
pub struct SpectraSet {
    time: Vec<DateTime<Utc>>, // [segment] mean timestamp
    sensors: Vec<u32>,
    frequency: Vec<f64>,
    z: Vec<f64>,   // [segment * sensor]
    lat: Vec<f64>, // [segment * sensor]
    lon: Vec<f64>, // [segment * sensor]
    u: Vec<f64>,   // [segment * sensor] mean flow speed
    phi_tx: Vec<f64>,
    phi_w: Option<Vec<f64>>,
    phi_txw: Option<Vec<Complex<f64>>>,
}

impl SpectraSet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        time: Vec<DateTime<Utc>>,
        sensors: Vec<u32>,
        frequency: Vec<f64>,
        z: Vec<f64>,
        lat: Vec<f64>,
        lon: Vec<f64>,
        u: Vec<f64>,
        phi_tx: Vec<f64>,
        phi_w: Option<Vec<f64>>,
        phi_txw: Option<Vec<Complex<f64>>>,
    ) -> SpectraResult<Self> {
        let nseg = time.len();
        let nsensors = sensors.len();
        let nfreq = frequency.len();
        let npairs = nseg * nsensors;
        let nbins = npairs * nfreq;

        check_len("z", npairs, z.len())?;
        check_len("lat", npairs, lat.len())?;
        check_len("lon", npairs, lon.len())?;
        check_len("u", npairs, u.len())?;
        check_len("phi_tx", nbins, phi_tx.len())?;
        match (&phi_w, &phi_txw) {
            (Some(w), Some(txw)) => {
                check_len("phi_w", nbins, w.len())?;
                check_len("phi_txw", nbins, txw.len())?;
            }
            (None, None) => {}
            _ => {
                return Err(SpectraError::InvalidParameter(
                    "phi_w and phi_txw must be provided together".into(),
                ))
            }
        }

        Ok(Self {
            time,
            sensors,
            frequency,
            z,
            lat,
            lon,
            u,
            phi_tx,
            phi_w,
            phi_txw,
        })
    }

    pub fn nspectra(&self) -> usize {
        self.time.len()
    }

    pub fn nsensors(&self) -> usize {
        self.sensors.len()
    }

    pub fn nfreq(&self) -> usize {
        self.frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn has_wave_spectra(&self) -> bool {
        self.phi_w.is_some()
    }

    /// Flat index of (segment, sensor) into the per-pair fields.
    pub fn pair_index(&self, segment: usize, sensor: usize) -> usize {
        segment * self.sensors.len() + sensor
    }

    /// Range of one (segment, sensor) row inside the spectral arrays.
    pub fn spectrum_range(&self, segment: usize, sensor: usize) -> std::ops::Range<usize> {
        let start = self.pair_index(segment, sensor) * self.frequency.len();
        start..start + self.frequency.len()
    }

    pub fn time(&self) -> &[DateTime<Utc>] {
        &self.time
    }

    pub fn sensors(&self) -> &[u32] {
        &self.sensors
    }

    pub fn frequency(&self) -> &[f64] {
        &self.frequency
    }

    pub fn z(&self) -> &[f64] {
        &self.z
    }

    pub fn lat(&self) -> &[f64] {
        &self.lat
    }

    pub fn lon(&self) -> &[f64] {
        &self.lon
    }

    pub fn u(&self) -> &[f64] {
        &self.u
    }

    pub fn phi_tx(&self) -> &[f64] {
        &self.phi_tx
    }

    pub fn phi_w(&self) -> Option<&[f64]> {
        self.phi_w.as_deref()
    }

    pub fn phi_txw(&self) -> Option<&[Complex<f64>]> {
        self.phi_txw.as_deref()
    }

    /// Select a group of segments for averaging, in the order given.
    pub fn subset(&self, segments: &[usize]) -> SpectraResult<SpectraSet> {
        let nsensors = self.sensors.len();
        let nfreq = self.frequency.len();
        if let Some(&bad) = segments.iter().find(|&&s| s >= self.nspectra()) {
            return Err(SpectraError::InvalidParameter(format!(
                "segment index {bad} out of range (have {})",
                self.nspectra()
            )));
        }

        let gather_pairs = |src: &[f64]| -> Vec<f64> {
            segments
                .iter()
                .flat_map(|&s| src[s * nsensors..(s + 1) * nsensors].iter().copied())
                .collect()
        };
        let row = nsensors * nfreq;
        let gather_bins = |src: &[f64]| -> Vec<f64> {
            segments
                .iter()
                .flat_map(|&s| src[s * row..(s + 1) * row].iter().copied())
                .collect()
        };

        Ok(SpectraSet {
            time: segments.iter().map(|&s| self.time[s]).collect(),
            sensors: self.sensors.clone(),
            frequency: self.frequency.clone(),
            z: gather_pairs(&self.z),
            lat: gather_pairs(&self.lat),
            lon: gather_pairs(&self.lon),
            u: gather_pairs(&self.u),
            phi_tx: gather_bins(&self.phi_tx),
            phi_w: self.phi_w.as_ref().map(|w| gather_bins(w)),
            phi_txw: self.phi_txw.as_ref().map(|txw| {
                segments
                    .iter()
                    .flat_map(|&s| txw[s * row..(s + 1) * row].iter().copied())
                    .collect()
            }),
        })
    }
}

/// Segment-group mean of a [`SpectraSet`], with coherence and the
/// flow-compensated spectrum attached.
#[derive(Clone, Debug)]
pub struct AveragedSpectrum {
    sensors: Vec<u32>,
    frequency: Vec<f64>,
    z: Vec<f64>, // [sensor]
    lat: Vec<f64>,
    lon: Vec<f64>,
    u: Vec<f64>,
    phi_tx: Vec<f64>, // [sensor * frequency]
    phi_w: Option<Vec<f64>>,
    phi_txw: Option<Vec<Complex<f64>>>,
    gamma: Option<Vec<f64>>,
    phi_f: Vec<f64>,
}

impl AveragedSpectrum {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sensors: Vec<u32>,
        frequency: Vec<f64>,
        z: Vec<f64>,
        lat: Vec<f64>,
        lon: Vec<f64>,
        u: Vec<f64>,
        phi_tx: Vec<f64>,
        phi_w: Option<Vec<f64>>,
        phi_txw: Option<Vec<Complex<f64>>>,
        gamma: Option<Vec<f64>>,
        phi_f: Vec<f64>,
    ) -> SpectraResult<Self> {
        let nsensors = sensors.len();
        let nbins = nsensors * frequency.len();
        check_len("z", nsensors, z.len())?;
        check_len("lat", nsensors, lat.len())?;
        check_len("lon", nsensors, lon.len())?;
        check_len("u", nsensors, u.len())?;
        check_len("phi_tx", nbins, phi_tx.len())?;
        if let Some(w) = &phi_w {
            check_len("phi_w", nbins, w.len())?;
        }
        if let Some(txw) = &phi_txw {
            check_len("phi_txw", nbins, txw.len())?;
        }
        if let Some(g) = &gamma {
            check_len("gamma", nbins, g.len())?;
        }
        check_len("phi_f", nbins, phi_f.len())?;

        Ok(Self {
            sensors,
            frequency,
            z,
            lat,
            lon,
            u,
            phi_tx,
            phi_w,
            phi_txw,
            gamma,
            phi_f,
        })
    }

    pub fn nsensors(&self) -> usize {
        self.sensors.len()
    }

    pub fn nfreq(&self) -> usize {
        self.frequency.len()
    }

    /// Range of one sensor's row inside the spectral arrays.
    pub fn spectrum_range(&self, sensor: usize) -> std::ops::Range<usize> {
        let start = sensor * self.frequency.len();
        start..start + self.frequency.len()
    }

    pub fn sensors(&self) -> &[u32] {
        &self.sensors
    }

    pub fn frequency(&self) -> &[f64] {
        &self.frequency
    }

    pub fn z(&self) -> &[f64] {
        &self.z
    }

    pub fn lat(&self) -> &[f64] {
        &self.lat
    }

    pub fn lon(&self) -> &[f64] {
        &self.lon
    }

    pub fn u(&self) -> &[f64] {
        &self.u
    }

    pub fn phi_tx(&self) -> &[f64] {
        &self.phi_tx
    }

    pub fn phi_w(&self) -> Option<&[f64]> {
        self.phi_w.as_deref()
    }

    pub fn phi_txw(&self) -> Option<&[Complex<f64>]> {
        self.phi_txw.as_deref()
    }

    /// Squared coherence with the vertical-velocity proxy, when wave
    /// decontamination was applied.
    pub fn gamma(&self) -> Option<&[f64]> {
        self.gamma.as_deref()
    }

    /// Flow-compensated spectrum, `Phi_Tx * (U / 2π)^β` averaged over the group.
    pub fn phi_f(&self) -> &[f64] {
        &self.phi_f
    }
}

/// Per-sensor inertial-subrange fit over a frequency band.
///
/// `m` is the mean log residual of `Phi_f / f^(1/3)` over the band, `std` its
/// population standard deviation, and `level = exp(m)` the spectral level.
#[derive(Clone, Debug)]
pub struct FitResult {
    sensors: Vec<u32>,
    m: Vec<f64>,
    std: Vec<f64>,
    level: Vec<f64>,
    fmin: f64,
    fmax: f64,
    nbands: usize, // frequency points inside the band
}

impl FitResult {
    pub fn new(
        sensors: Vec<u32>,
        m: Vec<f64>,
        std: Vec<f64>,
        level: Vec<f64>,
        fmin: f64,
        fmax: f64,
        nbands: usize,
    ) -> SpectraResult<Self> {
        let n = sensors.len();
        check_len("m", n, m.len())?;
        check_len("std", n, std.len())?;
        check_len("level", n, level.len())?;
        Ok(Self {
            sensors,
            m,
            std,
            level,
            fmin,
            fmax,
            nbands,
        })
    }

    pub fn sensors(&self) -> &[u32] {
        &self.sensors
    }

    pub fn m(&self) -> &[f64] {
        &self.m
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    pub fn level(&self) -> &[f64] {
        &self.level
    }

    pub fn band(&self) -> (f64, f64) {
        (self.fmin, self.fmax)
    }

    pub fn nbands(&self) -> usize {
        self.nbands
    }
}

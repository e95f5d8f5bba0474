//! Numeric core: windowed transforms, segment spectra, averaging, fitting.

pub mod fft;
pub mod spectra;
pub mod turbulence;

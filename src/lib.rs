//! Frequency spectra of along-chain temperature gradients from a towed
//! thermistor chain (T-chain).
//!
//! The pipeline slides a fixed-length window across a gridded section,
//! converts the temperature time-derivative into a spatial gradient using
//! the flow speed past each sensor, and estimates one-sided power spectra
//! per segment. Groups of segments are then averaged, stripped of variance
//! coherent with wave-induced sensor motion, rescaled into flow-compensated
//! units, and fit to the inertial-convective power law:
//!
//! ```no_run
//! use tchain_spectra::{
//!     average_spectra, compute_spectra, fit_inertial_subrange, AverageParams, Section,
//!     SpectraParams, UniformFlow,
//! };
//!
//! # fn example(section: Section) -> tchain_spectra::SpectraResult<()> {
//! let params = SpectraParams {
//!     wave_contamination: true,
//!     ..Default::default()
//! };
//! let spectra = compute_spectra(&section, &UniformFlow, &params)?;
//! let average = average_spectra(&spectra, &AverageParams::default())?;
//! let fit = fit_inertial_subrange(&average, 0.02, 0.2)?;
//! println!("spectral level {:?}", fit.level());
//! # Ok(())
//! # }
//! ```
//!
//! Everything runs synchronously over in-memory arrays; dataset loading and
//! flow-speed retrieval are the caller's concern (see [`flow`]).

mod error;
mod types;

pub mod dsp;
pub mod flow;

pub use dsp::spectra::{compute_spectra, SpectraParams, FC};
pub use dsp::turbulence::{
    average_spectra, background_gradient, fit_inertial_subrange, AverageParams,
    MIXING_EFFICIENCY, OBUKHOV_CORRSIN,
};
pub use error::{SpectraError, SpectraResult};
pub use flow::{AdcpFlow, FlowPastSensor, UniformFlow};
pub use types::{AveragedSpectrum, FitResult, Section, SpectraSet};

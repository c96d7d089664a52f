#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! SSINS computes the incoherent noise spectrum (INS) of radio interferometer
//! visibilities, a per channel, per timestep average over baselines of the
//! amplitude of sky-subtracted visibilities, which makes faint RFI stand out.
//!
//! # Examples
//!
//! Here's how to get a mean-subtracted spectrum from some visibilities
//!
//! ```rust
//! use ssins::{
//!     ndarray::{Array1, Array4},
//!     num_complex::Complex,
//!     sky_subtract, Ins, InsOptionsBuilder,
//! };
//!
//! // visibilities of shape (times, baselines, frequencies, polarizations)
//! let vis = Array4::from_shape_fn((8, 3, 4, 2), |(t, b, f, p)| {
//!     Complex::new((t * b + f) as f32, (p + t % 3) as f32)
//! });
//! let flags = Array4::from_elem(vis.dim(), false);
//!
//! // difference adjacent timesteps to remove the sky
//! let amps = sky_subtract(vis.view(), flags.view()).unwrap();
//!
//! // average over baselines, then fit and subtract a linear trend in each channel
//! let options = InsOptionsBuilder::default()
//!     .obs("1061313128")
//!     .order(1_usize)
//!     .pols(Some(vec![-5, -6]))
//!     .build()
//!     .unwrap();
//! let freq_array = Array1::linspace(167e6, 168e6, 4);
//! let ins = Ins::from_baseline_amps(amps, freq_array, options).unwrap();
//!
//! assert_eq!(ins.data_ms().shape(), &[7, 1, 4, 2]);
//! ```
//!
//! # Details
//!
//! The mean-subtracted spectrum is a z-score: a channel's samples are divided
//! by their mean (or polynomial fit) over time, less one, and scaled by the
//! square root of the number of baselines over the variance of a Rayleigh
//! distribution with unit mean. See <https://arxiv.org/abs/1906.01093>.

use lazy_static::lazy_static;
use std::{collections::HashMap, sync::Mutex, time::Duration};

pub use ndarray;
pub use num_complex;

pub mod constants;

pub mod error;
pub use error::SsinsError;

pub mod masked;
pub use masked::MaskedArray;

pub mod waterfall;
pub use waterfall::{sky_subtract, to_waterfall};

pub mod mean_subtract;
pub use mean_subtract::{mean_subtract, polyfit, polyval};

pub mod ins;
pub use ins::{Ins, InsInput, InsOptions, InsOptionsBuilder};

pub mod events;
pub use events::{Event, EventSource, PickledEvents};

pub mod brightness;
pub use brightness::{
    aggregate_brightness, event_brightness, run_brightness, BrightDict, BrightnessConfig,
    BrightnessConfigBuilder,
};

pub mod io;
pub use io::{make_obslist, read_paths_construct, ReadPaths};

#[cfg(feature = "cli")]
pub mod cli;

lazy_static! {
    #[doc(hidden)]
    pub static ref DURATIONS: Mutex<HashMap<String, Duration>> = Mutex::new(HashMap::new());
}

/// Time the statements, adding the elapsed time to the named total in
/// [`get_durations`]. Evaluates to the value of the last statement.
#[macro_export]
macro_rules! with_increment_duration {
    ($name:expr, $($s:stmt);+ $(;)?) => {
        {
            let _now = std::time::Instant::now();
            let _res = {
                $(
                    $s
                );*
            };
            $crate::increment_duration($name, _now.elapsed());
            _res
        }
    };
}

/// Add `elapsed` to the named total in [`get_durations`].
#[doc(hidden)]
pub fn increment_duration(name: &str, elapsed: Duration) {
    if let Ok(mut durations) = DURATIONS.lock() {
        *durations.entry(name.into()).or_default() += elapsed;
    }
}

/// The total time spent in each named [`with_increment_duration!`] block so far.
pub fn get_durations() -> HashMap<String, Duration> {
    DURATIONS
        .lock()
        .map(|durations| durations.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_increment_duration_accumulates() {
        let value = with_increment_duration!("test_accumulates", 1 + 1);
        assert_eq!(value, 2);
        with_increment_duration!("test_accumulates", std::thread::sleep(Duration::from_millis(2)));
        let durations = get_durations();
        assert!(durations["test_accumulates"] >= Duration::from_millis(2));
    }
}

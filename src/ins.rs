//! The incoherent noise spectrum (INS) of an observation.

use std::{
    fmt::{Debug, Display},
    path::PathBuf,
};

use crate::{
    error::BadArrayShape, events::Event, io::PolyCoeffWriter, masked::MaskedArray,
    mean_subtract::mean_subtract, waterfall::to_waterfall, SsinsError,
};
use derive_builder::Builder;
use log::{debug, trace};
use ndarray::{Array1, Array4, ArrayView4, Axis, Dimension, Ix4};

/// What an [`Ins`] is constructed from.
pub enum InsInput {
    /// Amplitudes which still have a baseline axis, shape (times, baselines,
    /// frequencies, polarizations). These are averaged over baselines.
    Baseline(MaskedArray<f64, Ix4>),
    /// A spectrum which has already been reduced over baselines, shape
    /// (times, 1, frequencies, polarizations), and the number of baselines
    /// which contributed to each element.
    Waterfall {
        /// The spectrum
        data: MaskedArray<f64, Ix4>,
        /// The number of baselines in each element of `data`
        count_array: Array4<u32>,
    },
}

/// Metadata and options for an [`Ins`].
#[derive(Builder, Debug, Default, Clone)]
#[builder(setter(into))]
pub struct InsOptions {
    /// The observation id
    #[builder(default)]
    pub obs: String,
    /// The base directory for data outputs
    #[builder(default)]
    pub outpath: PathBuf,
    /// The flag choice used when the visibilities were read
    #[builder(default)]
    pub flag_choice: String,
    /// The order of the polynomial fit for each frequency channel when
    /// calculating the mean-subtracted spectrum. 0 just takes the mean.
    #[builder(default)]
    pub order: usize,
    /// Whether to write out the polynomial fit coefficients
    #[builder(default)]
    pub coeff_write: bool,
    /// The AIPS codes of the polarizations, in the order of the data
    #[builder(default)]
    pub pols: Option<Vec<i32>>,
    /// The units of the visibilities
    #[builder(default)]
    pub vis_units: Option<String>,
    /// Free text describing how the spectrum was made
    #[builder(default)]
    pub history: String,
}

/// An incoherent noise spectrum, its baseline counts, and its mean-subtracted
/// (z-score) counterpart.
///
/// `data_ms` is derived from `data`, `count_array` and the fit order, and is
/// recomputed by every method that changes them.
pub struct Ins {
    data: MaskedArray<f64, Ix4>,
    count_array: Array4<u32>,
    freq_array: Array1<f64>,
    order: usize,
    data_ms: MaskedArray<f64, Ix4>,

    /// The observation id
    pub obs: String,
    /// The base directory for data outputs
    pub outpath: PathBuf,
    /// The flag choice used when the visibilities were read
    pub flag_choice: String,
    /// Whether to write out polynomial fit coefficients
    pub coeff_write: bool,
    /// The AIPS codes of the polarizations
    pub pols: Option<Vec<i32>>,
    /// The units of the visibilities
    pub vis_units: Option<String>,
    /// How the spectrum was made and modified
    pub history: String,
    /// Events found by the match filter
    pub match_events: Vec<Event>,
    /// Events found by the chi-squared test
    pub chisq_events: Vec<Event>,
    /// Events found by the sample threshold test
    pub samp_thresh_events: Vec<Event>,
    /// Histogram counts of `data_ms`
    pub counts: Option<Array1<u64>>,
    /// Histogram bin edges of `data_ms`
    pub bins: Option<Array1<f64>>,
}

impl Ins {
    /// Create a new spectrum, and calculate its mean-subtracted spectrum.
    ///
    /// # Errors
    ///
    /// Will return [`BadArrayShape`] if the frequencies, polarizations or
    /// baseline counts are inconsistent with the data, or an
    /// [`crate::io::error::IOError`] if fit coefficients can't be written.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ssins::{Ins, InsInput, InsOptionsBuilder, MaskedArray, ndarray::{Array1, Array4}};
    ///
    /// let data = MaskedArray::from_data(Array4::from_elem((4, 1, 3, 1), 2.0));
    /// let count_array = Array4::from_elem((4, 1, 3, 1), 10);
    /// let freq_array = Array1::linspace(180e6, 182e6, 3);
    /// let options = InsOptionsBuilder::default().obs("1061313128").build().unwrap();
    ///
    /// let ins = Ins::new(InsInput::Waterfall { data, count_array }, freq_array, options).unwrap();
    /// assert_eq!(ins.data_ms().shape(), &[4, 1, 3, 1]);
    /// ```
    pub fn new(
        input: InsInput,
        freq_array: Array1<f64>,
        options: InsOptions,
    ) -> Result<Self, SsinsError> {
        let (data, count_array) = match input {
            InsInput::Baseline(amps) => {
                trace!("averaging {} baselines", amps.shape()[1]);
                to_waterfall(&amps)
            }
            InsInput::Waterfall { data, count_array } => (data, count_array),
        };

        let (_, num_spws, num_freqs, num_pols) = data.raw_dim().into_pattern();
        if num_spws != 1 {
            return Err(BadArrayShape {
                argument: "data",
                function: "Ins::new",
                expected: "(times, 1, frequencies, polarizations)".into(),
                received: format!("{:?}", data.shape()),
            }
            .into());
        }
        if count_array.shape() != data.shape() {
            return Err(BadArrayShape {
                argument: "count_array",
                function: "Ins::new",
                expected: format!("{:?}", data.shape()),
                received: format!("{:?}", count_array.shape()),
            }
            .into());
        }
        if freq_array.len() != num_freqs {
            return Err(BadArrayShape {
                argument: "freq_array",
                function: "Ins::new",
                expected: format!("[{}]", num_freqs),
                received: format!("{:?}", freq_array.shape()),
            }
            .into());
        }
        if let Some(pols) = options.pols.as_ref() {
            if pols.len() != num_pols {
                return Err(BadArrayShape {
                    argument: "pols",
                    function: "Ins::new",
                    expected: format!("[{}]", num_pols),
                    received: format!("[{}]", pols.len()),
                }
                .into());
            }
        }

        let InsOptions {
            obs,
            outpath,
            flag_choice,
            order,
            coeff_write,
            pols,
            vis_units,
            history,
        } = options;

        let mut result = Self {
            data_ms: MaskedArray::masked_from_elem(data.raw_dim(), 0.0),
            data,
            count_array,
            freq_array,
            order,
            obs,
            outpath,
            flag_choice,
            coeff_write,
            pols,
            vis_units,
            history,
            match_events: vec![],
            chisq_events: vec![],
            samp_thresh_events: vec![],
            counts: None,
            bins: None,
        };
        result.update_data_ms()?;
        Ok(result)
    }

    /// Average sky-subtracted amplitudes over baselines and build a spectrum
    /// from the result. See [`crate::sky_subtract`].
    ///
    /// # Errors
    ///
    /// see [`Ins::new`]
    pub fn from_baseline_amps(
        amps_tbfp: MaskedArray<f64, Ix4>,
        freq_array: Array1<f64>,
        options: InsOptions,
    ) -> Result<Self, SsinsError> {
        Self::new(InsInput::Baseline(amps_tbfp), freq_array, options)
    }

    /// The spectrum, shape (times, 1, frequencies, polarizations).
    pub fn data(&self) -> &MaskedArray<f64, Ix4> {
        &self.data
    }

    /// The number of baselines that went into each element of the spectrum.
    pub fn count_array(&self) -> ArrayView4<u32> {
        self.count_array.view()
    }

    /// The frequencies of each channel in Hz.
    pub fn freq_array(&self) -> &Array1<f64> {
        &self.freq_array
    }

    /// The order of the polynomial fit used for mean subtraction.
    pub fn order(&self) -> usize {
        self.order
    }

    /// The mean-subtracted spectrum.
    pub fn data_ms(&self) -> &MaskedArray<f64, Ix4> {
        &self.data_ms
    }

    /// Change the fit order and recalculate the mean-subtracted spectrum.
    ///
    /// # Errors
    ///
    /// see [`mean_subtract`]
    pub fn set_order(&mut self, order: usize) -> Result<(), SsinsError> {
        self.order = order;
        self.update_data_ms()
    }

    fn update_data_ms(&mut self) -> Result<(), SsinsError> {
        let coeff_writer = if self.coeff_write {
            Some(PolyCoeffWriter {
                outpath: &self.outpath,
                obs: &self.obs,
                pols: self.pols.as_deref(),
            })
        } else {
            None
        };
        self.data_ms = mean_subtract(
            &self.data,
            self.count_array.view(),
            self.order,
            coeff_writer.as_ref(),
        )?;
        Ok(())
    }

    /// Flag every channel with a frequency strictly between `min_hz` and
    /// `max_hz`, then recalculate the mean-subtracted spectrum. Returns the
    /// number of channels flagged.
    ///
    /// # Errors
    ///
    /// see [`mean_subtract`]
    pub fn flag_freq_range(&mut self, min_hz: f64, max_hz: f64) -> Result<usize, SsinsError> {
        let chans: Vec<usize> = self
            .freq_array
            .iter()
            .enumerate()
            .filter(|(_, &freq_hz)| freq_hz > min_hz && freq_hz < max_hz)
            .map(|(idx, _)| idx)
            .collect();
        debug!("flagging channels {:?}", &chans);
        for &chan in &chans {
            self.data
                .mask_mut()
                .index_axis_mut(Axis(2), chan)
                .fill(true);
        }
        self.update_data_ms()?;
        self.history += &format!(
            "Manually flagged {} channels between {} and {} Hz. ",
            chans.len(),
            min_hz,
            max_hz
        );
        Ok(chans.len())
    }

    /// Histogram the unflagged, finite values of the mean-subtracted spectrum
    /// into `num_bins` equal width bins, setting `counts` and `bins`.
    ///
    /// As with `numpy.histogram`, the bins span the range of the values, the
    /// last bin includes its right edge, and an empty or constant spectrum gets
    /// a unit wide range.
    pub fn hist(&mut self, num_bins: usize) {
        let values: Vec<f64> = self
            .data_ms
            .compressed()
            .into_iter()
            .filter(|value| value.is_finite())
            .collect();
        let (mut lo, mut hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &value| {
                (lo.min(value), hi.max(value))
            });
        if values.is_empty() {
            lo = 0.0;
            hi = 1.0;
        } else if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        let mut counts = Array1::<u64>::zeros(num_bins);
        if num_bins > 0 {
            let width = (hi - lo) / num_bins as f64;
            for value in values {
                let bin = (((value - lo) / width) as usize).min(num_bins - 1);
                counts[bin] += 1;
            }
        }
        self.counts = Some(counts);
        self.bins = Some(Array1::linspace(lo, hi, num_bins + 1));
    }

    /// The suffix which identifies this spectrum's output files: the optional
    /// `sig_thresh` label, followed by the kind of each non-empty event list.
    pub fn tag(&self, sig_thresh: Option<&str>) -> String {
        let mut tag = String::new();
        if let Some(sig_thresh) = sig_thresh {
            tag += &format!("_{}", sig_thresh);
        }
        for (subtag, events) in [
            ("match", &self.match_events),
            ("chisq", &self.chisq_events),
            ("samp_thresh", &self.samp_thresh_events),
        ] {
            if !events.is_empty() {
                tag += &format!("_{}", subtag);
            }
        }
        tag
    }
}

impl Display for Ins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (num_times, _, num_freqs, num_pols) = self.data.raw_dim().into_pattern();
        writeln!(f, "observation:          {}", self.obs)?;
        writeln!(f, "flag choice:          {}", self.flag_choice)?;
        writeln!(
            f,
            "shape:                {} times, {} channels, {} pols",
            num_times, num_freqs, num_pols
        )?;
        if let (Some(first), Some(last)) = (self.freq_array.first(), self.freq_array.last()) {
            writeln!(
                f,
                "frequencies:          {:.3} - {:.3} MHz",
                first / 1e6,
                last / 1e6
            )?;
        }
        writeln!(
            f,
            "flagged:              {} of {}",
            self.data.mask().len() - self.data.count(),
            self.data.mask().len()
        )?;
        if self.order == 0 {
            writeln!(f, "Will subtract the mean of each channel.")?;
        } else {
            writeln!(
                f,
                "Will subtract an order {} polynomial fit to each channel.",
                self.order
            )?;
        }
        Ok(())
    }
}

impl Debug for Ins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ins")
            .field("obs", &self.obs)
            .field("flag_choice", &self.flag_choice)
            .field("shape", &self.data.shape())
            .field("order", &self.order)
            .field("match_events", &self.match_events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FM_BAND_MAX_HZ, FM_BAND_MIN_HZ};
    use approx::assert_abs_diff_eq;
    use ndarray::{s, Array4};

    fn get_waterfall_ins(order: usize) -> Ins {
        let data = MaskedArray::from_data(Array4::from_shape_fn((6, 1, 4, 1), |(t, _, f, _)| {
            10.0 + f as f64 + (t % 2) as f64
        }));
        let count_array = Array4::from_elem((6, 1, 4, 1), 16);
        let freq_array = Array1::from(vec![86e6, 90e6, 100e6, 110e6]);
        let options = InsOptionsBuilder::default()
            .obs("1061313128")
            .order(order)
            .build()
            .unwrap();
        Ins::new(
            InsInput::Waterfall { data, count_array },
            freq_array,
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_coeff_write_on_new_and_set_order() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let (values, mut mask) = MaskedArray::from_data(Array4::from_shape_fn(
            (6, 1, 4, 2),
            |(t, _, f, p)| 10.0 + f as f64 + 0.2 * t as f64 + p as f64,
        ))
        .into_parts();
        // channel 3 forms a second mask group
        mask[[4, 0, 3, 0]] = true;
        mask[[4, 0, 3, 1]] = true;
        let data = MaskedArray::new(values, mask).unwrap();
        let count_array = Array4::from_elem((6, 1, 4, 2), 16);
        let options = InsOptionsBuilder::default()
            .obs("1061313128")
            .outpath(tmp_dir.path())
            .order(1_usize)
            .coeff_write(true)
            .pols(Some(vec![-5, -6]))
            .build()
            .unwrap();

        let mut ins = Ins::new(
            InsInput::Waterfall { data, count_array },
            Array1::linspace(167e6, 168e6, 4),
            options,
        )
        .unwrap();

        for pol in ["xx", "yy"] {
            let path = tmp_dir
                .path()
                .join(format!("1061313128_ms_poly_coeff_order_1_{}.npy", pol));
            let coeffs: ndarray::Array2<f64> = crate::io::read_pickle(&path).unwrap();
            assert_eq!(coeffs.dim(), (2, 1));
        }

        ins.set_order(2).unwrap();
        let path = tmp_dir
            .path()
            .join("1061313128_ms_poly_coeff_order_2_xx.npy");
        let coeffs: ndarray::Array2<f64> = crate::io::read_pickle(&path).unwrap();
        assert_eq!(coeffs.dim(), (3, 1));
    }

    #[test]
    fn test_new_from_baselines_reduces_baseline_axis() {
        let mut amps = Array4::from_elem((3, 4, 2, 1), 1.0);
        amps.slice_mut(s![.., 3, .., ..]).fill(5.0);
        let mut mask = Array4::from_elem((3, 4, 2, 1), false);
        mask.slice_mut(s![.., 0, 1, ..]).fill(true);
        let amps = MaskedArray::new(amps, mask).unwrap();

        let ins = Ins::new(
            InsInput::Baseline(amps),
            Array1::from(vec![1e8, 2e8]),
            InsOptions::default(),
        )
        .unwrap();

        assert_eq!(ins.data().shape(), &[3, 1, 2, 1]);
        assert_abs_diff_eq!(ins.data().data()[[0, 0, 0, 0]], 2.0);
        assert_abs_diff_eq!(ins.data().data()[[0, 0, 1, 0]], 7.0 / 3.0);
        assert_eq!(ins.count_array()[[0, 0, 0, 0]], 4);
        assert_eq!(ins.count_array()[[0, 0, 1, 0]], 3);
    }

    #[test]
    fn test_new_rejects_bad_freq_array() {
        let data = MaskedArray::from_data(Array4::<f64>::ones((2, 1, 3, 1)));
        let count_array = Array4::from_elem((2, 1, 3, 1), 1);
        let result = Ins::new(
            InsInput::Waterfall { data, count_array },
            Array1::zeros(2),
            InsOptions::default(),
        );
        assert!(matches!(
            result,
            Err(SsinsError::BadArrayShape(BadArrayShape {
                argument: "freq_array",
                ..
            }))
        ));
    }

    #[test]
    fn test_new_rejects_bad_pols() {
        let data = MaskedArray::from_data(Array4::<f64>::ones((2, 1, 3, 1)));
        let count_array = Array4::from_elem((2, 1, 3, 1), 1);
        let options = InsOptionsBuilder::default()
            .pols(Some(vec![-5, -6]))
            .build()
            .unwrap();
        assert!(Ins::new(
            InsInput::Waterfall { data, count_array },
            Array1::zeros(3),
            options
        )
        .is_err());
    }

    #[test]
    fn test_flag_freq_range_fm_band() {
        let mut ins = get_waterfall_ins(0);
        assert!(!ins.data_ms().all_masked());

        let num_flagged = ins.flag_freq_range(FM_BAND_MIN_HZ, FM_BAND_MAX_HZ).unwrap();

        assert_eq!(num_flagged, 2);
        for chan in 0..4 {
            let inside = chan == 1 || chan == 2;
            let data_mask = ins.data().mask().slice(s![.., 0, chan, 0]).to_owned();
            let ms_mask = ins.data_ms().mask().slice(s![.., 0, chan, 0]).to_owned();
            assert_eq!(data_mask.iter().all(|&flag| flag), inside);
            assert_eq!(ms_mask.iter().all(|&flag| flag), inside);
        }
        assert!(ins.history.contains("Manually flagged 2 channels"));
    }

    #[test]
    fn test_set_order_recomputes_data_ms() {
        let mut ins = get_waterfall_ins(0);
        let before = ins.data_ms().clone();
        ins.set_order(1).unwrap();
        assert_eq!(ins.order(), 1);
        assert_ne!(&before, ins.data_ms());
    }

    #[test]
    fn test_hist_counts_every_unflagged_value() {
        let mut ins = get_waterfall_ins(0);
        ins.flag_freq_range(FM_BAND_MIN_HZ, FM_BAND_MAX_HZ).unwrap();
        ins.hist(5);

        let counts = ins.counts.as_ref().unwrap();
        let bins = ins.bins.as_ref().unwrap();
        assert_eq!(counts.len(), 5);
        assert_eq!(bins.len(), 6);
        assert_eq!(counts.sum(), ins.data_ms().count() as u64);
        assert!(bins[0] <= bins[5]);
    }

    #[test]
    fn test_tag_lists_non_empty_events() {
        let mut ins = get_waterfall_ins(0);
        assert_eq!(ins.tag(None), "");
        assert_eq!(ins.tag(Some("5")), "_5");

        ins.match_events.push(Event {
            time: 0..1,
            freq: 0..2,
            shape: "TV6".into(),
            sig: Some(6.0),
        });
        ins.samp_thresh_events.push(Event {
            time: 1..2,
            freq: 0..1,
            shape: "samp_thresh".into(),
            sig: None,
        });
        assert_eq!(ins.tag(Some("5")), "_5_match_samp_thresh");
    }

    #[test]
    fn test_display_doesnt_crash() {
        let ins = get_waterfall_ins(2);
        let display = format!("{}", &ins);
        assert!(display.contains("1061313128"));
        assert!(display.contains("order 2 polynomial"));
    }
}

//! Sky subtraction and reduction along the baseline axis.
//!
//! Subtracting adjacent timesteps of each baseline removes the (slowly
//! varying) sky, leaving noise and RFI. Averaging the amplitudes of these
//! differences over baselines gives the incoherent noise spectrum.
//!
//! The algorithm is described in:
//! - <https://arxiv.org/abs/1906.01093>
//! - <https://ssins.readthedocs.io/en/latest/>

use crate::{error::BadArrayShape, masked::MaskedArray};
use log::trace;
use ndarray::{s, Array4, ArrayView4, Axis, Ix4, Zip};
use num_complex::Complex;

/// Difference adjacent timesteps of each baseline and take the amplitude.
///
/// `vis_tbfp` and `flags_tbfp` have shape (times, baselines, frequencies,
/// polarizations). The result has one fewer timestep, and a difference is
/// flagged if either of its samples is flagged.
///
/// # Errors
///
/// Will return [`BadArrayShape`] if the shapes of the arguments differ or if
/// there are fewer than two timesteps.
///
/// # Examples
///
/// ```rust
/// use ssins::{sky_subtract, ndarray::Array4, num_complex::Complex};
///
/// let vis = Array4::from_elem((3, 2, 4, 1), Complex::new(1.0_f32, 1.0));
/// let flags = Array4::from_elem((3, 2, 4, 1), false);
/// let diff = sky_subtract(vis.view(), flags.view()).unwrap();
/// assert_eq!(diff.shape(), &[2, 2, 4, 1]);
/// ```
pub fn sky_subtract(
    vis_tbfp: ArrayView4<Complex<f32>>,
    flags_tbfp: ArrayView4<bool>,
) -> Result<MaskedArray<f64, Ix4>, BadArrayShape> {
    if vis_tbfp.dim() != flags_tbfp.dim() {
        return Err(BadArrayShape {
            argument: "flags_tbfp",
            function: "sky_subtract",
            expected: format!("{:?}", vis_tbfp.dim()),
            received: format!("{:?}", flags_tbfp.dim()),
        });
    }
    let (num_timesteps, ..) = vis_tbfp.dim();
    if num_timesteps < 2 {
        return Err(BadArrayShape {
            argument: "vis_tbfp",
            function: "sky_subtract",
            expected: "at least 2 timesteps".into(),
            received: format!("{:?}", vis_tbfp.dim()),
        });
    }
    trace!("differencing {} timesteps", num_timesteps);

    let diff_amps = Zip::from(vis_tbfp.slice(s![1.., .., .., ..]))
        .and(vis_tbfp.slice(s![..-1, .., .., ..]))
        .map_collect(|&v1, &v0| (v1 - v0).norm() as f64);
    let diff_flags = Zip::from(flags_tbfp.slice(s![1.., .., .., ..]))
        .and(flags_tbfp.slice(s![..-1, .., .., ..]))
        .map_collect(|&f1, &f0| f1 || f0);

    MaskedArray::new(diff_amps, diff_flags)
}

/// Average amplitudes over the baseline axis.
///
/// `amps_tbfp` has shape (times, baselines, frequencies, polarizations). The
/// returned spectrum has shape (times, 1, frequencies, polarizations), flagged
/// wherever no baseline contributed, along with the number of unflagged
/// baselines that went into each element.
pub fn to_waterfall(amps_tbfp: &MaskedArray<f64, Ix4>) -> (MaskedArray<f64, Ix4>, Array4<u32>) {
    let baseline_axis = Axis(1);
    let spectrum = amps_tbfp.mean_axis(baseline_axis).insert_axis(baseline_axis);
    let count_array = amps_tbfp
        .count_axis(baseline_axis)
        .mapv(|count| count as u32)
        .insert_axis(baseline_axis);
    (spectrum, count_array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    #[test]
    fn test_sky_subtract_flags_either_sample() {
        let mut vis = Array4::from_elem((3, 1, 2, 1), Complex::new(0.0_f32, 0.0));
        vis[[1, 0, 0, 0]] = Complex::new(3.0, 4.0);
        let mut flags = Array4::from_elem((3, 1, 2, 1), false);
        flags[[2, 0, 1, 0]] = true;

        let diff = sky_subtract(vis.view(), flags.view()).unwrap();

        assert_eq!(diff.shape(), &[2, 1, 2, 1]);
        assert_abs_diff_eq!(diff.data()[[0, 0, 0, 0]], 5.0);
        assert_abs_diff_eq!(diff.data()[[1, 0, 0, 0]], 5.0);
        assert!(!diff.mask()[[0, 0, 1, 0]]);
        assert!(diff.mask()[[1, 0, 1, 0]]);
    }

    #[test]
    fn test_sky_subtract_needs_two_timesteps() {
        let vis = Array4::from_elem((1, 1, 2, 1), Complex::new(1.0_f32, 0.0));
        let flags = Array4::from_elem((1, 1, 2, 1), false);
        assert!(sky_subtract(vis.view(), flags.view()).is_err());
    }

    #[test]
    fn test_sky_subtract_rejects_mismatched_flags() {
        let vis = Array4::from_elem((2, 1, 2, 1), Complex::new(1.0_f32, 0.0));
        let flags = Array4::from_elem((2, 1, 3, 1), false);
        assert!(matches!(
            sky_subtract(vis.view(), flags.view()),
            Err(BadArrayShape {
                argument: "flags_tbfp",
                ..
            })
        ));
    }

    #[test]
    fn test_to_waterfall_counts_unflagged_baselines() {
        let mut data = Array4::<f64>::zeros((2, 3, 2, 1));
        data.slice_mut(s![.., 0, .., ..]).fill(1.0);
        data.slice_mut(s![.., 1, .., ..]).fill(2.0);
        data.slice_mut(s![.., 2, .., ..]).fill(6.0);
        let mut mask = Array4::from_elem((2, 3, 2, 1), false);
        // third baseline flagged in the first channel
        mask.slice_mut(s![.., 2, 0, ..]).fill(true);
        // everything flagged at the second time of the second channel
        mask.slice_mut(s![1, .., 1, ..]).fill(true);
        let amps = MaskedArray::new(data, mask).unwrap();

        let (spectrum, count_array) = to_waterfall(&amps);

        assert_eq!(spectrum.shape(), &[2, 1, 2, 1]);
        assert_abs_diff_eq!(spectrum.data()[[0, 0, 0, 0]], 1.5);
        assert_abs_diff_eq!(spectrum.data()[[0, 0, 1, 0]], 3.0);
        assert_eq!(count_array[[0, 0, 0, 0]], 2);
        assert_eq!(count_array[[0, 0, 1, 0]], 3);
        assert_eq!(count_array[[1, 0, 1, 0]], 0);
        assert!(spectrum.mask()[[1, 0, 1, 0]]);
        assert!(!spectrum.mask()[[1, 0, 0, 0]]);
    }
}

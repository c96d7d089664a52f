//! Standardising an incoherent noise spectrum.
//!
//! For a statistically clean observation, the incoherent mean of `N`
//! Rayleigh-distributed amplitudes has a fractional standard deviation of
//! `sqrt(C / N)`, where `C` is [`RAYLEIGH_VARIANCE_CORRECTION`]. Dividing each
//! sample by the expected value of its channel and rescaling by this factor
//! turns the spectrum into z-scores.
//!
//! The expected value is either the mean of each channel over time, or a
//! polynomial in time fitted to each channel by least squares.

use std::collections::BTreeMap;

use crate::{
    constants::RAYLEIGH_VARIANCE_CORRECTION, error::BadArrayShape, io::PolyCoeffWriter,
    masked::MaskedArray, SsinsError,
};
use log::{debug, trace};
use nalgebra::DMatrix;
use ndarray::{s, Array2, Array4, ArrayView2, ArrayView4, Axis, Dimension, Ix4, Zip};

/// Iteration cap for the SVD behind [`polyfit`].
const SVD_MAX_ITERATIONS: usize = 10_000;

/// The z-score of `value` given its expected value `mu` and the number of
/// baselines `num_baselines` which were averaged to produce it.
#[inline]
fn z_score(value: f64, mu: f64, num_baselines: u32) -> f64 {
    (value / mu - 1.0) * (num_baselines as f64 / RAYLEIGH_VARIANCE_CORRECTION).sqrt()
}

/// Calculate the mean-subtracted spectrum of `data`.
///
/// `data` and `count_array` have shape (times, spws, frequencies,
/// polarizations). With `order == 0` the expected value of each channel is
/// its mean over time; otherwise a polynomial of degree `order` in the
/// (1-based) time index is fitted to each channel. Channels which share a
/// time mask share a single least squares solve.
///
/// The result is flagged wherever `data` is flagged, wherever a channel has no
/// unflagged samples, and wherever the z-score is not finite (e.g. a zero
/// expected value). If `coeff_writer` is given, the fitted coefficients of each
/// polarization are written out before they are evaluated.
///
/// # Errors
///
/// Will return [`BadArrayShape`] if `count_array` does not match `data`, or an
/// [`crate::io::error::IOError`] if the coefficients can't be written.
pub fn mean_subtract(
    data: &MaskedArray<f64, Ix4>,
    count_array: ArrayView4<u32>,
    order: usize,
    coeff_writer: Option<&PolyCoeffWriter>,
) -> Result<MaskedArray<f64, Ix4>, SsinsError> {
    if data.shape() != count_array.shape() {
        return Err(BadArrayShape {
            argument: "count_array",
            function: "mean_subtract",
            expected: format!("{:?}", data.shape()),
            received: format!("{:?}", count_array.shape()),
        }
        .into());
    }

    let (result_data, result_mask) = if order == 0 {
        mean_subtract_mean(data, count_array)
    } else {
        mean_subtract_poly(data, count_array, order, coeff_writer)?
    };
    Ok(MaskedArray::new(result_data, result_mask)?)
}

fn mean_subtract_mean(
    data: &MaskedArray<f64, Ix4>,
    count_array: ArrayView4<u32>,
) -> (Array4<f64>, Array4<bool>) {
    let channel_means = data.mean_axis(Axis(0));
    let mut result_data = Array4::zeros(data.raw_dim());
    let mut result_mask = Array4::from_elem(data.raw_dim(), true);
    Zip::indexed(&mut result_data)
        .and(&mut result_mask)
        .for_each(|(t, s, f, p), value, flag| {
            if data.mask()[[t, s, f, p]] || channel_means.mask()[[s, f, p]] {
                return;
            }
            let z = z_score(
                data.data()[[t, s, f, p]],
                channel_means.data()[[s, f, p]],
                count_array[[t, s, f, p]],
            );
            if z.is_finite() {
                *value = z;
                *flag = false;
            }
        });
    (result_data, result_mask)
}

fn mean_subtract_poly(
    data: &MaskedArray<f64, Ix4>,
    count_array: ArrayView4<u32>,
    order: usize,
    coeff_writer: Option<&PolyCoeffWriter>,
) -> Result<(Array4<f64>, Array4<bool>), SsinsError> {
    let (num_times, num_spws, num_freqs, num_pols) = data.raw_dim().into_pattern();
    // make sure x is never zero, so the fit is well conditioned.
    let x: Vec<f64> = (1..=num_times).map(|t| t as f64).collect();
    let mut result_data = Array4::zeros(data.raw_dim());
    let mut result_mask = Array4::from_elem(data.raw_dim(), true);

    for spw_idx in 0..num_spws {
        for pol_idx in 0..num_pols {
            let y = data.data().slice(s![.., spw_idx, .., pol_idx]);
            let y_mask = data.mask().slice(s![.., spw_idx, .., pol_idx]);

            // only fit channels that are not fully flagged, grouped by their mask.
            let mut mask_groups: BTreeMap<Vec<bool>, Vec<usize>> = BTreeMap::new();
            for freq_idx in 0..num_freqs {
                let chan_mask = y_mask.column(freq_idx);
                if chan_mask.iter().all(|&flag| flag) {
                    continue;
                }
                mask_groups
                    .entry(chan_mask.to_vec())
                    .or_default()
                    .push(freq_idx);
            }
            debug!(
                "pol {}: fitting {} mask groups of order {}",
                pol_idx,
                mask_groups.len(),
                order
            );

            for (row_mask, chans) in mask_groups {
                let y_group =
                    Array2::from_shape_fn((num_times, chans.len()), |(t, c)| y[[t, chans[c]]]);
                let coeffs = polyfit(&x, y_group.view(), &row_mask, order)?;
                if let Some(writer) = coeff_writer {
                    writer.write(order, pol_idx, coeffs.view())?;
                }
                let mu = polyval(coeffs.view(), &x);
                trace!("fitted channels {:?}", &chans);

                for (chan_idx, &freq_idx) in chans.iter().enumerate() {
                    for (t, &flagged) in row_mask.iter().enumerate() {
                        if flagged {
                            continue;
                        }
                        let z = z_score(
                            y[[t, freq_idx]],
                            mu[[t, chan_idx]],
                            count_array[[t, spw_idx, freq_idx, pol_idx]],
                        );
                        if z.is_finite() {
                            result_data[[t, spw_idx, freq_idx, pol_idx]] = z;
                            result_mask[[t, spw_idx, freq_idx, pol_idx]] = false;
                        }
                    }
                }
            }
        }
    }

    Ok((result_data, result_mask))
}

/// Least squares fit of a polynomial of degree `order` to each column of `y`,
/// ignoring the rows where `row_mask` is `true`.
///
/// Returns coefficients of shape `(order + 1, y.ncols())`, highest power first
/// (the same convention as `numpy.polyfit`). If the fit can't be made (no
/// unflagged rows, a Vandermonde matrix which overflows, or the solve fails)
/// every coefficient is NaN.
///
/// # Errors
///
/// Will return [`BadArrayShape`] if `row_mask` or the rows of `y` don't match
/// the length of `x`.
///
/// # Examples
///
/// ```rust
/// use ssins::{polyfit, polyval, ndarray::array};
/// use approx::assert_abs_diff_eq;
///
/// let x = [1.0, 2.0, 3.0, 4.0];
/// // y = 2x + 1
/// let y = array![[3.0], [5.0], [7.0], [9.0]];
/// let coeffs = polyfit(&x, y.view(), &[false; 4], 1).unwrap();
/// assert_abs_diff_eq!(coeffs[[0, 0]], 2.0, epsilon = 1e-10);
/// assert_abs_diff_eq!(coeffs[[1, 0]], 1.0, epsilon = 1e-10);
/// assert_abs_diff_eq!(polyval(coeffs.view(), &[5.0])[[0, 0]], 11.0, epsilon = 1e-10);
/// ```
pub fn polyfit(
    x: &[f64],
    y: ArrayView2<f64>,
    row_mask: &[bool],
    order: usize,
) -> Result<Array2<f64>, BadArrayShape> {
    if row_mask.len() != x.len() {
        return Err(BadArrayShape {
            argument: "row_mask",
            function: "polyfit",
            expected: format!("({},)", x.len()),
            received: format!("({},)", row_mask.len()),
        });
    }
    if y.nrows() != x.len() {
        return Err(BadArrayShape {
            argument: "y",
            function: "polyfit",
            expected: format!("({}, _)", x.len()),
            received: format!("{:?}", y.shape()),
        });
    }
    let num_coeffs = order + 1;
    let num_cols = y.ncols();
    let rows: Vec<usize> = (0..x.len()).filter(|&row| !row_mask[row]).collect();
    let failed = Array2::from_elem((num_coeffs, num_cols), f64::NAN);
    if rows.is_empty() {
        return Ok(failed);
    }

    // Vandermonde matrix, with each column scaled to unit norm.
    let mut lhs = DMatrix::from_fn(rows.len(), num_coeffs, |r, c| {
        x[rows[r]].powi((order - c) as i32)
    });
    let scales: Vec<f64> = lhs.column_iter().map(|col| col.norm()).collect();
    for (mut col, &scale) in lhs.column_iter_mut().zip(scales.iter()) {
        if scale > 0.0 {
            col /= scale;
        }
    }
    // x^order can overflow, and the SVD never converges on a non-finite matrix.
    if scales.iter().any(|scale| !scale.is_finite()) || lhs.iter().any(|v| !v.is_finite()) {
        debug!("polyfit of order {} overflowed over {} rows", order, rows.len());
        return Ok(failed);
    }
    let rhs = DMatrix::from_fn(rows.len(), num_cols, |r, c| y[[rows[r], c]]);

    let svd = match lhs.try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS) {
        Some(svd) => svd,
        None => {
            debug!("polyfit SVD did not converge for order {}", order);
            return Ok(failed);
        }
    };
    let rcond = rows.len() as f64 * f64::EPSILON * svd.singular_values.max();
    match svd.solve(&rhs, rcond) {
        Ok(solution) => Ok(Array2::from_shape_fn((num_coeffs, num_cols), |(k, c)| {
            if scales[k] > 0.0 {
                solution[(k, c)] / scales[k]
            } else {
                solution[(k, c)]
            }
        })),
        Err(e) => {
            debug!("polyfit solve failed: {}", e);
            Ok(failed)
        }
    }
}

/// Evaluate the polynomials described by each column of `coeffs` (highest
/// power first) at each of `x`. The result has shape `(x.len(), coeffs.ncols())`.
pub fn polyval(coeffs: ArrayView2<f64>, x: &[f64]) -> Array2<f64> {
    Array2::from_shape_fn((x.len(), coeffs.ncols()), |(t, c)| {
        coeffs
            .column(c)
            .iter()
            .fold(0.0, |acc, &coeff| acc * x[t] + coeff)
    })
}

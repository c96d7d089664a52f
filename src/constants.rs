// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.

use std::f64::consts::PI;

/// The variance of a Rayleigh-distributed amplitude divided by the square of
/// its mean, `4/π - 1`. Dividing the fractional deviation of an incoherent
/// mean by `sqrt(C / N)` turns it into a z-score.
pub const RAYLEIGH_VARIANCE_CORRECTION: f64 = 4.0 / PI - 1.0;

/// The broadband TV channel shapes whose events may already be counted under a
/// `broad` shape of the same channel.
pub const TV_MERGE_SHAPES: [&str; 3] = ["TV6", "TV7", "TV8"];

/// Prefix of the shape which absorbs [`TV_MERGE_SHAPES`] events.
pub const BROAD_SHAPE_PREFIX: &str = "broad";

/// Lower edge of the FM radio band in Hz.
pub const FM_BAND_MIN_HZ: f64 = 87.5e6;
/// Upper edge of the FM radio band in Hz.
pub const FM_BAND_MAX_HZ: f64 = 108e6;

/// Get the name of an AIPS polarization code, as used in pyuvdata's
/// `polarization_array`. Unknown codes are rendered as the number itself.
///
/// # Examples
///
/// ```rust
/// use ssins::constants::pol_name;
///
/// assert_eq!(pol_name(-5), "xx");
/// assert_eq!(pol_name(1), "pI");
/// assert_eq!(pol_name(42), "42");
/// ```
pub fn pol_name(code: i32) -> String {
    match code {
        1 => "pI",
        2 => "pQ",
        3 => "pU",
        4 => "pV",
        -1 => "rr",
        -2 => "ll",
        -3 => "rl",
        -4 => "lr",
        -5 => "xx",
        -6 => "yy",
        -7 => "xy",
        -8 => "yx",
        _ => return code.to_string(),
    }
    .to_string()
}

//! Arrays with a parallel flag mask.
//!
//! A [`MaskedArray`] pairs an [`ndarray::Array`] of values with a boolean
//! array of the same shape. `true` in the mask means the value is flagged and
//! takes no part in reductions.

use crate::error::BadArrayShape;
use itertools::izip;
use ndarray::{Array, Axis, Dimension, RemoveAxis, Zip};

/// An array of values and a mask of the same shape, `true` where flagged.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskedArray<A, D: Dimension> {
    data: Array<A, D>,
    mask: Array<bool, D>,
}

impl<A, D: Dimension> MaskedArray<A, D> {
    /// Pair `data` with `mask`.
    ///
    /// # Errors
    ///
    /// Will return [`BadArrayShape`] if the shapes differ.
    pub fn new(data: Array<A, D>, mask: Array<bool, D>) -> Result<Self, BadArrayShape> {
        if data.shape() != mask.shape() {
            return Err(BadArrayShape {
                argument: "mask",
                function: "MaskedArray::new",
                expected: format!("{:?}", data.shape()),
                received: format!("{:?}", mask.shape()),
            });
        }
        Ok(Self { data, mask })
    }

    /// Wrap `data` with nothing flagged.
    pub fn from_data(data: Array<A, D>) -> Self {
        let mask = Array::from_elem(data.raw_dim(), false);
        Self { data, mask }
    }

    /// The underlying values, flagged or not.
    pub fn data(&self) -> &Array<A, D> {
        &self.data
    }

    /// The flag mask.
    pub fn mask(&self) -> &Array<bool, D> {
        &self.mask
    }

    /// Mutable access to the flag mask. The shape can not be changed.
    pub fn mask_mut(&mut self) -> &mut Array<bool, D> {
        &mut self.mask
    }

    /// Consume into `(data, mask)`.
    pub fn into_parts(self) -> (Array<A, D>, Array<bool, D>) {
        (self.data, self.mask)
    }

    /// The shape of both arrays.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// The dimension of both arrays.
    pub fn raw_dim(&self) -> D {
        self.data.raw_dim()
    }

    /// Whether every element is flagged. An empty array counts as fully flagged.
    pub fn all_masked(&self) -> bool {
        self.mask.iter().all(|&flag| flag)
    }

    /// The number of unflagged elements.
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&flag| !flag).count()
    }

    /// Insert a new axis of length 1 at `axis` in both arrays.
    pub fn insert_axis(self, axis: Axis) -> MaskedArray<A, D::Larger> {
        MaskedArray {
            data: self.data.insert_axis(axis),
            mask: self.mask.insert_axis(axis),
        }
    }

    /// The number of unflagged elements along `axis`.
    pub fn count_axis(&self, axis: Axis) -> Array<usize, D::Smaller>
    where
        D: RemoveAxis,
    {
        self.mask
            .map_axis(axis, |flags| flags.iter().filter(|&&flag| !flag).count())
    }
}

impl<A: Clone, D: Dimension> MaskedArray<A, D> {
    /// A fully flagged array of `dim`, with every value set to `fill`.
    pub fn masked_from_elem(dim: D, fill: A) -> Self {
        Self {
            data: Array::from_elem(dim.clone(), fill),
            mask: Array::from_elem(dim, true),
        }
    }

    /// The unflagged values, in logical order.
    pub fn compressed(&self) -> Vec<A> {
        izip!(self.data.iter(), self.mask.iter())
            .filter(|(_, &flag)| !flag)
            .map(|(value, _)| value.clone())
            .collect()
    }

    /// A copy of the data with flagged values replaced by `fill`.
    pub fn filled(&self, fill: A) -> Array<A, D> {
        let mut result = self.data.clone();
        Zip::from(&mut result).and(&self.mask).for_each(|value, &flag| {
            if flag {
                *value = fill.clone();
            }
        });
        result
    }
}

impl<D: Dimension> MaskedArray<f64, D> {
    /// The mean of the unflagged values along `axis`. Lanes with no unflagged
    /// values are flagged in the result.
    pub fn mean_axis(&self, axis: Axis) -> MaskedArray<f64, D::Smaller>
    where
        D: RemoveAxis,
    {
        let dim = self.data.raw_dim().remove_axis(axis);
        let mut mean = Array::zeros(dim.clone());
        let mut mask = Array::from_elem(dim, true);
        Zip::from(&mut mean)
            .and(&mut mask)
            .and(self.data.lanes(axis))
            .and(self.mask.lanes(axis))
            .for_each(|mean, mask, values, flags| {
                let (sum, count) = izip!(values, flags)
                    .filter(|(_, &flag)| !flag)
                    .fold((0.0, 0_usize), |(sum, count), (&value, _)| {
                        (sum + value, count + 1)
                    });
                if count > 0 {
                    *mean = sum / count as f64;
                    *mask = false;
                }
            });
        MaskedArray { data: mean, mask }
    }
}

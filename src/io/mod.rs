//! Reading and writing incoherent noise spectra and their products.
//!
//! Output layout under a base directory `outpath`:
//!
//! ```text
//! {outpath}/arrs/{obs}_{flag_choice}_INS_{attr}{tag}.npym   data, data_ms, Nbls
//! {outpath}/arrs/{obs}_{flag_choice}_INS_{attr}{tag}.npy    counts, bins
//! {outpath}/arrs/{obs}_{flag_choice}_INS_match_events{tag}.pik
//! {outpath}/metadata/{obs}_{attr}.npy                       freq_array, pols, vis_units
//! {outpath}/{obs}_ms_poly_coeff_order_{order}_{pol}.npy     polynomial fit coefficients
//! ```
//!
//! `.npym` files are pickled masked arrays (`{data, mask}`), `.pik` files are
//! pickled values, and `.npy` files are plain NumPy arrays.

pub mod error;

use std::{
    collections::BTreeMap,
    fs::{create_dir_all, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, trace, warn};
use ndarray::{Array1, Array4, ArrayView2, Ix1, Ix4};
use ndarray_npy::{read_npy, write_npy, ReadableElement, WritableElement};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    constants::pol_name,
    events::Event,
    ins::{Ins, InsInput, InsOptions},
    masked::MaskedArray,
    SsinsError,
};

use self::error::IOError;

/// Attributes which must be given a path in [`Ins::read`].
pub const REQUIRED_READ_ATTRS: [&str; 3] = ["data", "Nbls", "freq_array"];
/// Attributes which may be given a path in [`Ins::read`].
pub const OPTIONAL_READ_ATTRS: [&str; 2] = ["pols", "vis_units"];

/// A mapping from attribute name to the file it should be read from.
pub type ReadPaths = BTreeMap<String, PathBuf>;

/// The name of a file under `arrs/` for the attribute `attr` of a spectrum.
pub fn arr_filename(obs: &str, flag_choice: &str, attr: &str, tag: &str, ext: &str) -> String {
    format!("{}_{}_INS_{}{}.{}", obs, flag_choice, attr, tag, ext)
}

/// The name of a file under `metadata/` for the attribute `attr`.
pub fn metadata_filename(obs: &str, attr: &str) -> String {
    format!("{}_{}.npy", obs, attr)
}

fn create_file(path: &Path) -> Result<BufWriter<File>, IOError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| IOError::FileIO {
            source,
            path: path.to_path_buf(),
        })
}

fn open_file(path: &Path) -> Result<BufReader<File>, IOError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| IOError::FileIO {
            source,
            path: path.to_path_buf(),
        })
}

/// Pickle `value` to `path`, overwriting it.
///
/// # Errors
///
/// Will return [`IOError`] if the file can't be created or written.
pub fn write_pickle<T: Serialize>(path: &Path, value: &T) -> Result<(), IOError> {
    trace!("pickling {}", path.display());
    let mut writer = create_file(path)?;
    serde_pickle::to_writer(&mut writer, value, serde_pickle::SerOptions::new()).map_err(
        |source| IOError::Pickle {
            source,
            path: path.to_path_buf(),
        },
    )?;
    writer.flush().map_err(|source| IOError::FileIO {
        source,
        path: path.to_path_buf(),
    })
}

/// Unpickle a value from `path`.
///
/// # Errors
///
/// Will return [`IOError`] if the file can't be opened or doesn't hold a `T`.
pub fn read_pickle<T: DeserializeOwned>(path: &Path) -> Result<T, IOError> {
    trace!("unpickling {}", path.display());
    let reader = open_file(path)?;
    serde_pickle::from_reader(reader, serde_pickle::DeOptions::new()).map_err(|source| {
        IOError::Pickle {
            source,
            path: path.to_path_buf(),
        }
    })
}

fn save_npy<A: WritableElement, D: ndarray::Dimension>(
    path: &Path,
    array: &ndarray::Array<A, D>,
) -> Result<(), IOError> {
    trace!("writing {}", path.display());
    write_npy(path, array).map_err(|source| IOError::WriteNpy {
        source,
        path: path.to_path_buf(),
    })
}

fn load_npy<A: ReadableElement, D: ndarray::Dimension>(
    path: &Path,
) -> Result<ndarray::Array<A, D>, IOError> {
    trace!("reading {}", path.display());
    read_npy(path).map_err(|source| IOError::ReadNpy {
        source,
        path: path.to_path_buf(),
    })
}

#[derive(Serialize)]
struct MaskedBlobRef<'a, A> {
    data: &'a Array4<A>,
    mask: Option<&'a Array4<bool>>,
}

#[derive(Deserialize)]
struct MaskedBlob<A> {
    data: Array4<A>,
    mask: Option<Array4<bool>>,
}

fn write_masked<A: Serialize>(
    path: &Path,
    data: &Array4<A>,
    mask: Option<&Array4<bool>>,
) -> Result<(), IOError> {
    write_pickle(path, &MaskedBlobRef { data, mask })
}

fn is_npym(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "npym")
}

/// Read a 4D array and its mask from a `.npym` blob or a plain `.npy` file.
fn read_masked<A>(path: &Path) -> Result<(Array4<A>, Option<Array4<bool>>), IOError>
where
    A: DeserializeOwned + ReadableElement,
{
    if is_npym(path) {
        let MaskedBlob { data, mask } = read_pickle::<MaskedBlob<A>>(path)?;
        Ok((data, mask))
    } else {
        Ok((load_npy::<A, Ix4>(path)?, None))
    }
}

/// Writes the polynomial fit coefficients produced during mean subtraction.
#[derive(Debug, Clone, Copy)]
pub struct PolyCoeffWriter<'a> {
    /// The base directory to write into
    pub outpath: &'a Path,
    /// The observation id
    pub obs: &'a str,
    /// AIPS codes of the polarizations, used to name the files
    pub pols: Option<&'a [i32]>,
}

impl PolyCoeffWriter<'_> {
    /// The path that coefficients for `order` and `pol_idx` are written to.
    pub fn path(&self, order: usize, pol_idx: usize) -> PathBuf {
        let pol = match self.pols.and_then(|pols| pols.get(pol_idx)) {
            Some(&code) => pol_name(code),
            None => pol_idx.to_string(),
        };
        self.outpath
            .join(format!("{}_ms_poly_coeff_order_{}_{}.npy", self.obs, order, pol))
    }

    /// Pickle `coeffs`, shape (order + 1, channels), highest power first.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the file can't be written.
    pub fn write(
        &self,
        order: usize,
        pol_idx: usize,
        coeffs: ArrayView2<f64>,
    ) -> Result<(), IOError> {
        write_pickle(&self.path(order, pol_idx), &coeffs.to_owned())
    }
}

impl Ins {
    /// Write out the spectrum and its products under `outpath`, see the
    /// [module docs](crate::io) for the layout. Existing files are overwritten.
    ///
    /// `sig_thresh` is only used to tag the filenames, see [`Ins::tag`].
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if a directory or file can't be written.
    pub fn save(&self, sig_thresh: Option<&str>) -> Result<(), IOError> {
        let tag = self.tag(sig_thresh);
        let arrs_dir = self.outpath.join("arrs");
        let metadata_dir = self.outpath.join("metadata");
        for dir in [&arrs_dir, &metadata_dir] {
            create_dir_all(dir).map_err(|source| IOError::FileIO {
                source,
                path: dir.clone(),
            })?;
        }
        let arr_path = |attr: &str, ext: &str| {
            arrs_dir.join(arr_filename(&self.obs, &self.flag_choice, attr, &tag, ext))
        };

        debug!("saving {} with tag {:?}", self.obs, &tag);
        write_masked(
            &arr_path("data", "npym"),
            self.data().data(),
            Some(self.data().mask()),
        )?;
        write_masked(
            &arr_path("data_ms", "npym"),
            self.data_ms().data(),
            Some(self.data_ms().mask()),
        )?;
        write_masked(&arr_path("Nbls", "npym"), &self.count_array().to_owned(), None)?;

        if let Some(counts) = self.counts.as_ref() {
            save_npy(&arr_path("counts", "npy"), counts)?;
        }
        if let Some(bins) = self.bins.as_ref() {
            save_npy(&arr_path("bins", "npy"), bins)?;
        }
        if !self.match_events.is_empty() {
            write_pickle(&arr_path("match_events", "pik"), &self.match_events)?;
        }

        save_npy(
            &metadata_dir.join(metadata_filename(&self.obs, "freq_array")),
            self.freq_array(),
        )?;
        if let Some(pols) = self.pols.as_ref() {
            save_npy(
                &metadata_dir.join(metadata_filename(&self.obs, "pols")),
                &Array1::from(pols.clone()),
            )?;
        }
        if let Some(vis_units) = self.vis_units.as_ref() {
            save_npy(
                &metadata_dir.join(metadata_filename(&self.obs, "vis_units")),
                &Array1::from(vis_units.as_bytes().to_vec()),
            )?;
        }
        Ok(())
    }

    /// Read a spectrum from the files in `read_paths`, keyed by attribute name.
    ///
    /// `data`, `Nbls` and `freq_array` are required. `pols` and `vis_units` are
    /// optional, and override any values in `options` when given. `data` and
    /// `Nbls` may be `.npym` blobs or plain `.npy` files; plain data is
    /// unflagged.
    ///
    /// # Errors
    ///
    /// Will return [`IOError::MissingReadPath`] if a required attribute has no
    /// path, an [`IOError`] if a file can't be read, or a
    /// [`crate::error::BadArrayShape`] if the arrays are inconsistent.
    pub fn read(read_paths: &ReadPaths, options: InsOptions) -> Result<Self, SsinsError> {
        for attr in REQUIRED_READ_ATTRS {
            if !read_paths.contains_key(attr) {
                return Err(IOError::MissingReadPath { attr: attr.into() }.into());
            }
        }
        let mut options = options;
        for attr in OPTIONAL_READ_ATTRS {
            match read_paths.get(attr) {
                None => warn!(
                    "no path to a numpy loadable {} file in read_paths, it will be unset",
                    attr
                ),
                Some(path) if attr == "pols" => {
                    options.pols = Some(load_npy::<i32, Ix1>(path)?.to_vec());
                }
                Some(path) => {
                    let bytes = load_npy::<u8, Ix1>(path)?.to_vec();
                    options.vis_units = Some(
                        String::from_utf8(bytes)
                            .map_err(|_| IOError::InvalidUtf8 { path: path.clone() })?,
                    );
                }
            }
        }

        let (data, mask) = read_masked::<f64>(&read_paths["data"])?;
        let data = match mask {
            Some(mask) => MaskedArray::new(data, mask)?,
            None => MaskedArray::from_data(data),
        };
        let (count_array, _) = read_masked::<u32>(&read_paths["Nbls"])?;
        let freq_array = load_npy::<f64, Ix1>(&read_paths["freq_array"])?;

        Self::new(
            InsInput::Waterfall { data, count_array },
            freq_array,
            options,
        )
    }

    /// Load match events pickled by [`Ins::save`] from `path`.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the file can't be read.
    pub fn read_match_events(path: &Path) -> Result<Vec<Event>, IOError> {
        read_pickle(path)
    }
}

/// Build the [`ReadPaths`] for a spectrum saved by [`Ins::save`] under `indir`.
///
/// `data` and `Nbls` prefer a `.npym` file, falling back to `.npy` when only
/// that exists. Optional metadata is only included when its file exists.
pub fn read_paths_construct(indir: &Path, flag_choice: &str, obs: &str, tag: &str) -> ReadPaths {
    let mut read_paths = ReadPaths::new();
    for attr in ["data", "Nbls"] {
        let npym = indir
            .join("arrs")
            .join(arr_filename(obs, flag_choice, attr, tag, "npym"));
        let npy = npym.with_extension("npy");
        let path = if !npym.exists() && npy.exists() { npy } else { npym };
        read_paths.insert(attr.into(), path);
    }
    read_paths.insert(
        "freq_array".into(),
        indir
            .join("metadata")
            .join(metadata_filename(obs, "freq_array")),
    );
    for attr in OPTIONAL_READ_ATTRS {
        let path = indir.join("metadata").join(metadata_filename(obs, attr));
        if path.exists() {
            read_paths.insert(attr.into(), path);
        }
    }
    read_paths
}

/// Read a list of observation ids, one per line. Blank lines are skipped.
///
/// # Errors
///
/// Will return [`IOError::FileIO`] if the file can't be read.
pub fn make_obslist(path: &Path) -> Result<Vec<String>, IOError> {
    let reader = open_file(path)?;
    let mut obslist = vec![];
    for line in reader.lines() {
        let line = line.map_err(|source| IOError::FileIO {
            source,
            path: path.to_path_buf(),
        })?;
        let obs = line.trim();
        if !obs.is_empty() {
            obslist.push(obs.to_string());
        }
    }
    Ok(obslist)
}

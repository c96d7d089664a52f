//! Summed brightness of RFI events across a list of observations.

use std::{
    collections::BTreeMap,
    fmt::Display,
    fs::create_dir_all,
    path::PathBuf,
};

use derive_builder::Builder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, trace};
use ndarray::{s, Dimension};

use crate::{
    constants::{BROAD_SHAPE_PREFIX, TV_MERGE_SHAPES},
    events::{Event, EventSource},
    ins::{Ins, InsOptions},
    io::{error::IOError, make_obslist, read_paths_construct, write_pickle},
    with_increment_duration, SsinsError,
};

/// The file the brightness dictionary is written to under the output directory.
pub const BRIGHT_DICT_FILENAME: &str = "bright_dict.pik";

/// Brightness sums keyed by significance threshold, then shape, then
/// observation id.
pub type BrightDict = BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>;

/// Options for summing event brightness over a list of observations.
#[derive(Builder, Debug, Default, Clone)]
#[builder(setter(into))]
pub struct BrightnessConfig {
    /// A file with one observation id per line
    pub obsfile: PathBuf,
    /// The names of the shapes to sum
    pub shapes: Vec<String>,
    /// The significance threshold label of the match filter
    #[builder(default = "\"5\".into()")]
    pub sig_thresh: String,
    /// The base directory of the saved spectra
    pub indir: PathBuf,
    /// The flag choice of the saved spectra
    pub flag_choice: String,
    /// The directory to write the brightness dictionary into
    pub outdir: PathBuf,
    /// The filename tag of the saved spectra, e.g. "_5_match"
    #[builder(default)]
    pub tag: String,
    /// The order of the mean subtraction fit used when reading spectra
    #[builder(default)]
    pub order: usize,
    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl Display for BrightnessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Will sum the brightness of shapes {:?} at sig_thresh {}.",
            self.shapes, self.sig_thresh
        )?;
        writeln!(
            f,
            "Will read {} spectra from {} with tag {:?}.",
            self.flag_choice,
            self.indir.display(),
            self.tag
        )?;
        writeln!(
            f,
            "Will write {}",
            self.outdir.join(BRIGHT_DICT_FILENAME).display()
        )?;
        Ok(())
    }
}

fn broad_shape_for(shape: &str) -> Option<String> {
    if TV_MERGE_SHAPES.contains(&shape) {
        shape
            .chars()
            .last()
            .map(|chan| format!("{}{}", BROAD_SHAPE_PREFIX, chan))
    } else {
        None
    }
}

/// Sum the raw spectrum, all polarizations, flagged or not, over every event
/// of `shape` in `events`. Event windows are clipped to the spectrum.
///
/// A `TV6`, `TV7` or `TV8` event is skipped when a `broad6`, `broad7` or
/// `broad8` event (matching the channel) covers the same timesteps, so the
/// same RFI is not counted as both.
pub fn event_brightness(ins: &Ins, events: &[Event], shape: &str) -> f64 {
    let broad_events: Vec<&Event> = match broad_shape_for(shape) {
        Some(broad_shape) => events
            .iter()
            .filter(|event| event.shape == broad_shape)
            .collect(),
        None => vec![],
    };
    let (num_times, _, num_freqs, _) = ins.data().raw_dim().into_pattern();
    let clip = |range: &std::ops::Range<usize>, len: usize| {
        range.start.min(len)..range.end.min(len).max(range.start.min(len))
    };

    events
        .iter()
        .filter(|event| event.shape == shape)
        .filter(|event| {
            let merged = broad_events.iter().any(|broad| event.same_time(broad));
            if merged {
                trace!("skipping {} event at {:?}", shape, event.time);
            }
            !merged
        })
        .map(|event| {
            let time = clip(&event.time, num_times);
            let freq = clip(&event.freq, num_freqs);
            ins.data().data().slice(s![time, 0, freq, ..]).sum()
        })
        .sum()
}

/// An empty dictionary with an entry for every shape in `config`.
pub fn new_bright_dict(config: &BrightnessConfig) -> BrightDict {
    let shapes = config
        .shapes
        .iter()
        .map(|shape| (shape.clone(), BTreeMap::new()))
        .collect();
    BTreeMap::from([(config.sig_thresh.clone(), shapes)])
}

/// Record the brightness of each shape in `config` for observation `obs`.
pub fn add_observation(
    bright_dict: &mut BrightDict,
    config: &BrightnessConfig,
    obs: &str,
    ins: &Ins,
    events: &[Event],
) {
    let by_shape = bright_dict.entry(config.sig_thresh.clone()).or_default();
    for shape in &config.shapes {
        let brightness = event_brightness(ins, events, shape);
        debug!("{} {}: {}", obs, shape, brightness);
        by_shape
            .entry(shape.clone())
            .or_default()
            .insert(obs.to_string(), brightness);
    }
}

/// Build the brightness dictionary for `observations` of (id, spectrum,
/// match events).
pub fn aggregate_brightness<'a, I>(config: &BrightnessConfig, observations: I) -> BrightDict
where
    I: IntoIterator<Item = (&'a str, &'a Ins, &'a [Event])>,
{
    let mut bright_dict = new_bright_dict(config);
    for (obs, ins, events) in observations {
        add_observation(&mut bright_dict, config, obs, ins, events);
    }
    bright_dict
}

/// Read each observation in `config.obsfile`, get its events from `source`,
/// sum their brightness and write the dictionary to `config.outdir`.
///
/// Spectra are read one at a time and dropped once summed.
///
/// # Errors
///
/// Will return [`SsinsError`] if an observation can't be read, its events
/// can't be produced, or the dictionary can't be written.
pub fn run_brightness(
    config: &BrightnessConfig,
    source: &dyn EventSource,
) -> Result<BrightDict, SsinsError> {
    let obslist = make_obslist(&config.obsfile)?;
    info!("summing event brightness of {} observations", obslist.len());

    let draw_target = if config.draw_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let obs_progress = ProgressBar::with_draw_target(Some(obslist.len() as u64), draw_target);
    obs_progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})",
            )
            .unwrap()
            .progress_chars("=> "),
    );
    obs_progress.set_message("observations");

    let mut bright_dict = new_bright_dict(config);
    for obs in &obslist {
        let read_paths = read_paths_construct(&config.indir, &config.flag_choice, obs, &config.tag);
        let options = InsOptions {
            obs: obs.clone(),
            outpath: config.outdir.clone(),
            flag_choice: config.flag_choice.clone(),
            order: config.order,
            ..Default::default()
        };
        let ins = with_increment_duration!("read", Ins::read(&read_paths, options)?);
        let events = with_increment_duration!("events", source.match_events(obs, &ins)?);
        with_increment_duration!(
            "brightness",
            add_observation(&mut bright_dict, config, obs, &ins, &events)
        );
        obs_progress.inc(1);
    }
    obs_progress.finish();

    create_dir_all(&config.outdir).map_err(|source| IOError::FileIO {
        source,
        path: config.outdir.clone(),
    })?;
    with_increment_duration!(
        "write",
        write_pickle(&config.outdir.join(BRIGHT_DICT_FILENAME), &bright_dict)?
    );
    Ok(bright_dict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ins::{InsInput, InsOptionsBuilder},
        io::read_pickle,
        masked::MaskedArray,
    };
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array4};
    use std::{fs::File, io::Write, path::Path};
    use tempfile::tempdir;

    /// Every element of (6, 1, 4, 2) is 1, except time 5 is 100.
    fn get_ins(obs: &str, outpath: &Path) -> Ins {
        let mut data = Array4::from_elem((6, 1, 4, 2), 1.0);
        data.slice_mut(s![5, .., .., ..]).fill(100.0);
        let mut mask = Array4::from_elem((6, 1, 4, 2), false);
        mask[[0, 0, 0, 0]] = true;
        let options = InsOptionsBuilder::default()
            .obs(obs)
            .outpath(outpath)
            .flag_choice("original")
            .build()
            .unwrap();
        Ins::new(
            InsInput::Waterfall {
                data: MaskedArray::new(data, mask).unwrap(),
                count_array: Array4::from_elem((6, 1, 4, 2), 10),
            },
            Array1::linspace(1.8e8, 1.83e8, 4),
            options,
        )
        .unwrap()
    }

    fn event(time: std::ops::Range<usize>, freq: std::ops::Range<usize>, shape: &str) -> Event {
        Event {
            time,
            freq,
            shape: shape.into(),
            sig: None,
        }
    }

    fn get_config(tmp: &Path, shapes: &[&str]) -> BrightnessConfig {
        BrightnessConfigBuilder::default()
            .obsfile(tmp.join("obs.txt"))
            .shapes(shapes.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .indir(tmp)
            .flag_choice("original")
            .outdir(tmp.join("out"))
            .draw_progress(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_event_brightness_sums_raw_data_over_pols() {
        let tmp_dir = tempdir().unwrap();
        let ins = get_ins("1061313128", tmp_dir.path());
        // includes the flagged element, 2 times * 2 chans * 2 pols
        let events = vec![event(0..2, 0..2, "point")];
        assert_abs_diff_eq!(event_brightness(&ins, &events, "point"), 8.0);
        assert_abs_diff_eq!(event_brightness(&ins, &events, "streak"), 0.0);
    }

    #[test]
    fn test_event_brightness_clips_to_spectrum() {
        let tmp_dir = tempdir().unwrap();
        let ins = get_ins("1061313128", tmp_dir.path());
        let events = vec![event(4..10, 3..10, "streak")];
        assert_abs_diff_eq!(event_brightness(&ins, &events, "streak"), 202.0);
    }

    #[test]
    fn test_tv_events_merged_into_broad() {
        let tmp_dir = tempdir().unwrap();
        let ins = get_ins("1061313128", tmp_dir.path());
        let events = vec![
            event(1..3, 0..4, "broad7"),
            event(1..3, 1..2, "TV7"),
            event(3..4, 1..2, "TV7"),
            event(1..3, 1..2, "TV6"),
        ];
        // the first TV7 event shares the times of the broad7 event
        assert_abs_diff_eq!(event_brightness(&ins, &events, "TV7"), 2.0);
        // broad6 is absent, so TV6 is kept
        assert_abs_diff_eq!(event_brightness(&ins, &events, "TV6"), 4.0);
        assert_abs_diff_eq!(event_brightness(&ins, &events, "broad7"), 16.0);
    }

    #[test]
    fn test_aggregate_brightness_layout() {
        let tmp_dir = tempdir().unwrap();
        let ins_a = get_ins("a", tmp_dir.path());
        let ins_b = get_ins("b", tmp_dir.path());
        let events_a = vec![event(5..6, 0..1, "TV7")];
        let events_b: Vec<Event> = vec![];
        let config = get_config(tmp_dir.path(), &["TV7", "broad7"]);

        let bright_dict = aggregate_brightness(
            &config,
            [
                ("a", &ins_a, events_a.as_slice()),
                ("b", &ins_b, events_b.as_slice()),
            ],
        );

        let by_shape = &bright_dict["5"];
        assert_eq!(by_shape.len(), 2);
        assert_abs_diff_eq!(by_shape["TV7"]["a"], 200.0);
        assert_abs_diff_eq!(by_shape["TV7"]["b"], 0.0);
        assert_abs_diff_eq!(by_shape["broad7"]["a"], 0.0);
    }

    #[test]
    fn test_run_brightness_writes_pickle() {
        let tmp_dir = tempdir().unwrap();
        let mut ins = get_ins("1061313128", tmp_dir.path());
        ins.match_events = vec![event(0..1, 1..3, "TV8")];
        ins.save(None).unwrap();
        let mut obsfile = File::create(tmp_dir.path().join("obs.txt")).unwrap();
        writeln!(obsfile, "1061313128").unwrap();

        let mut config = get_config(tmp_dir.path(), &["TV8"]);
        config.tag = "_match".into();
        let bright_dict = run_brightness(&config, &ins.match_events).unwrap();

        assert_abs_diff_eq!(bright_dict["5"]["TV8"]["1061313128"], 4.0);
        let read: BrightDict =
            read_pickle(&tmp_dir.path().join("out").join(BRIGHT_DICT_FILENAME)).unwrap();
        assert_eq!(read, bright_dict);
    }

    #[test]
    fn test_run_brightness_missing_spectrum() {
        let tmp_dir = tempdir().unwrap();
        let mut obsfile = File::create(tmp_dir.path().join("obs.txt")).unwrap();
        writeln!(obsfile, "1061313128").unwrap();
        let config = get_config(tmp_dir.path(), &["TV8"]);
        let events: Vec<Event> = vec![];
        assert!(matches!(
            run_brightness(&config, &events),
            Err(SsinsError::IOError(_))
        ));
    }

    #[test]
    fn test_config_display_doesnt_crash() {
        let tmp_dir = tempdir().unwrap();
        let config = get_config(tmp_dir.path(), &["TV7"]);
        assert!(format!("{}", config).contains("sig_thresh 5"));
    }
}

//! Command Line Interface helpers for event brightness

use crate::{
    brightness::{run_brightness, BrightDict, BrightnessConfig},
    error::{
        CLIError::InvalidCommandLineArgument,
        SsinsError,
        SsinsError::{ClapError, DryRun},
    },
    events::PickledEvents,
    get_durations,
};
use clap::{
    arg, command,
    ErrorKind::{ArgumentNotFound, DisplayHelp, DisplayVersion},
    ValueHint::FilePath,
};
use log::{debug, info, trace};
use prettytable::{format as prettyformat, row, table, Table};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    path::PathBuf,
    time::Duration,
};

/// Args for summing event brightness over a list of observations.
pub struct EventBrightnessContext {
    /// Aggregation parameters
    pub config: BrightnessConfig,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match GIT_HEAD_REF {
        Some(hr) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                GIT_COMMIT_HASH.unwrap_or("<unknown>"),
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {}", hr)?;
        }
        None => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {}", BUILT_TIME_UTC)?;
    writeln!(f, "         with compiler {}", RUSTC_VERSION)?;
    writeln!(f)?;
    Ok(())
}

impl Display for EventBrightnessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        writeln!(f, "observation list:     {}", self.config.obsfile.display())?;
        writeln!(f, "mean subtract order:  {}", self.config.order)?;
        write!(f, "{}", &self.config)?;
        Ok(())
    }
}

impl EventBrightnessContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, SsinsError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .name("event_brightness")
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Sum the brightness of RFI events found by the match filter \
                    in the incoherent noise spectra of a list of observations.")
            .args(&[
                // input options
                arg!(-f --obsfile <PATH> "Path to obsfile, one observation id per line")
                    .required(true)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(-i --indir <DIR> "The base directory of the INS")
                    .required(true)
                    .help_heading("INPUT"),
                arg!(--"flag-choice" <CHOICE> "The flag choice for the INS")
                    .alias("flag_choice")
                    .required(true)
                    .help_heading("INPUT"),
                arg!(--tag <TAG> "The filename tag of the saved INS and events, e.g. _5_match")
                    .required(false)
                    .allow_hyphen_values(true)
                    .help_heading("INPUT"),
                arg!(--order <ORDER> "The order of the mean subtraction fit when reading the INS")
                    .required(false)
                    .help_heading("INPUT"),

                // aggregation options
                arg!(-s --shapes <SHAPES>... "The names of the shapes to integrate")
                    .multiple_values(true)
                    .required(true)
                    .help_heading("AGGREGATION"),
                arg!(--sig <SIG> "The significance threshold of the match filter")
                    .default_value("5")
                    .required(false)
                    .help_heading("AGGREGATION"),

                // output options
                arg!(-o --outdir <DIR> "The output directory")
                    .required(true)
                    .help_heading("OUTPUT"),

                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),
            ]);
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_order(matches: &clap::ArgMatches) -> Result<usize, SsinsError> {
        match matches.value_of_t::<usize>("order") {
            Ok(order) => Ok(order),
            Err(err) if err.kind() == ArgumentNotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Parse an iterator of arguments into an [`EventBrightnessContext`].
    ///
    /// # Errors
    ///
    /// Will return [`SsinsError::ClapError`] if clap rejects the arguments,
    /// [`SsinsError::CLIError`] if the obsfile doesn't exist, or
    /// [`SsinsError::DryRun`] if `--dry-run` was given.
    pub fn from_args<I, T>(args: I) -> Result<Self, SsinsError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let obsfile = match matches.value_of("obsfile") {
            Some(path) => PathBuf::from(path),
            None => unreachable!("--obsfile <PATH> is required, enforced by clap"),
        };
        if !obsfile.is_file() {
            return Err(SsinsError::CLIError(InvalidCommandLineArgument {
                option: "--obsfile <PATH>".into(),
                expected: "an existing file".into(),
                received: obsfile.display().to_string(),
            }));
        }

        let config = BrightnessConfig {
            obsfile,
            shapes: match matches.values_of("shapes") {
                Some(shapes) => shapes.map(Into::into).collect(),
                None => unreachable!("--shapes <SHAPES>... is required, enforced by clap"),
            },
            sig_thresh: matches.value_of("sig").unwrap_or("5").into(),
            indir: matches.value_of("indir").unwrap_or_default().into(),
            flag_choice: matches.value_of("flag-choice").unwrap_or_default().into(),
            outdir: matches.value_of("outdir").unwrap_or_default().into(),
            tag: matches.value_of("tag").unwrap_or_default().into(),
            order: Self::parse_order(&matches)?,
            draw_progress: !matches.is_present("no-draw-progress"),
        };

        let result = Self { config };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Read each observation's spectrum and pickled match events, then write
    /// the brightness dictionary.
    ///
    /// # Errors
    ///
    /// see [`run_brightness`]
    pub fn run(self) -> Result<BrightDict, SsinsError> {
        let source = PickledEvents {
            indir: self.config.indir.clone(),
            flag_choice: self.config.flag_choice.clone(),
            tag: self.config.tag.clone(),
        };
        let bright_dict = run_brightness(&self.config, &source)?;
        info!("event brightness:\n{}", summary_table(&bright_dict));
        Ok(bright_dict)
    }
}

/// Parse `args`, run, and log timing. Returns the process exit code: 0 on
/// success, help, version or dry run, otherwise 1.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T> + Debug,
    T: Into<OsString> + Clone,
{
    let ctx = match EventBrightnessContext::from_args(args) {
        Ok(ctx) => ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match ctx.run() {
        Ok(_) => {
            info!(
                "total duration: {:?}",
                get_durations().into_iter().fold(
                    Duration::ZERO,
                    |duration_sum, (name, duration)| {
                        info!("{} duration: {:?}", name, duration);
                        duration_sum + duration
                    }
                )
            );
            0
        }
        Err(e) => {
            eprintln!("event brightness error: {e}");
            1
        }
    }
}

/// A table with a row for each shape, and the total and peak brightness over
/// all observations.
pub fn summary_table(bright_dict: &BrightDict) -> Table {
    let mut table = table!(["sig", "shape", "observations", "total", "brightest"]);
    table.set_format(*prettyformat::consts::FORMAT_CLEAN);
    for (sig_thresh, by_shape) in bright_dict {
        for (shape, by_obs) in by_shape {
            let total: f64 = by_obs.values().sum();
            let brightest = by_obs
                .iter()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(obs, _)| obs.as_str())
                .unwrap_or("");
            table.add_row(row![
                sig_thresh,
                shape,
                by_obs.len(),
                format!("{:.3e}", total),
                brightest
            ]);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_context_display_doesnt_crash() {
        let tmp_dir = tempdir().unwrap();
        let obsfile = tmp_dir.path().join("obs.txt");
        std::fs::write(&obsfile, "1061313128\n").unwrap();

        #[rustfmt::skip]
        let args = vec![
            "event_brightness",
            "-f", obsfile.to_str().unwrap(),
            "-s", "TV6", "TV7", "broad7",
            "-i", "/data/ins",
            "--flag-choice", "original",
            "-o", "/data/out",
            "--order", "2",
            "--no-draw-progress",
        ];

        let ctx = EventBrightnessContext::from_args(&args).unwrap();

        assert_eq!(ctx.config.shapes, vec!["TV6", "TV7", "broad7"]);
        assert_eq!(ctx.config.sig_thresh, "5");
        assert_eq!(ctx.config.order, 2);
        assert_eq!(ctx.config.tag, "");
        assert!(!ctx.config.draw_progress);

        let display = format!("{}", &ctx);
        assert!(display.contains("mean subtract order:  2"));
        assert!(display.contains("TV7"));
    }

    #[test]
    fn test_summary_table() {
        let bright_dict: BrightDict = BTreeMap::from([(
            "5".to_string(),
            BTreeMap::from([(
                "TV7".to_string(),
                BTreeMap::from([("a".to_string(), 1.0), ("b".to_string(), 3.0)]),
            )]),
        )]);
        let table = summary_table(&bright_dict).to_string();
        assert!(table.contains("TV7"));
        assert!(table.contains("4.000e0"));
        assert!(table.contains('b'));
    }
}

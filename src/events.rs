//! RFI events found in a spectrum, and where they come from.

use std::{ops::Range, path::PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    io::{arr_filename, read_pickle},
    ins::Ins,
    SsinsError,
};

/// A rectangle of the spectrum flagged by an RFI test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The timestep indices of the event
    pub time: Range<usize>,
    /// The frequency channel indices of the event
    pub freq: Range<usize>,
    /// The name of the shape which matched, e.g. "TV7" or "broad7"
    pub shape: String,
    /// The significance of the match, if known
    pub sig: Option<f64>,
}

impl Event {
    /// Whether the event covers the same timesteps as `other`.
    pub fn same_time(&self, other: &Event) -> bool {
        self.time == other.time
    }
}

/// Something which can provide the match filter events of a spectrum.
pub trait EventSource {
    /// The match events of observation `obs`, whose spectrum is `ins`.
    ///
    /// # Errors
    ///
    /// Implementations may fail if their events can't be produced.
    fn match_events(&self, obs: &str, ins: &Ins) -> Result<Vec<Event>, SsinsError>;
}

/// Match events which were pickled by [`Ins::save`].
#[derive(Debug, Clone)]
pub struct PickledEvents {
    /// The base directory the spectra were saved under
    pub indir: PathBuf,
    /// The flag choice of the saved spectra
    pub flag_choice: String,
    /// The filename tag of the saved events, e.g. "_5_match"
    pub tag: String,
}

impl PickledEvents {
    /// The path the events of `obs` are read from.
    pub fn path(&self, obs: &str) -> PathBuf {
        self.indir.join("arrs").join(arr_filename(
            obs,
            &self.flag_choice,
            "match_events",
            &self.tag,
            "pik",
        ))
    }
}

impl EventSource for PickledEvents {
    fn match_events(&self, obs: &str, _ins: &Ins) -> Result<Vec<Event>, SsinsError> {
        let path = self.path(obs);
        if !path.exists() {
            warn!("no match events for {} at {}", obs, path.display());
            return Ok(vec![]);
        }
        let events: Vec<Event> = read_pickle(&path)?;
        debug!("read {} match events for {}", events.len(), obs);
        Ok(events)
    }
}

impl EventSource for Vec<Event> {
    fn match_events(&self, _obs: &str, _ins: &Ins) -> Result<Vec<Event>, SsinsError> {
        Ok(self.clone())
    }
}

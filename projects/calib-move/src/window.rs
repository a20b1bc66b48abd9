// Static window grammar and resolution
//
// A window is written as `START-hh:mm:ss`, `hh:mm:ss-END` or
// `hh:mm:ss-hh:mm:ss`, either once for every video or per video name in a
// JSON mapping file.

use crate::error::{MoveError, MoveResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

lazy_static::lazy_static! {
    static ref FROM_START: Regex = Regex::new(r"START-(\d\d:\d\d:\d\d)").unwrap();
    static ref TO_END: Regex = Regex::new(r"(\d\d:\d\d:\d\d)-END").unwrap();
    static ref EXPLICIT: Regex =
        Regex::new(r"(\d\d:\d\d:\d\d)-(\d\d:\d\d:\d\d)").unwrap();
    static ref TIME_STRING: Regex = Regex::new(r"^(\d\d):(\d\d):(\d\d)$").unwrap();
}

/// Absolute static window of one video, in seconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StaticWindow {
    pub start: f64,
    pub end: f64,
}

impl StaticWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }
}

/// One parsed grammar form, still independent of any video duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowForm {
    FromStart { end: u32 },
    ToEnd { start: u32 },
    Explicit { start: u32, end: u32 },
}

/// Parse one `hh:mm:ss` field of a window string, reporting errors against
/// the whole window.
fn clock_seconds(spec: &str, time: &str) -> MoveResult<u32> {
    string_to_seconds(time).map_err(|e| match e {
        MoveError::InvalidWindowSpec { reason, .. } => MoveError::invalid_window(spec, reason),
        other => other,
    })
}

/// Parse a window string. Exactly one grammar occurrence must be present.
pub fn parse_window(spec: &str) -> MoveResult<WindowForm> {
    let from_start: Vec<_> = FROM_START.captures_iter(spec).collect();
    let to_end: Vec<_> = TO_END.captures_iter(spec).collect();
    let explicit: Vec<_> = EXPLICIT.captures_iter(spec).collect();

    let occurrences = from_start.len() + to_end.len() + explicit.len();
    if occurrences == 0 {
        return Err(MoveError::invalid_window(
            spec,
            "expected one of START-hh:mm:ss, hh:mm:ss-END, hh:mm:ss-hh:mm:ss",
        ));
    }
    if occurrences > 1 {
        return Err(MoveError::invalid_window(
            spec,
            format!("ambiguous window, found {} grammar matches", occurrences),
        ));
    }

    if let Some(caps) = from_start.first() {
        return Ok(WindowForm::FromStart {
            end: clock_seconds(spec, &caps[1])?,
        });
    }
    if let Some(caps) = to_end.first() {
        return Ok(WindowForm::ToEnd {
            start: clock_seconds(spec, &caps[1])?,
        });
    }
    let caps = &explicit[0];
    Ok(WindowForm::Explicit {
        start: clock_seconds(spec, &caps[1])?,
        end: clock_seconds(spec, &caps[2])?,
    })
}

pub fn is_valid_window_str(spec: &str) -> bool {
    parse_window(spec).is_ok()
}

/// Resolve a window string against the duration of one concrete video.
pub fn resolve(video_duration: f64, spec: &str) -> MoveResult<StaticWindow> {
    match parse_window(spec)? {
        WindowForm::FromStart { end } => {
            let end = end as f64;
            if end <= 0.0 {
                return Err(MoveError::invalid_window(spec, "window must end after 00:00:00"));
            }
            if end > video_duration {
                return Err(MoveError::invalid_window(
                    spec,
                    format!(
                        "window ends after the video ({})",
                        seconds_to_string(video_duration)
                    ),
                ));
            }
            Ok(StaticWindow::new(0.0, end))
        }
        WindowForm::ToEnd { start } => {
            let start = start as f64;
            if start >= video_duration {
                return Err(MoveError::invalid_window(
                    spec,
                    format!(
                        "window starts after the video ({})",
                        seconds_to_string(video_duration)
                    ),
                ));
            }
            Ok(StaticWindow::new(start, video_duration))
        }
        WindowForm::Explicit { start, end } => {
            if start >= end {
                return Err(MoveError::invalid_window(spec, "start is not before end"));
            }
            Ok(StaticWindow::new(start as f64, end as f64))
        }
    }
}

/// Zero-padded `hh:mm:ss` to whole seconds. Minutes and seconds must be
/// below 60.
pub fn string_to_seconds(time: &str) -> MoveResult<u32> {
    let caps = TIME_STRING
        .captures(time)
        .ok_or_else(|| MoveError::invalid_window(time, "expected hh:mm:ss"))?;
    // Two ASCII digits per field, so these parses cannot fail or overflow.
    let field = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
    let (hours, minutes, seconds) = (field(1), field(2), field(3));
    if minutes >= 60 || seconds >= 60 {
        return Err(MoveError::invalid_window(
            time,
            format!(
                "minutes and seconds must be below 60 (got {:02}:{:02})",
                minutes, seconds
            ),
        ));
    }
    Ok(hours * 3600 + minutes * 60 + seconds)
}

/// Whole seconds to `hh:mm:ss`; fractional input is rounded first.
pub fn seconds_to_string(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Where the static window of each video comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowSpec {
    /// One grammar string reused for every video.
    Single(String),
    /// Video file name to grammar string.
    Mapping(BTreeMap<String, String>),
}

impl WindowSpec {
    /// Interpret a command line argument: an existing `.json` file is loaded
    /// as a mapping, anything else must be a valid grammar string.
    pub fn from_argument(arg: &str) -> MoveResult<Self> {
        let path = Path::new(arg);
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if path.is_file() && is_json {
            return Self::load_mapping(path);
        }

        parse_window(arg)?;
        Ok(Self::Single(arg.to_string()))
    }

    pub fn load_mapping(path: &Path) -> MoveResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mapping: BTreeMap<String, String> = serde_json::from_str(&content)?;
        tracing::info!(
            "Loaded window mapping with {} entries from {:?}",
            mapping.len(),
            path
        );
        Ok(Self::Mapping(mapping))
    }

    /// Check every video up front and report all gaps at once.
    pub fn validate_for(&self, video_names: &[String]) -> MoveResult<()> {
        let mapping = match self {
            Self::Single(spec) => {
                parse_window(spec)?;
                return Ok(());
            }
            Self::Mapping(mapping) => mapping,
        };

        let mut missing_keys = Vec::new();
        let mut invalid_values = Vec::new();
        for name in video_names {
            match mapping.get(name) {
                Some(value) if is_valid_window_str(value) => {}
                Some(value) => invalid_values.push((name.clone(), value.clone())),
                None => missing_keys.push(name.clone()),
            }
        }

        if missing_keys.is_empty() && invalid_values.is_empty() {
            Ok(())
        } else {
            Err(MoveError::MissingWindowMapping {
                missing_keys,
                invalid_values,
            })
        }
    }

    pub fn spec_for(&self, video_name: &str) -> MoveResult<&str> {
        match self {
            Self::Single(spec) => Ok(spec),
            Self::Mapping(mapping) => match mapping.get(video_name) {
                Some(value) => Ok(value),
                None => Err(MoveError::MissingWindowMapping {
                    missing_keys: vec![video_name.to_string()],
                    invalid_values: Vec::new(),
                }),
            },
        }
    }

    /// Resolve against this video's own duration, even for a shared string.
    pub fn resolve_for(&self, video_name: &str, video_duration: f64) -> MoveResult<StaticWindow> {
        resolve(video_duration, self.spec_for(video_name)?)
    }
}

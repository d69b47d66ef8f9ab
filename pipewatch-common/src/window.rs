//! The observation window calculator.
//!
//! Every invocation computes its window once, from the trigger time passed in by the caller. A
//! window is never cached between invocations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// The widest accepted observation window, in minutes (one week).
pub const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// An error returned for invalid window policies or bounds.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WindowError {
    /// The configured width is zero or negative.
    #[error("window width must be positive, got {0} minutes")]
    NonPositiveWidth(i64),
    /// The configured width exceeds [`MAX_WINDOW_MINUTES`].
    #[error("window width must be at most {MAX_WINDOW_MINUTES} minutes, got {0}")]
    WidthTooLarge(i64),
    /// The window start is outside the representable time range.
    #[error("window of {minutes} minutes ending at {end} is out of range")]
    OutOfRange {
        /// The requested end.
        end: DateTime<Utc>,
        /// Width of the window in minutes.
        minutes: i64,
    },
    /// The bounds are not ordered.
    #[error("window start {start} is not before end {end}")]
    Unordered {
        /// The requested start.
        start: DateTime<Utc>,
        /// The requested end.
        end: DateTime<Utc>,
    },
    /// The string form of a policy could not be parsed.
    #[error("invalid window policy '{0}', expected 'lookback:<minutes>' or 'half_hour:<minutes>'")]
    InvalidPolicy(String),
}

/// Selects how the observation window is derived from the trigger time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WindowPolicy {
    /// The window ends at the trigger time and spans the given number of minutes.
    Lookback {
        /// Width of the window in minutes.
        minutes: i64,
    },
    /// The window ends at the trigger time rounded to the nearest half hour.
    ///
    /// See [`round_to_half_hour`] for the rounding rules.
    HalfHour {
        /// Width of the window in minutes.
        minutes: i64,
    },
}

impl WindowPolicy {
    /// Returns the configured width in minutes.
    pub fn minutes(&self) -> i64 {
        match *self {
            Self::Lookback { minutes } | Self::HalfHour { minutes } => minutes,
        }
    }

    /// Fails if the width of this policy is not positive or exceeds [`MAX_WINDOW_MINUTES`].
    pub fn validate(&self) -> Result<(), WindowError> {
        self.width().map(|_| ())
    }

    fn width(&self) -> Result<TimeDelta, WindowError> {
        match self.minutes() {
            minutes if minutes <= 0 => Err(WindowError::NonPositiveWidth(minutes)),
            minutes if minutes > MAX_WINDOW_MINUTES => Err(WindowError::WidthTooLarge(minutes)),
            minutes => TimeDelta::try_minutes(minutes).ok_or(WindowError::WidthTooLarge(minutes)),
        }
    }

    /// Computes the observation window for a trigger at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> Result<ObservationWindow, WindowError> {
        let width = self.width()?;

        let end = match self {
            Self::Lookback { .. } => now,
            Self::HalfHour { .. } => round_to_half_hour(now),
        };

        let start = end
            .checked_sub_signed(width)
            .ok_or(WindowError::OutOfRange {
                end,
                minutes: self.minutes(),
            })?;

        ObservationWindow::new(start, end)
    }
}

impl fmt::Display for WindowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lookback { minutes } => write!(f, "lookback:{minutes}"),
            Self::HalfHour { minutes } => write!(f, "half_hour:{minutes}"),
        }
    }
}

impl FromStr for WindowPolicy {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WindowError::InvalidPolicy(s.to_owned());

        let (mode, minutes) = s.trim().split_once(':').ok_or_else(invalid)?;
        let minutes = minutes.trim().parse().map_err(|_| invalid())?;

        match mode.trim() {
            "lookback" => Ok(Self::Lookback { minutes }),
            "half_hour" => Ok(Self::HalfHour { minutes }),
            _ => Err(invalid()),
        }
    }
}

/// Rounds a trigger time to the nearest half-hour boundary.
///
/// With `m` the minute of the hour, the result is `:00` of the same hour if `m < 15`, `:30` if
/// `15 <= m < 45`, and `:00` of the next hour otherwise. Seconds and fractions are dropped.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use pipewatch_common::window::round_to_half_hour;
///
/// let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 44, 59).unwrap();
/// assert_eq!(round_to_half_hour(now), Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap());
/// ```
pub fn round_to_half_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    let minute = now.minute();
    let hour_start = now
        - TimeDelta::minutes(i64::from(minute))
        - TimeDelta::seconds(i64::from(now.second()))
        - TimeDelta::nanoseconds(i64::from(now.nanosecond()));

    match minute {
        0..15 => hour_start,
        15..45 => hour_start + TimeDelta::minutes(30),
        _ => hour_start + TimeDelta::hours(1),
    }
}

/// A closed time interval used to decide whether a run belongs to an invocation.
///
/// Both bounds are UTC instants and `start < end` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ObservationWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ObservationWindow {
    /// Creates a window from explicit bounds.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start >= end {
            return Err(WindowError::Unordered { start, end });
        }

        Ok(Self { start, end })
    }

    /// The inclusive lower bound.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The inclusive upper bound.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns `true` if `timestamp` lies within the window, bounds included.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

impl fmt::Display for ObservationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            crate::time::format_timestamp(self.start),
            crate::time::format_timestamp(self.end)
        )
    }
}

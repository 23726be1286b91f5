//! Verbosity of the diagnostics subscription.
use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// How much the event subscription should emit.
///
/// Ordered from least to most verbose. `LogAlways` is the unfiltered level: a subscription at this
/// level receives everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    LogAlways = 0,
    Critical = 1,
    Error = 2,
    Warning = 3,
    Informational = 4,
    Verbose = 5,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown diagnostics level `{0}`")]
pub struct ParseLevelError(pub String);

impl Level {
    pub const ALL: [Level; 6] = [
        Level::LogAlways,
        Level::Critical,
        Level::Error,
        Level::Warning,
        Level::Informational,
        Level::Verbose,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Level::LogAlways => "LogAlways",
            Level::Critical => "Critical",
            Level::Error => "Error",
            Level::Warning => "Warning",
            Level::Informational => "Informational",
            Level::Verbose => "Verbose",
        }
    }
}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Level::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ParseLevelError(s.to_owned()))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[test]
fn parse_ignores_case() {
    assert_eq!("warning".parse(), Ok(Level::Warning));
    assert_eq!(" Verbose ".parse(), Ok(Level::Verbose));
    assert_eq!("LOGALWAYS".parse(), Ok(Level::LogAlways));
    assert_eq!(
        "chatty".parse::<Level>(),
        Err(ParseLevelError("chatty".into()))
    );
}

#[test]
fn names_round_trip_and_order() {
    for level in Level::ALL {
        assert_eq!(level.to_string().parse(), Ok(level));
    }

    assert!(Level::Critical < Level::Error);
    assert!(Level::Informational < Level::Verbose);
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the five macro-phases a task moves through.
///
/// The ordinal is used for display and for the flow-code encoding only;
/// schedules may be entered in any order.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Knowledge,
    Plan,
    Implement,
    Scale,
    Production,
}

impl Schedule {
    pub const ALL: [Schedule; 5] = [
        Schedule::Knowledge,
        Schedule::Plan,
        Schedule::Implement,
        Schedule::Scale,
        Schedule::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Scale => "scale",
            Self::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "knowledge" => Some(Self::Knowledge),
            "plan" => Some(Self::Plan),
            "implement" => Some(Self::Implement),
            "scale" => Some(Self::Scale),
            "production" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Knowledge => 1,
            Self::Plan => 2,
            Self::Implement => 3,
            Self::Scale => 4,
            Self::Production => 5,
        }
    }

    pub fn from_ordinal(n: u32) -> Option<Self> {
        match n {
            1 => Some(Self::Knowledge),
            2 => Some(Self::Plan),
            3 => Some(Self::Implement),
            4 => Some(Self::Scale),
            5 => Some(Self::Production),
            _ => None,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sub-step inside one schedule occurrence.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub enum Process {
    #[default]
    P1,
    P2,
    P3,
}

impl Process {
    pub const ALL: [Process; 3] = [Process::P1, Process::P2, Process::P3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }

    /// Accepts `P1`/`p1` as well as the bare digit.
    pub fn parse(s: &str) -> Option<Self> {
        let digit = s.strip_prefix(['P', 'p']).unwrap_or(s);
        match digit {
            "1" => Some(Self::P1),
            "2" => Some(Self::P2),
            "3" => Some(Self::P3),
            _ => None,
        }
    }

    pub fn digit(&self) -> char {
        match self {
            Self::P1 => '1',
            Self::P2 => '2',
            Self::P3 => '3',
        }
    }

    pub fn from_digit(c: char) -> Option<Self> {
        match c {
            '1' => Some(Self::P1),
            '2' => Some(Self::P2),
            '3' => Some(Self::P3),
            _ => None,
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

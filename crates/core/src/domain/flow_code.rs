//! Append-only visit log and its compact flow-code notation.
//!
//! Consecutive visits to the same schedule share one `S{n}` token and their
//! process digits are concatenated in visit order:
//!
//! ```text
//! (Knowledge,P1) (Knowledge,P2) (Knowledge,P3) (Plan,P1) (Plan,P2)  =>  S1P123S2P12
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{Process, Schedule};
use super::state::OrchestrationStatus;
use crate::error::{CoreError, Result};

/// A single (schedule, process) visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct FlowCodeEntry {
    pub schedule: Schedule,
    pub process: Process,
    pub entered_at: DateTime<Utc>,
}

impl FlowCodeEntry {
    fn new(schedule: Schedule, process: Process) -> Self {
        Self {
            schedule,
            process,
            entered_at: Utc::now(),
        }
    }

    pub fn position(&self) -> (Schedule, Process) {
        (self.schedule, self.process)
    }
}

/// Ordered log of every visited (schedule, process).
///
/// Entries are private to the log: they can be read but never mutated,
/// removed or reordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(transparent)]
pub struct FlowCodeLog {
    entries: Vec<FlowCodeEntry>,
}

impl FlowCodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit. Only a running orchestration may append.
    pub fn append(
        &mut self,
        status: OrchestrationStatus,
        schedule: Schedule,
        process: Process,
    ) -> Result<&FlowCodeEntry> {
        if status != OrchestrationStatus::Running {
            return Err(CoreError::InvalidState(format!(
                "cannot append {}{} to flow code while {}",
                schedule.ordinal(),
                process,
                status.as_str()
            )));
        }

        self.entries.push(FlowCodeEntry::new(schedule, process));
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn entries(&self) -> &[FlowCodeEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&FlowCodeEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Positions only, without timestamps.
    pub fn positions(&self) -> Vec<(Schedule, Process)> {
        self.entries.iter().map(FlowCodeEntry::position).collect()
    }

    pub fn encode(&self) -> String {
        encode_positions(self.entries.iter().map(FlowCodeEntry::position))
    }

    /// Parse a flow code into a log. Decoded entries are stamped with the
    /// decode time since the compact form carries no timestamps.
    pub fn decode(code: &str) -> Result<Self> {
        let entries = decode_positions(code)?
            .into_iter()
            .map(|(schedule, process)| FlowCodeEntry::new(schedule, process))
            .collect();
        Ok(Self { entries })
    }
}

pub fn encode_positions(positions: impl IntoIterator<Item = (Schedule, Process)>) -> String {
    let mut code = String::new();
    let mut previous: Option<Schedule> = None;

    for (schedule, process) in positions {
        if previous != Some(schedule) {
            code.push('S');
            code.push_str(&schedule.ordinal().to_string());
            code.push('P');
            previous = Some(schedule);
        }
        code.push(process.digit());
    }

    code
}

/// Decode a flow code into its visit sequence.
///
/// The whole input is rejected on the first malformed token.
pub fn decode_positions(code: &str) -> Result<Vec<(Schedule, Process)>> {
    let chars: Vec<char> = code.chars().collect();
    let mut positions = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != 'S' {
            return Err(CoreError::malformed(
                code,
                i,
                format!("expected 'S', found {:?}", chars[i]),
            ));
        }
        i += 1;

        let number_start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if number_start == i {
            return Err(CoreError::malformed(
                code,
                number_start,
                "dangling 'S' without a schedule number",
            ));
        }

        let number: String = chars[number_start..i].iter().collect();
        // Ordinals are single digits; "S01" or "S0001" is not a schedule
        if number.len() > 1 {
            return Err(CoreError::malformed(
                code,
                number_start,
                format!("schedule number {number} must be a single digit 1-5"),
            ));
        }
        let schedule = number
            .parse::<u32>()
            .ok()
            .and_then(Schedule::from_ordinal)
            .ok_or_else(|| {
                CoreError::malformed(
                    code,
                    number_start,
                    format!("schedule number {number} out of range 1..=5"),
                )
            })?;

        if i >= chars.len() || chars[i] != 'P' {
            return Err(CoreError::malformed(
                code,
                i,
                format!("schedule S{number} is not followed by a 'P' group"),
            ));
        }
        i += 1;

        let group_start = i;
        while i < chars.len() && chars[i] != 'S' {
            let process = Process::from_digit(chars[i]).ok_or_else(|| {
                CoreError::malformed(
                    code,
                    i,
                    format!("process digit {:?} out of range 1..=3", chars[i]),
                )
            })?;
            positions.push((schedule, process));
            i += 1;
        }
        if group_start == i {
            return Err(CoreError::malformed(
                code,
                group_start,
                format!("schedule S{number} has an empty process group"),
            ));
        }
    }

    Ok(positions)
}

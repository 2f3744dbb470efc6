//! crates/checkpoint_core/src/domain.rs
//!
//! Defines the pure, core data structures for the live checkpoint system.
//! These structs are independent of any database or transport format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// The default checkpoint time limit, in seconds.
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 30;
/// The smallest time limit a checkpoint may be configured with.
pub const MIN_TIME_LIMIT_SECS: u32 = 10;
/// The largest time limit a checkpoint may be configured with.
pub const MAX_TIME_LIMIT_SECS: u32 = 300;

//=========================================================================================
// Domain Validation Errors
//=========================================================================================

/// Errors produced while constructing or editing checkpoint definitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("A checkpoint needs at least one answer option")]
    NoOptions,
    #[error("A checkpoint supports at most 26 answer options")]
    TooManyOptions,
    #[error("At least one option must be marked correct")]
    NoCorrectOption,
    #[error("Correct option ordinal {0} is out of bounds for {1} options")]
    CorrectOptionOutOfBounds(u16, usize),
    #[error("Time limit {0}s is outside the allowed range [{MIN_TIME_LIMIT_SECS}, {MAX_TIME_LIMIT_SECS}]")]
    TimeLimitOutOfRange(u32),
}

//=========================================================================================
// Durable Entities
//=========================================================================================

/// A paginated document a presenter can drive to a room of viewers.
#[derive(Debug, Clone)]
pub struct Presentation {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub page_count: u32,
    pub source_file: String,
}

/// One answer option of a checkpoint. Options are an ordered list; the
/// single-letter identifier shown to participants is derived from the
/// ordinal position and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub text: String,
}

/// A timed multiple-choice question bound to one page of a presentation.
///
/// Correct answers are kept as ordinal positions into `options`, so that
/// reordering options in the editor can never silently reinterpret answer
/// sets recorded against an earlier ordering of the same letters.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: Uuid,
    pub presentation_id: Uuid,
    pub page: u32,
    pub prompt: String,
    pub options: Vec<AnswerOption>,
    pub correct: BTreeSet<u16>,
    pub time_limit_secs: u32,
}

impl Checkpoint {
    /// Builds a checkpoint, validating the option/correct-set/time-limit
    /// invariants that make it usable in a live session.
    pub fn new(
        presentation_id: Uuid,
        page: u32,
        prompt: String,
        options: Vec<AnswerOption>,
        correct: BTreeSet<u16>,
        time_limit_secs: u32,
    ) -> Result<Self, DomainError> {
        if options.is_empty() {
            return Err(DomainError::NoOptions);
        }
        if options.len() > 26 {
            return Err(DomainError::TooManyOptions);
        }
        if correct.is_empty() {
            return Err(DomainError::NoCorrectOption);
        }
        if let Some(&ordinal) = correct.iter().find(|&&o| o as usize >= options.len()) {
            return Err(DomainError::CorrectOptionOutOfBounds(ordinal, options.len()));
        }
        if !(MIN_TIME_LIMIT_SECS..=MAX_TIME_LIMIT_SECS).contains(&time_limit_secs) {
            return Err(DomainError::TimeLimitOutOfRange(time_limit_secs));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            presentation_id,
            page,
            prompt,
            options,
            correct,
            time_limit_secs,
        })
    }
}

/// Derives the display letter for an option ordinal (0 -> 'A', 1 -> 'B', ...).
///
/// Ordinals are bounded to 26 by `Checkpoint::new`, so the cast is total.
pub fn option_letter(ordinal: u16) -> char {
    (b'A' + ordinal as u8) as char
}

//=========================================================================================
// Session and Response Records
//=========================================================================================

/// The role a participant holds within a session's room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Student,
}

/// The durable record of one live session. The live counterpart (current
/// page, active checkpoint, tally) is held in memory by the session registry.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: Uuid,
    pub presentation_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One participant's recorded answer to one checkpoint within one session.
/// At most one exists per (participant, checkpoint): a resubmission before
/// the checkpoint closes overwrites the earlier record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub session_id: Uuid,
    pub checkpoint_id: Uuid,
    pub participant_id: Uuid,
    pub chosen: BTreeSet<u16>,
    pub submitted_at: DateTime<Utc>,
}

//=========================================================================================
// Report Types
//=========================================================================================

/// One participant's outcome for one checkpoint in the compiled report.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantResult {
    pub participant_id: Uuid,
    pub chosen: BTreeSet<u16>,
    pub is_correct: bool,
}

/// The post-session breakdown for a single checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointReport {
    pub checkpoint_id: Uuid,
    pub page: u32,
    pub prompt: String,
    /// Responses counted per option, indexed by ordinal (i.e. letter order).
    /// A response selecting two options increments two counters.
    pub option_counts: Vec<u32>,
    pub total_responses: u32,
    pub participant_results: Vec<ParticipantResult>,
}

/// The full post-session report: one entry per checkpoint of the presentation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub presentation_id: Uuid,
    pub checkpoints: Vec<CheckpointReport>,
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn options(texts: &[&str]) -> Vec<AnswerOption> {
        texts
            .iter()
            .map(|t| AnswerOption { text: t.to_string() })
            .collect()
    }

    #[test]
    fn checkpoint_requires_a_correct_option() {
        let result = Checkpoint::new(
            Uuid::new_v4(),
            1,
            "prompt".to_string(),
            options(&["x", "y"]),
            BTreeSet::new(),
            30,
        );
        assert_eq!(result.unwrap_err(), DomainError::NoCorrectOption);
    }

    #[test]
    fn checkpoint_rejects_out_of_bounds_correct_ordinal() {
        let result = Checkpoint::new(
            Uuid::new_v4(),
            1,
            "prompt".to_string(),
            options(&["x", "y"]),
            BTreeSet::from([2]),
            30,
        );
        assert_eq!(
            result.unwrap_err(),
            DomainError::CorrectOptionOutOfBounds(2, 2)
        );
    }

    #[test]
    fn checkpoint_bounds_the_time_limit() {
        for bad in [0, 9, 301] {
            let result = Checkpoint::new(
                Uuid::new_v4(),
                1,
                "prompt".to_string(),
                options(&["x"]),
                BTreeSet::from([0]),
                bad,
            );
            assert_eq!(result.unwrap_err(), DomainError::TimeLimitOutOfRange(bad));
        }
    }

    #[test]
    fn option_letters_follow_ordinal_position() {
        assert_eq!(option_letter(0), 'A');
        assert_eq!(option_letter(1), 'B');
        assert_eq!(option_letter(25), 'Z');
    }
}

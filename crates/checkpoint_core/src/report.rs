//! crates/checkpoint_core/src/report.rs
//!
//! The post-session report compiler. Reconciles persisted responses against
//! the presentation's checkpoint definitions to produce correctness and
//! distribution statistics. Pure over already-loaded data; the service layer
//! fetches checkpoints and responses from the store and calls in here.

use crate::domain::{
    Checkpoint, CheckpointReport, ParticipantResult, ResponseRecord, SessionReport,
};
use uuid::Uuid;

/// Compiles the report for one ended session.
///
/// For every checkpoint of the presentation (in page order), every persisted
/// response referencing it is scored with exact set equality against the
/// checkpoint's correct set. Per-option counts iterate each response's chosen
/// options, so a two-option selection increments two counters; counts are
/// indexed by option ordinal, which is also letter order, giving charts a
/// deterministic rendering order.
pub fn compile_report(
    session_id: Uuid,
    presentation_id: Uuid,
    checkpoints: &[Checkpoint],
    responses: &[ResponseRecord],
) -> SessionReport {
    let mut ordered: Vec<&Checkpoint> = checkpoints.iter().collect();
    ordered.sort_by_key(|c| c.page);

    let checkpoints = ordered
        .into_iter()
        .map(|checkpoint| {
            let mut option_counts = vec![0u32; checkpoint.options.len()];
            let mut participant_results = Vec::new();

            for response in responses.iter().filter(|r| r.checkpoint_id == checkpoint.id) {
                for &ordinal in &response.chosen {
                    if let Some(count) = option_counts.get_mut(ordinal as usize) {
                        *count += 1;
                    }
                }
                participant_results.push(ParticipantResult {
                    participant_id: response.participant_id,
                    chosen: response.chosen.clone(),
                    is_correct: response.chosen == checkpoint.correct,
                });
            }

            CheckpointReport {
                checkpoint_id: checkpoint.id,
                page: checkpoint.page,
                prompt: checkpoint.prompt.clone(),
                option_counts,
                total_responses: participant_results.len() as u32,
                participant_results,
            }
        })
        .collect();

    SessionReport {
        session_id,
        presentation_id,
        checkpoints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnswerOption;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn checkpoint(correct: &[u16], option_count: usize) -> Checkpoint {
        Checkpoint::new(
            Uuid::new_v4(),
            2,
            "Which apply?".to_string(),
            (0..option_count)
                .map(|i| AnswerOption { text: format!("option {}", i) })
                .collect(),
            correct.iter().copied().collect(),
            30,
        )
        .unwrap()
    }

    fn response(checkpoint_id: Uuid, chosen: &[u16]) -> ResponseRecord {
        ResponseRecord {
            session_id: Uuid::new_v4(),
            checkpoint_id,
            participant_id: Uuid::new_v4(),
            chosen: chosen.iter().copied().collect(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn correctness_is_exact_set_equality() {
        let cp = checkpoint(&[1], 2);
        let responses = vec![
            response(cp.id, &[1]),
            response(cp.id, &[0]),
            response(cp.id, &[0, 1]),
        ];

        let report = compile_report(Uuid::new_v4(), cp.presentation_id, &[cp], &responses);
        let results: Vec<bool> = report.checkpoints[0]
            .participant_results
            .iter()
            .map(|r| r.is_correct)
            .collect();
        // A superset of the correct set does not score.
        assert_eq!(results, vec![true, false, false]);
    }

    #[test]
    fn multi_select_responses_increment_every_chosen_counter() {
        let cp = checkpoint(&[0, 2], 4);
        let responses = vec![response(cp.id, &[0, 2]), response(cp.id, &[2])];

        let report = compile_report(Uuid::new_v4(), cp.presentation_id, &[cp], &responses);
        let breakdown = &report.checkpoints[0];
        assert_eq!(breakdown.option_counts, vec![1, 0, 2, 0]);
        assert_eq!(breakdown.total_responses, 2);
    }

    #[test]
    fn checkpoints_are_ordered_by_page() {
        let mut late = checkpoint(&[0], 2);
        late.page = 7;
        let early = checkpoint(&[0], 2);

        let report = compile_report(
            Uuid::new_v4(),
            early.presentation_id,
            &[late.clone(), early.clone()],
            &[],
        );
        assert_eq!(report.checkpoints[0].checkpoint_id, early.id);
        assert_eq!(report.checkpoints[1].checkpoint_id, late.id);
    }

    #[test]
    fn responses_to_other_checkpoints_are_ignored() {
        let cp = checkpoint(&[0], 2);
        let responses = vec![response(Uuid::new_v4(), &[0])];

        let report = compile_report(Uuid::new_v4(), cp.presentation_id, &[cp], &responses);
        assert_eq!(report.checkpoints[0].total_responses, 0);
        assert_eq!(report.checkpoints[0].option_counts, vec![0, 0]);
    }
}

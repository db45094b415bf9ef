//! Stage sequencing as an explicit state machine.
//!
//! Every transition is listed in [`TRANSITIONS`]; [`next`] is the executable
//! form of the same table. Terminal states are absorbing.

use std::fmt;

use serde::{Deserialize, Serialize};

use mediascreen_types::{Result, ScreeningError};

use crate::stage::Stage;
use crate::state::{AgeMatch, DetailVerdict, FinalDecision, NameMatch, StateSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    NameCheck,
    AgeCheck,
    DetailCheck,
    Sentiment,
    Done,
    NonMatchByName,
    AgeMismatch,
    NonMatchByDetail,
}

impl RouterState {
    pub const ALL: [RouterState; 8] = [
        RouterState::NameCheck,
        RouterState::AgeCheck,
        RouterState::DetailCheck,
        RouterState::Sentiment,
        RouterState::Done,
        RouterState::NonMatchByName,
        RouterState::AgeMismatch,
        RouterState::NonMatchByDetail,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RouterState::Done
                | RouterState::NonMatchByName
                | RouterState::AgeMismatch
                | RouterState::NonMatchByDetail
        )
    }

    /// The stage executed in this state; `None` for terminal states.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RouterState::NameCheck => Some(Stage::NamePresence),
            RouterState::AgeCheck => Some(Stage::AgeVerification),
            RouterState::DetailCheck => Some(Stage::DetailVerification),
            RouterState::Sentiment => Some(Stage::SentimentAssessment),
            _ => None,
        }
    }

    /// History node name for terminal states.
    pub fn terminal_node(&self) -> Option<&'static str> {
        match self {
            RouterState::Done => Some("finalize"),
            RouterState::NonMatchByName => Some("set_name_non_match"),
            RouterState::AgeMismatch => Some("set_age_mismatch"),
            RouterState::NonMatchByDetail => Some("set_detail_non_match"),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouterState::NameCheck => "NameCheck",
            RouterState::AgeCheck => "AgeCheck",
            RouterState::DetailCheck => "DetailCheck",
            RouterState::Sentiment => "Sentiment",
            RouterState::Done => "Done",
            RouterState::NonMatchByName => "NonMatchByName",
            RouterState::AgeMismatch => "AgeMismatch",
            RouterState::NonMatchByDetail => "NonMatchByDetail",
        }
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: RouterState,
    pub condition: &'static str,
    pub to: RouterState,
    pub decision: Option<FinalDecision>,
}

pub const TRANSITIONS: &[Transition] = &[
    Transition {
        from: RouterState::NameCheck,
        condition: "name_match = found",
        to: RouterState::AgeCheck,
        decision: None,
    },
    Transition {
        from: RouterState::NameCheck,
        condition: "name_match = not_found",
        to: RouterState::NonMatchByName,
        decision: Some(FinalDecision::NonMatch),
    },
    Transition {
        from: RouterState::AgeCheck,
        condition: "age_match = matched",
        to: RouterState::DetailCheck,
        decision: None,
    },
    Transition {
        from: RouterState::AgeCheck,
        condition: "age_match = mismatched",
        to: RouterState::AgeMismatch,
        decision: Some(FinalDecision::AgeMismatch),
    },
    Transition {
        from: RouterState::DetailCheck,
        condition: "detail_verdict in {match, review_required}",
        to: RouterState::Sentiment,
        decision: None,
    },
    Transition {
        from: RouterState::DetailCheck,
        condition: "detail_verdict = non_match",
        to: RouterState::NonMatchByDetail,
        decision: Some(FinalDecision::NonMatch),
    },
    Transition {
        from: RouterState::Sentiment,
        condition: "always",
        to: RouterState::Done,
        decision: None,
    },
];

fn missing(field: &str, state: RouterState) -> ScreeningError {
    ScreeningError::InvariantViolation(format!("{field} undetermined when leaving {state}"))
}

/// Pick the single transition out of `current` for the verdicts in `snapshot`.
///
/// Terminal states return themselves. Leaving a stage whose verdict is still
/// undetermined is an invariant violation.
pub fn next(current: RouterState, snapshot: &StateSnapshot) -> Result<RouterState> {
    let to = match current {
        RouterState::NameCheck => match snapshot.name_match.map(|n| n.outcome) {
            Some(NameMatch::Found) => RouterState::AgeCheck,
            Some(NameMatch::NotFound) => RouterState::NonMatchByName,
            None => return Err(missing("name_match", current)),
        },
        RouterState::AgeCheck => match snapshot.age_match {
            Some(AgeMatch::Matched) => RouterState::DetailCheck,
            Some(AgeMatch::Mismatched) => RouterState::AgeMismatch,
            None => return Err(missing("age_match", current)),
        },
        RouterState::DetailCheck => match snapshot.detail_verdict {
            Some(DetailVerdict::Match) | Some(DetailVerdict::ReviewRequired) => {
                RouterState::Sentiment
            }
            Some(DetailVerdict::NonMatch) => RouterState::NonMatchByDetail,
            None => return Err(missing("detail_verdict", current)),
        },
        RouterState::Sentiment => RouterState::Done,
        terminal => terminal,
    };
    Ok(to)
}

/// Final decision carried by a terminal state.
pub fn final_decision(terminal: RouterState, snapshot: &StateSnapshot) -> Result<FinalDecision> {
    match terminal {
        RouterState::NonMatchByName | RouterState::NonMatchByDetail => Ok(FinalDecision::NonMatch),
        RouterState::AgeMismatch => Ok(FinalDecision::AgeMismatch),
        RouterState::Done => match snapshot.detail_verdict {
            Some(DetailVerdict::Match) => Ok(FinalDecision::Match),
            Some(DetailVerdict::ReviewRequired) => Ok(FinalDecision::ReviewRequired),
            other => Err(ScreeningError::InvariantViolation(format!(
                "Done reached with detail_verdict {other:?}"
            ))),
        },
        other => Err(ScreeningError::InvariantViolation(format!(
            "{other} is not a terminal state"
        ))),
    }
}

/// Render the transition table, one row per line.
pub fn describe_transitions() -> String {
    let mut out = String::from("| Current | Condition | Next |\n|---|---|---|\n");
    for t in TRANSITIONS {
        let next = match t.decision {
            Some(d) => format!("{} (final: \"{}\")", t.to, d),
            None if t.to == RouterState::Done => {
                format!("{} (final: \"Match\" or \"Review Required\")", t.to)
            }
            None => t.to.to_string(),
        };
        out.push_str(&format!("| {} | {} | {} |\n", t.from, t.condition, next));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{NameMatchProvenance, NameMatchResult};

    fn name(outcome: NameMatch) -> Option<NameMatchResult> {
        Some(NameMatchResult {
            outcome,
            provenance: NameMatchProvenance::Exact,
        })
    }

    /// Snapshots covering every verdict value each non-terminal state can see.
    fn verdict_space(state: RouterState) -> Vec<StateSnapshot> {
        match state {
            RouterState::NameCheck => [NameMatch::Found, NameMatch::NotFound]
                .into_iter()
                .map(|n| StateSnapshot {
                    name_match: name(n),
                    ..Default::default()
                })
                .collect(),
            RouterState::AgeCheck => [AgeMatch::Matched, AgeMatch::Mismatched]
                .into_iter()
                .map(|a| StateSnapshot {
                    name_match: name(NameMatch::Found),
                    age_match: Some(a),
                    ..Default::default()
                })
                .collect(),
            RouterState::DetailCheck | RouterState::Sentiment => [
                DetailVerdict::Match,
                DetailVerdict::NonMatch,
                DetailVerdict::ReviewRequired,
            ]
            .into_iter()
            .map(|d| StateSnapshot {
                name_match: name(NameMatch::Found),
                age_match: Some(AgeMatch::Matched),
                detail_verdict: Some(d),
                ..Default::default()
            })
            .collect(),
            _ => vec![StateSnapshot::default()],
        }
    }

    #[test]
    fn every_verdict_has_exactly_one_listed_transition() {
        for state in RouterState::ALL.iter().filter(|s| !s.is_terminal()) {
            for snap in verdict_space(*state) {
                let to = next(*state, &snap).unwrap();
                let listed = TRANSITIONS
                    .iter()
                    .filter(|t| t.from == *state && t.to == to)
                    .count();
                assert_eq!(listed, 1, "{state} -> {to} not listed exactly once");
            }
        }
    }

    #[test]
    fn table_covers_every_non_terminal_state() {
        for state in RouterState::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(TRANSITIONS.iter().any(|t| t.from == *state), "{state}");
            assert!(state.stage().is_some());
        }
        for state in RouterState::ALL.iter().filter(|s| s.is_terminal()) {
            assert!(TRANSITIONS.iter().all(|t| t.from != *state));
            assert!(state.terminal_node().is_some());
        }
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for state in RouterState::ALL.iter().filter(|s| s.is_terminal()) {
            assert_eq!(next(*state, &StateSnapshot::default()).unwrap(), *state);
        }
    }

    #[test]
    fn happy_path_sequence() {
        let mut snap = StateSnapshot {
            name_match: name(NameMatch::Found),
            ..Default::default()
        };
        assert_eq!(next(RouterState::NameCheck, &snap).unwrap(), RouterState::AgeCheck);
        snap.age_match = Some(AgeMatch::Matched);
        assert_eq!(next(RouterState::AgeCheck, &snap).unwrap(), RouterState::DetailCheck);
        snap.detail_verdict = Some(DetailVerdict::ReviewRequired);
        assert_eq!(next(RouterState::DetailCheck, &snap).unwrap(), RouterState::Sentiment);
        assert_eq!(next(RouterState::Sentiment, &snap).unwrap(), RouterState::Done);
        assert_eq!(
            final_decision(RouterState::Done, &snap).unwrap(),
            FinalDecision::ReviewRequired
        );
    }

    #[test]
    fn early_terminations() {
        let snap = StateSnapshot {
            name_match: name(NameMatch::NotFound),
            ..Default::default()
        };
        let to = next(RouterState::NameCheck, &snap).unwrap();
        assert_eq!(to, RouterState::NonMatchByName);
        assert_eq!(final_decision(to, &snap).unwrap(), FinalDecision::NonMatch);

        let snap = StateSnapshot {
            name_match: name(NameMatch::Found),
            age_match: Some(AgeMatch::Mismatched),
            ..Default::default()
        };
        let to = next(RouterState::AgeCheck, &snap).unwrap();
        assert_eq!(to, RouterState::AgeMismatch);
        assert_eq!(final_decision(to, &snap).unwrap(), FinalDecision::AgeMismatch);
    }

    #[test]
    fn undetermined_verdict_is_invariant_violation() {
        let err = next(RouterState::AgeCheck, &StateSnapshot::default()).unwrap_err();
        assert!(matches!(err, ScreeningError::InvariantViolation(_)));
        assert!(final_decision(RouterState::NameCheck, &StateSnapshot::default()).is_err());
    }

    #[test]
    fn describe_lists_all_rows() {
        let text = describe_transitions();
        assert_eq!(text.lines().count(), TRANSITIONS.len() + 2);
        assert!(text.contains("AgeMismatch (final: \"Age Mismatch - Needs Verification\")"));
    }
}

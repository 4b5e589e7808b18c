//! Access decision engine: a pure function from a recognition result to a
//! decision. Confidence is `1 - cosine_distance`.

use common::{Decision, PersonStatus};

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    /// Minimum confidence for an AUTHORIZED match to open the gate.
    pub auth_threshold: f32,
    /// Minimum confidence to treat a WANTED match as genuine.
    pub wanted_threshold: f32,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self {
            auth_threshold: 0.5,
            wanted_threshold: 0.7,
        }
    }
}

impl DecisionEngine {
    pub fn new(auth_threshold: f32, wanted_threshold: f32) -> Self {
        Self {
            auth_threshold,
            wanted_threshold,
        }
    }

    /// Map a match (or the absence of one) to a decision. Low-confidence
    /// matches of either status degrade to UNKNOWN rather than acting on a
    /// doubtful identity.
    pub fn decide(&self, matched: Option<(PersonStatus, f32)>) -> Decision {
        match matched {
            None => Decision::Unknown,
            Some((PersonStatus::Authorized, confidence)) => {
                if confidence >= self.auth_threshold {
                    Decision::Authorized
                } else {
                    Decision::Unknown
                }
            }
            Some((PersonStatus::Wanted, confidence)) => {
                if confidence >= self.wanted_threshold {
                    Decision::Wanted
                } else {
                    Decision::Unknown
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::GateAction;

    #[test]
    fn no_match_is_unknown() {
        let engine = DecisionEngine::default();
        assert_eq!(engine.decide(None), Decision::Unknown);
    }

    #[test]
    fn confident_authorized_opens() {
        let engine = DecisionEngine::default();
        let decision = engine.decide(Some((PersonStatus::Authorized, 0.74)));
        assert_eq!(decision, Decision::Authorized);
        assert_eq!(decision.gate_action(), GateAction::Open);
    }

    #[test]
    fn doubtful_authorized_degrades_to_unknown() {
        let engine = DecisionEngine::default();
        assert_eq!(engine.decide(Some((PersonStatus::Authorized, 0.49))), Decision::Unknown);
    }

    #[test]
    fn threshold_is_inclusive() {
        let engine = DecisionEngine::default();
        assert_eq!(engine.decide(Some((PersonStatus::Authorized, 0.5))), Decision::Authorized);
        assert_eq!(engine.decide(Some((PersonStatus::Wanted, 0.7))), Decision::Wanted);
    }

    #[test]
    fn confident_wanted_opens_with_alert_semantics() {
        let engine = DecisionEngine::default();
        let decision = engine.decide(Some((PersonStatus::Wanted, 0.75)));
        assert_eq!(decision, Decision::Wanted);
        // WANTED still opens, so the person is captured inside.
        assert_eq!(decision.gate_action(), GateAction::Open);
    }

    #[test]
    fn doubtful_wanted_degrades_to_unknown() {
        let engine = DecisionEngine::default();
        let decision = engine.decide(Some((PersonStatus::Wanted, 0.55)));
        assert_eq!(decision, Decision::Unknown);
        assert_eq!(decision.gate_action(), GateAction::Close);
    }
}

use serde::{Deserialize, Serialize};

/// Result of comparing an observed accuracy to the promotion threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum GateDecision {
    /// The model may be promoted.
    Pass {
        /// Measured accuracy.
        observed: f64,
    },
    /// The model is kept out of the deployable slot.
    Reject {
        /// Measured accuracy.
        observed: f64,
        /// Threshold it failed to reach.
        required: f64,
    },
}

impl GateDecision {
    /// True for [`GateDecision::Pass`].
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }
}

/// Accuracy threshold guarding the deployable model slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromotionGate {
    required: f64,
}

impl PromotionGate {
    /// Creates a gate demanding at least `required` accuracy.
    #[must_use]
    pub const fn new(required: f64) -> Self {
        Self { required }
    }

    /// Threshold.
    #[must_use]
    pub const fn required(&self) -> f64 {
        self.required
    }

    /// Passes iff `observed >= required`. A NaN observation never passes.
    #[must_use]
    pub fn evaluate(&self, observed: f64) -> GateDecision {
        if observed >= self.required {
            GateDecision::Pass { observed }
        } else {
            GateDecision::Reject {
                observed,
                required: self.required,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_equality_passes() {
        let gate = PromotionGate::new(0.75);
        assert_eq!(gate.evaluate(0.75), GateDecision::Pass { observed: 0.75 });
        assert!(gate.evaluate(0.9).passed());
    }

    #[test]
    fn below_threshold_rejects_with_both_values() {
        let gate = PromotionGate::new(0.6);
        assert_eq!(
            gate.evaluate(0.599),
            GateDecision::Reject {
                observed: 0.599,
                required: 0.6
            }
        );
    }

    #[test]
    fn unreachable_threshold_always_rejects() {
        let gate = PromotionGate::new(1.01);
        assert!(!gate.evaluate(1.0).passed());
        assert!(!PromotionGate::new(0.0).evaluate(f64::NAN).passed());
    }
}

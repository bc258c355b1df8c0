//! Tier routing: which storage tiers receive a classified reading.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Classification;

// ---

/// Data-lake tier. Bronze holds everything, silver normal data, gold anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

impl Tier {
    // ---
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination set for one reading.
///
/// Always bronze plus exactly one of silver or gold; `alert` is set iff gold is.
/// Fields are private so the only way to get one is [`route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierDecision {
    refined: Tier,
}

impl TierDecision {
    // ---
    /// Tiers in write order, bronze first.
    pub fn tiers(&self) -> [Tier; 2] {
        [Tier::Bronze, self.refined]
    }

    pub fn contains(&self, tier: Tier) -> bool {
        tier == Tier::Bronze || tier == self.refined
    }

    pub fn alert(&self) -> bool {
        self.refined == Tier::Gold
    }
}

pub fn route(classification: Classification) -> TierDecision {
    // ---
    let refined = match classification {
        Classification::Normal => Tier::Silver,
        Classification::Anomalous => Tier::Gold,
    };
    TierDecision { refined }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_normal_goes_to_silver() {
        // ---
        let decision = route(Classification::Normal);

        assert_eq!(decision.tiers(), [Tier::Bronze, Tier::Silver]);
        assert!(decision.contains(Tier::Bronze));
        assert!(decision.contains(Tier::Silver));
        assert!(!decision.contains(Tier::Gold));
        assert!(!decision.alert());
    }

    #[test]
    fn test_anomalous_goes_to_gold_with_alert() {
        // ---
        let decision = route(Classification::Anomalous);

        assert_eq!(decision.tiers(), [Tier::Bronze, Tier::Gold]);
        assert!(!decision.contains(Tier::Silver));
        assert!(decision.alert());
    }

    #[test]
    fn test_invariants_hold_for_every_classification() {
        // ---
        for classification in [Classification::Normal, Classification::Anomalous] {
            let decision = route(classification);
            let refined = [Tier::Silver, Tier::Gold]
                .iter()
                .filter(|t| decision.contains(**t))
                .count();

            assert!(decision.contains(Tier::Bronze));
            assert_eq!(refined, 1);
            assert_eq!(decision.alert(), decision.contains(Tier::Gold));
        }
    }
}

//! Cost gate: decides whether a transcript is small enough to submit.

/// Estimates the completion cost of a transcript, in tokens.
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, transcript: &str) -> f64;
}

/// Length-based approximation: a fixed number of characters per token.
#[derive(Debug, Clone, Copy)]
pub struct CharsPerToken(pub f64);

impl Default for CharsPerToken {
    fn default() -> Self {
        Self(4.0)
    }
}

impl CostEstimator for CharsPerToken {
    fn estimate(&self, transcript: &str) -> f64 {
        transcript.chars().count() as f64 / self.0
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eligibility {
    Eligible { estimate: f64 },
    OverBudget { estimate: f64 },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }

    pub fn estimate(&self) -> f64 {
        match self {
            Self::Eligible { estimate } | Self::OverBudget { estimate } => *estimate,
        }
    }
}

/// A transcript is eligible when its estimate is strictly below the threshold.
pub struct EligibilityGate {
    estimator: Box<dyn CostEstimator>,
    threshold: f64,
}

impl EligibilityGate {
    pub fn new(estimator: Box<dyn CostEstimator>, threshold: usize) -> Self {
        Self {
            estimator,
            threshold: threshold as f64,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn check(&self, transcript: &str) -> Eligibility {
        let estimate = self.estimator.estimate(transcript);
        if estimate < self.threshold {
            Eligibility::Eligible { estimate }
        } else {
            Eligibility::OverBudget { estimate }
        }
    }
}

impl Default for EligibilityGate {
    fn default() -> Self {
        Self::new(Box::new(CharsPerToken::default()), 3000)
    }
}

//! Context window budgeting

use serde::{Deserialize, Serialize};

/// Default tokens held back from the prompt budget.
pub const DEFAULT_SAFETY_MARGIN: usize = 300;

/// Token budget for the prompt side of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBudget {
    /// Maximum tokens in the model's context window
    pub context_max_tokens: usize,
    /// Tokens reserved for the model's reply
    pub reserved_output: usize,
    /// Extra slack for counter inaccuracy
    pub safety_margin: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            context_max_tokens: 4000,
            reserved_output: 0,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl TokenBudget {
    pub fn new(context_max_tokens: usize) -> Self {
        Self {
            context_max_tokens,
            ..Default::default()
        }
    }

    pub fn with_reserved_output(mut self, reserved_output: usize) -> Self {
        self.reserved_output = reserved_output;
        self
    }

    pub fn with_safety_margin(mut self, safety_margin: usize) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// Tokens the prompt may use. Never underflows.
    pub fn available_tokens(&self) -> usize {
        self.context_max_tokens
            .saturating_sub(self.reserved_output)
            .saturating_sub(self.safety_margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_margin_is_subtracted() {
        assert_eq!(TokenBudget::new(4000).available_tokens(), 3700);
    }

    #[test]
    fn headroom_and_margin_combine() {
        let budget = TokenBudget::new(8000)
            .with_reserved_output(1000)
            .with_safety_margin(500);
        assert_eq!(budget.available_tokens(), 6500);
    }

    #[test]
    fn budget_saturates_at_zero() {
        let budget = TokenBudget::new(200).with_reserved_output(150);
        assert_eq!(budget.available_tokens(), 0);
    }
}

//! Budget-aware conversation truncation
//!
//! System messages always survive. Dialogue is kept as the most recent
//! contiguous suffix whose token cost stays below what the system messages
//! leave of the budget.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::context::Message;
use crate::error::{ContextError, ContextResult};
use crate::tokens::TokenCounter;

static LINE_BREAK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n+").unwrap());
static HORIZONTAL_SPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\r\n]+").unwrap());

/// Collapse line-break runs and horizontal whitespace runs, then trim.
pub fn normalize(text: &str) -> String {
    let text = LINE_BREAK_RUNS.replace_all(text, "\n");
    HORIZONTAL_SPACE_RUNS
        .replace_all(&text, " ")
        .trim()
        .to_string()
}

/// Result of fitting a conversation into a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// System messages followed by the surviving dialogue.
    pub messages: Vec<Message>,
    /// Dialogue messages that did not fit.
    pub dropped: usize,
    /// Cost of the system messages; `None` when the fast path skipped counting.
    pub system_tokens: Option<usize>,
    /// Budget the truncation was run against.
    pub budget: usize,
}

impl Truncation {
    /// True when the system messages alone meet or exceed the budget.
    pub fn system_exhausted(&self) -> bool {
        self.system_tokens
            .is_some_and(|tokens| tokens >= self.budget)
    }

    /// Messages to send, or `BudgetExceeded` when nothing but system
    /// messages could be kept and even those do not fit.
    pub fn into_messages(self) -> ContextResult<Vec<Message>> {
        match self.system_tokens {
            Some(system_tokens) if system_tokens >= self.budget => {
                Err(ContextError::BudgetExceeded {
                    system_tokens,
                    budget: self.budget,
                })
            }
            _ => Ok(self.messages),
        }
    }
}

/// Trims conversations to a token budget.
#[derive(Clone)]
pub struct ContextTruncator {
    counter: Arc<dyn TokenCounter>,
}

impl ContextTruncator {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    /// Normalized system messages followed by the dialogue suffix that fits.
    pub fn truncate(&self, model: &str, prompts: &[Message], max_tokens: usize) -> Vec<Message> {
        self.fit(model, prompts, max_tokens).messages
    }

    pub fn fit(&self, model: &str, prompts: &[Message], max_tokens: usize) -> Truncation {
        let mut system = Vec::new();
        let mut dialogue = Vec::new();
        let mut text_len = 0usize;

        for message in prompts {
            let content = normalize(&message.content);
            text_len += content.chars().count();

            let message = message.with_content(content);
            if message.is_system() {
                system.push(message);
            } else {
                dialogue.push(message);
            }
        }

        // Short conversations cannot overflow; skip counting entirely.
        if text_len.saturating_mul(2) < max_tokens {
            debug!(model, text_len, max_tokens, "conversation fits without counting");
            system.extend(dialogue);
            return Truncation {
                messages: system,
                dropped: 0,
                system_tokens: None,
                budget: max_tokens,
            };
        }

        let system_tokens = self.counter.count_tokens(model, &system);
        let remaining = max_tokens.saturating_sub(system_tokens);

        let mut kept: Vec<Message> = Vec::new();
        for message in dialogue.iter().rev() {
            kept.insert(0, message.clone());
            if self.counter.count_tokens(model, &kept) >= remaining {
                kept.remove(0);
                break;
            }
        }

        let dropped = dialogue.len() - kept.len();
        debug!(
            model,
            system_tokens,
            remaining,
            kept = kept.len(),
            dropped,
            "truncated conversation"
        );

        system.extend(kept);
        Truncation {
            messages: system,
            dropped,
            system_tokens: Some(system_tokens),
            budget: max_tokens,
        }
    }
}

impl std::fmt::Debug for ContextTruncator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextTruncator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MessageRole;
    use crate::tokens::EstimateCounter;
    use proptest::prelude::*;

    /// One token per message, so budgets read as message counts.
    struct PerMessage;

    impl TokenCounter for PerMessage {
        fn count_tokens(&self, _model: &str, messages: &[Message]) -> usize {
            messages.len()
        }
    }

    fn truncator() -> ContextTruncator {
        ContextTruncator::new(Arc::new(EstimateCounter))
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  a\n\n\nb \t  c  "), "a\nb c");
        assert_eq!(normalize("x  \n \t\n  y"), "x \n \n y");
        assert_eq!(normalize("\n\n"), "");
    }

    #[test]
    fn fast_path_keeps_everything_and_moves_system_first() {
        let prompts = vec![
            Message::user("hi"),
            Message::system("be   nice"),
            Message::assistant("hello"),
        ];

        let out = truncator().fit("gpt-4", &prompts, 1000);

        assert_eq!(out.system_tokens, None);
        assert_eq!(out.dropped, 0);
        assert_eq!(contents(&out.messages), vec!["be nice", "hi", "hello"]);
    }

    #[test]
    fn slow_path_keeps_most_recent_suffix() {
        let truncator = ContextTruncator::new(Arc::new(PerMessage));
        let prompts = vec![
            Message::system("rules"),
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
            Message::assistant("four"),
        ];

        // system costs 1, so 3 remain; the dialogue must stay below 3
        let out = truncator.fit("gpt-4", &prompts, 4);

        assert_eq!(contents(&out.messages), vec!["rules", "three", "four"]);
        assert_eq!(out.dropped, 2);
        assert_eq!(out.system_tokens, Some(1));
        assert!(!out.system_exhausted());
    }

    #[test]
    fn system_only_when_system_consumes_budget() {
        let truncator = ContextTruncator::new(Arc::new(PerMessage));
        let prompts = vec![
            Message::system("a"),
            Message::system("b"),
            Message::user("question"),
        ];

        let out = truncator.fit("gpt-4", &prompts, 2);

        assert_eq!(contents(&out.messages), vec!["a", "b"]);
        assert!(out.system_exhausted());
        assert_eq!(
            out.into_messages(),
            Err(ContextError::BudgetExceeded {
                system_tokens: 2,
                budget: 2
            })
        );
    }

    #[test]
    fn newest_message_alone_too_large_drops_all_dialogue() {
        let prompts = vec![
            Message::system("s"),
            Message::user("x".repeat(400)),
        ];

        let out = truncator().fit("gpt-4", &prompts, 40);

        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, MessageRole::System);
        assert!(out.into_messages().is_ok());
    }

    #[test]
    fn truncate_returns_fit_messages() {
        let prompts = vec![Message::user("hello")];
        assert_eq!(
            contents(&truncator().truncate("gpt-4", &prompts, 100)),
            vec!["hello"]
        );
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        (0..3u8, "[a-z \n]{0,60}").prop_map(|(role, text)| match role {
            0 => Message::system(text),
            1 => Message::user(text),
            _ => Message::assistant(text),
        })
    }

    proptest! {
        #[test]
        fn truncate_keeps_every_system_message(
            prompts in prop::collection::vec(arb_message(), 0..12),
            budget in 0usize..200,
        ) {
            let out = truncator().truncate("gpt-4", &prompts, budget);
            let expected: Vec<_> = prompts.iter().filter(|m| m.is_system()).map(|m| m.id).collect();
            let kept: Vec<_> = out.iter().filter(|m| m.is_system()).map(|m| m.id).collect();
            prop_assert_eq!(kept, expected);
        }

        #[test]
        fn truncate_is_idempotent(
            prompts in prop::collection::vec(arb_message(), 0..12),
            budget in 0usize..200,
        ) {
            let first = truncator().truncate("gpt-4", &prompts, budget);
            let second = truncator().truncate("gpt-4", &prompts, budget);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn dialogue_is_a_suffix_within_budget(
            prompts in prop::collection::vec(arb_message(), 0..12),
            budget in 0usize..200,
        ) {
            let out = truncator().fit("gpt-4", &prompts, budget);
            let dialogue: Vec<_> = prompts.iter().filter(|m| !m.is_system()).map(|m| m.id).collect();
            let kept: Vec<_> = out.messages.iter().filter(|m| !m.is_system()).collect();
            let kept_ids: Vec<_> = kept.iter().map(|m| m.id).collect();

            prop_assert!(dialogue.ends_with(&kept_ids));

            if let Some(system_tokens) = out.system_tokens {
                if system_tokens >= budget {
                    prop_assert!(kept.is_empty());
                } else {
                    let kept: Vec<Message> = kept.into_iter().cloned().collect();
                    prop_assert!(EstimateCounter.count_tokens("gpt-4", &kept) < budget - system_tokens);
                }
            }
        }
    }
}

//! Should-respond classification for a single turn.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::composer::{ContextComposer, State};
use crate::model::{Classifier, ModelClass};
use crate::templates::TemplateKind;
use crate::turn::Turn;

/// Outcome vocabulary of the should-respond classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipationDecision {
    Respond,
    Ignore,
    Stop,
}

impl ParticipationDecision {
    /// Exact-match parse of a classifier token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "RESPOND" => Some(Self::Respond),
            "IGNORE" => Some(Self::Ignore),
            "STOP" => Some(Self::Stop),
            _ => None,
        }
    }

    /// Only `RESPOND` participates; unknown tokens never do.
    pub fn participates(token: &str) -> bool {
        Self::from_token(token) == Some(Self::Respond)
    }
}

/// Latest non-blank line of `history`.
pub fn last_non_empty_line(history: &str) -> Option<&str> {
    history.lines().rev().find(|line| !line.trim().is_empty())
}

pub struct ResponseDecisionEngine {
    composer: Arc<dyn ContextComposer>,
    classifier: Arc<dyn Classifier>,
}

impl ResponseDecisionEngine {
    pub fn new(composer: Arc<dyn ContextComposer>, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            composer,
            classifier,
        }
    }

    /// Decide whether the agent should contribute after `turn`.
    ///
    /// Malformed classifier output is a negative decision, not an error.
    /// Errors only come from the composer or the classifier transport.
    pub async fn should_respond(&self, turn: &Turn, state: &State) -> Result<bool> {
        let mut decision_state = state.clone();
        decision_state.last_message = last_non_empty_line(&state.recent_messages)
            .unwrap_or_default()
            .to_string();

        let context = self
            .composer
            .render_template(&decision_state, TemplateKind::ShouldRespond)
            .await
            .context("Failed to render should-respond context")?;

        let token = self
            .classifier
            .decide(&context, ModelClass::Small)
            .await
            .context("Should-respond classification failed")?;

        let respond = ParticipationDecision::participates(&token);
        tracing::info!(
            "Decision for turn {}: {:?} (respond: {})",
            turn.id,
            token,
            respond
        );
        Ok(respond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::TemplateComposer;
    use crate::config::CharacterConfig;
    use crate::store::InMemoryTurnStore;
    use crate::testing::{turn, FailingClassifier, StubClassifier};

    fn engine_with(classifier: Arc<dyn Classifier>) -> ResponseDecisionEngine {
        let composer = Arc::new(TemplateComposer::new(
            Arc::new(InMemoryTurnStore::new()),
            CharacterConfig::default(),
            "agent-1".to_string(),
            32,
        ));
        ResponseDecisionEngine::new(composer, classifier)
    }

    fn state_with_history(history: &str) -> State {
        State {
            agent_name: "wuchang".to_string(),
            role: "witch".to_string(),
            recent_messages: history.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn last_line_skips_trailing_blank_entries() {
        assert_eq!(
            last_non_empty_line("(1) a: hi\n(2) b: vote\n\n   \n"),
            Some("(2) b: vote")
        );
        assert_eq!(last_non_empty_line("\n\n"), None);
        assert_eq!(last_non_empty_line(""), None);
    }

    #[test]
    fn only_the_exact_respond_token_participates() {
        assert!(ParticipationDecision::participates("RESPOND"));
        for token in ["IGNORE", "STOP", "respond", "[RESPOND]", " RESPOND", "", "maybe"] {
            assert!(!ParticipationDecision::participates(token), "{:?}", token);
        }
        assert_eq!(
            ParticipationDecision::from_token("STOP"),
            Some(ParticipationDecision::Stop)
        );
    }

    #[tokio::test]
    async fn respond_token_yields_participation() {
        let classifier = Arc::new(StubClassifier::new("RESPOND"));
        let engine = engine_with(classifier.clone());
        let history = "(1) [host] reubenhe: witch, open your eyes\n";

        let respond = engine
            .should_respond(&turn("r", "host", "witch, open your eyes", 1), &state_with_history(history))
            .await
            .unwrap();

        assert!(respond);
        let contexts = classifier.contexts.lock().unwrap();
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].0.contains("(1) [host] reubenhe: witch, open your eyes"));
        assert!(contexts[0].0.contains("witch"));
        assert_eq!(contexts[0].1, ModelClass::Small);
    }

    #[tokio::test]
    async fn other_tokens_yield_no_participation() {
        for token in ["IGNORE", "STOP", "I think I should speak"] {
            let engine = engine_with(Arc::new(StubClassifier::new(token)));
            let respond = engine
                .should_respond(&turn("r", "u", "hi", 1), &state_with_history("(1) u: hi"))
                .await
                .unwrap();
            assert!(!respond, "{}", token);
        }
    }

    #[tokio::test]
    async fn decision_sees_only_the_latest_history_line() {
        let classifier = Arc::new(StubClassifier::new("IGNORE"));
        let engine = engine_with(classifier.clone());
        let history = "(1) [a] old: first message\n(2) [b] new: latest message\n\n";

        engine
            .should_respond(&turn("r", "b", "latest message", 2), &state_with_history(history))
            .await
            .unwrap();

        let contexts = classifier.contexts.lock().unwrap();
        assert!(contexts[0].0.contains("(2) [b] new: latest message"));
        assert!(!contexts[0].0.contains("first message"));
    }

    #[tokio::test]
    async fn classifier_failure_is_an_error() {
        let engine = engine_with(Arc::new(FailingClassifier));
        let result = engine
            .should_respond(&turn("r", "u", "hi", 1), &state_with_history("(1) u: hi"))
            .await;
        assert!(result.is_err());
    }
}

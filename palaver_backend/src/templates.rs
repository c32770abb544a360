//! Built-in prompt templates and per-character override resolution.
//!
//! Templates use `{{placeholder}}` slots filled from a composed [`State`].
//!
//! [`State`]: crate::composer::State

use crate::config::TemplateOverrides;

/// Which rendered context a pipeline stage asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Binary participation decision
    ShouldRespond,
    /// Reply generation
    MessageHandler,
}

pub const SHOULD_RESPOND_FOOTER: &str = "\
Response options are [RESPOND], [IGNORE] and [STOP].
Reply with exactly one of the options and nothing else.";

pub const MESSAGE_COMPLETION_FOOTER: &str = "\
Response format should be formatted in a JSON block like this:
```json
{ \"user\": \"{{agentName}}\", \"text\": \"string\", \"action\": \"string\" }
```";

pub const DEFAULT_SHOULD_RESPOND_TEMPLATE: &str = "\
# About {{agentName}}:
{{bio}}

# Rules
{{rules}}

# Your role
You are {{agentName}}. Your role is {{role}}.
If the latest message addresses your role or it is your turn to speak, choose [RESPOND].
If the latest message was sent by {{agentName}}, choose [IGNORE].
If the conversation has ended, choose [STOP].

# Latest message
{{lastMessage}}

# INSTRUCTIONS: Choose the option that best describes {{agentName}}'s response to the latest message.
";

pub const DEFAULT_MESSAGE_HANDLER_TEMPLATE: &str = "\
# Task: Generate dialog for the character {{agentName}}.
About {{agentName}}:
{{bio}}
{{lore}}

Examples of {{agentName}}'s dialog:
{{messageExamples}}

# Rules
{{rules}}

# Your role
{{role}}

# Conversation so far
{{recentMessages}}

# Task: Write {{agentName}}'s next message in the voice and perspective of {{agentName}}.
Current message:
{{currentPost}}
";

/// First `Some` in `candidates`, in order.
pub fn first_present<'a>(candidates: &[Option<&'a str>]) -> Option<&'a str> {
    candidates.iter().find_map(|candidate| *candidate)
}

/// Template text for `kind`: channel override, then generic override, then
/// the built-in default.
///
/// Only the built-in default gets the output-format footer. An override is
/// used verbatim and carries its own.
pub fn resolve_template(overrides: &TemplateOverrides, kind: TemplateKind) -> String {
    let (channel, generic, default, footer) = match kind {
        TemplateKind::ShouldRespond => (
            overrides.telegram_should_respond.as_deref(),
            overrides.should_respond.as_deref(),
            DEFAULT_SHOULD_RESPOND_TEMPLATE,
            SHOULD_RESPOND_FOOTER,
        ),
        TemplateKind::MessageHandler => (
            overrides.telegram_message_handler.as_deref(),
            overrides.message_handler.as_deref(),
            DEFAULT_MESSAGE_HANDLER_TEMPLATE,
            MESSAGE_COMPLETION_FOOTER,
        ),
    };

    match first_present(&[channel, generic]) {
        Some(custom) => custom.to_string(),
        None => format!("{}\n{}", default, footer),
    }
}

//! Message sanitizing and history windowing.

use flowgate_core::message::{ModelMessage, Role};

/// Drop messages the gateway cannot accept.
///
/// A message survives when its role is user, assistant, system or tool AND
/// it has content, a tool-call id, or assistant tool calls. Roles come out
/// normalized.
pub fn sanitize_messages(messages: Vec<ModelMessage>) -> Vec<ModelMessage> {
    messages
        .into_iter()
        .filter_map(|mut msg| {
            msg.role = match &msg.role {
                Role::Other(raw) => Role::parse(raw),
                other => other.clone(),
            };
            if !msg.role.is_supported() {
                return None;
            }
            let keep = msg.has_content()
                || !msg.tool_call_id.trim().is_empty()
                || !msg.assistant_tool_call_ids().is_empty();
            keep.then_some(msg)
        })
        .collect()
}

/// Keep at most `limit` user turns, counted from the end.
///
/// The returned suffix starts at the oldest kept user message; anything
/// before it (including assistant or tool messages) is dropped. `limit <= 0`
/// disables the cap.
pub fn limit_history_turns(messages: Vec<ModelMessage>, limit: i64) -> Vec<ModelMessage> {
    if limit <= 0 || messages.is_empty() {
        return messages;
    }

    let mut user_count = 0i64;
    let mut last_user_index = messages.len();
    for i in (0..messages.len()).rev() {
        if messages[i].role == Role::User {
            user_count += 1;
            if user_count > limit {
                return messages.into_iter().skip(last_user_index).collect();
            }
            last_user_index = i;
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::message::{ContentPart, ToolCall};
    use serde_json::json;

    #[test]
    fn drops_unsupported_roles() {
        let msgs = vec![
            ModelMessage::text(Role::Other("item_reference".into()), "x"),
            ModelMessage::text(Role::Other("   ".into()), "x"),
            ModelMessage::user("keep"),
        ];
        let out = sanitize_messages(msgs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text_content(), "keep");
    }

    #[test]
    fn drops_empty_messages_but_keeps_tool_links() {
        let empty = ModelMessage::assistant("   ");
        let tool_result = ModelMessage {
            content: None,
            ..ModelMessage::tool_result("call_1", "")
        };
        let tool_use = ModelMessage::new(Role::Assistant, None)
            .with_tool_calls(vec![ToolCall::function("call_1", "exec", "{}")]);
        let part_use = ModelMessage::with_parts(
            Role::Assistant,
            vec![ContentPart::tool_call("call_2", "exec", json!({}))],
        );

        let out = sanitize_messages(vec![empty, tool_result, tool_use, part_use]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].role, Role::Tool);
    }

    #[test]
    fn sanitizer_exclusivity() {
        let msgs = vec![
            ModelMessage::text(Role::Other("developer".into()), "rules"),
            ModelMessage::system("sys"),
            ModelMessage::user(""),
            ModelMessage::assistant("reply"),
        ];
        let out = sanitize_messages(msgs);
        assert!(out.iter().all(|m| m.role.is_supported() && m.has_content()));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn limit_history_keeps_last_user_turns() {
        let mut msgs = Vec::new();
        for i in 0..20 {
            msgs.push(ModelMessage::user(format!("q{i}")));
            msgs.push(ModelMessage::assistant(format!("a{i}")));
        }
        let out = limit_history_turns(msgs, 10);
        assert_eq!(out.len(), 20);
        assert_eq!(out[0].text_content(), "q10");
        assert_eq!(out.iter().filter(|m| m.role == Role::User).count(), 10);
    }

    #[test]
    fn limit_history_drops_leading_non_user_messages() {
        let msgs = vec![
            ModelMessage::user("old"),
            ModelMessage::assistant("old answer"),
            ModelMessage::user("new"),
            ModelMessage::assistant("new answer"),
        ];
        let out = limit_history_turns(msgs, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text_content(), "new");
    }

    #[test]
    fn limit_history_disabled_or_unreached() {
        let msgs = vec![ModelMessage::assistant("a"), ModelMessage::user("b")];
        assert_eq!(limit_history_turns(msgs.clone(), 0).len(), 2);
        assert_eq!(limit_history_turns(msgs, 5).len(), 2);
    }
}

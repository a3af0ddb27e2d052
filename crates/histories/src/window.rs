//! Context-window pruning shared by the history backends.

use capstan_core::message::{Message, Role};

/// Drop the oldest prunable messages until the estimated token total fits
/// the window.
///
/// The leading run of system and developer messages is never pruned; if that
/// head alone exceeds the window, the sequence is left untouched.
pub(crate) fn prune_to_window(messages: &mut Vec<Message>, window: usize) {
    let head = messages
        .iter()
        .take_while(|m| matches!(m.role, Role::System | Role::Developer))
        .count();

    let mut total: usize = messages.iter().map(Message::estimated_tokens).sum();
    while total > window && messages.len() > head {
        let removed = messages.remove(head);
        total -= removed.estimated_tokens();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(chars: usize) -> String {
        "x".repeat(chars)
    }

    #[test]
    fn under_the_window_nothing_is_pruned() {
        let mut messages = vec![Message::user(filler(40)), Message::assistant(filler(40))];
        prune_to_window(&mut messages, 100);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn oldest_non_system_messages_go_first() {
        let mut messages = vec![
            Message::system(filler(40)),
            Message::user(filler(400)),
            Message::assistant(filler(400)),
            Message::user(filler(40)),
        ];
        // 10 + 100 + 100 + 10 estimated tokens against a window of 150.
        prune_to_window(&mut messages, 150);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn instruction_head_survives_even_when_oversized() {
        let mut messages = vec![
            Message::system(filler(400)),
            Message::developer(filler(400)),
            Message::user(filler(40)),
        ];
        prune_to_window(&mut messages, 50);

        // Only the user turn was prunable.
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role != Role::User));
    }
}

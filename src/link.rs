// Link registry: chats that asked to be linked, and confirmed target → controller pairs.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::transport::ChatId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Nobody with this id is waiting to be linked.
    #[error("chat {0} has no pending link request")]
    NotPending(ChatId),
}

/// What a confirmed link replaced, so the change can be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkChange {
    pub target: ChatId,
    pub controller: ChatId,
    previous_controller: Option<ChatId>,
    previous_focus: Option<ChatId>,
    was_awaiting: bool,
}

/// All linking state of the process.
///
/// `linked` is keyed by target chat, so a target always has exactly one
/// controller. `focus` remembers, per controller, the target it linked most
/// recently; plain text from that controller is interpreted against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRegistry {
    pending: BTreeSet<ChatId>,
    linked: BTreeMap<ChatId, ChatId>,
    awaiting_names: BTreeSet<ChatId>,
    focus: BTreeMap<ChatId, ChatId>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted rows.
    pub fn from_parts(
        pending: impl IntoIterator<Item = ChatId>,
        linked: impl IntoIterator<Item = (ChatId, ChatId)>,
        awaiting_names: impl IntoIterator<Item = ChatId>,
        focus: impl IntoIterator<Item = (ChatId, ChatId)>,
    ) -> Self {
        Self {
            pending: pending.into_iter().collect(),
            linked: linked.into_iter().collect(),
            awaiting_names: awaiting_names.into_iter().collect(),
            focus: focus.into_iter().collect(),
        }
    }

    /// Mark `controller` as waiting for a target chat to echo its id.
    /// Requesting twice has no further effect.
    pub fn request_link(&mut self, controller: ChatId) {
        self.pending.insert(controller);
    }

    pub fn is_pending(&self, controller: ChatId) -> bool {
        self.pending.contains(&controller)
    }

    /// Pair `target` with `controller`, which must have a pending request.
    ///
    /// Overwrites any previous controller of `target`, moves `target` into
    /// the awaiting-names set and makes it the controller's focus.
    pub fn confirm_link(
        &mut self,
        target: ChatId,
        controller: ChatId,
    ) -> Result<LinkChange, LinkError> {
        if !self.pending.remove(&controller) {
            return Err(LinkError::NotPending(controller));
        }
        Ok(LinkChange {
            target,
            controller,
            previous_controller: self.linked.insert(target, controller),
            was_awaiting: !self.awaiting_names.insert(target),
            previous_focus: self.focus.insert(controller, target),
        })
    }

    /// Undo a `confirm_link`, leaving the controller pending again.
    pub fn revert(&mut self, change: LinkChange) {
        self.pending.insert(change.controller);
        match change.previous_controller {
            Some(previous) => self.linked.insert(change.target, previous),
            None => self.linked.remove(&change.target),
        };
        if change.was_awaiting {
            self.awaiting_names.insert(change.target);
        } else {
            self.awaiting_names.remove(&change.target);
        }
        match change.previous_focus {
            Some(previous) => self.focus.insert(change.controller, previous),
            None => self.focus.remove(&change.controller),
        };
    }

    pub fn controller_of(&self, target: ChatId) -> Option<ChatId> {
        self.linked.get(&target).copied()
    }

    pub fn focus_of(&self, controller: ChatId) -> Option<ChatId> {
        self.focus.get(&controller).copied()
    }

    /// The target plain text from `controller` applies to: its focus while
    /// it still controls it, otherwise another target it still controls
    /// (highest id first).
    pub fn current_target(&self, controller: ChatId) -> Option<ChatId> {
        self.focus_of(controller)
            .filter(|target| self.controller_of(*target) == Some(controller))
            .or_else(|| {
                self.linked
                    .iter()
                    .rev()
                    .find(|(_, c)| **c == controller)
                    .map(|(target, _)| *target)
            })
    }

    pub fn is_awaiting_names(&self, target: ChatId) -> bool {
        self.awaiting_names.contains(&target)
    }

    /// The roster for `target` was built; stop waiting for names.
    pub fn names_received(&mut self, target: ChatId) {
        self.awaiting_names.remove(&target);
    }

    pub fn pending(&self) -> impl Iterator<Item = ChatId> + '_ {
        self.pending.iter().copied()
    }

    pub fn linked_pairs(&self) -> impl Iterator<Item = (ChatId, ChatId)> + '_ {
        self.linked.iter().map(|(t, c)| (*t, *c))
    }
}

/// Parse a chat id the way a user types it: optional leading `-`, then
/// decimal digits only. Anything else is not an id.
pub fn parse_chat_id(text: &str) -> Option<ChatId> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_id() {
        assert_eq!(parse_chat_id("208589966"), Some(208589966));
        assert_eq!(parse_chat_id("-1001234567890"), Some(-1001234567890));
        assert_eq!(parse_chat_id("0"), Some(0));
        assert_eq!(parse_chat_id(""), None);
        assert_eq!(parse_chat_id("-"), None);
        assert_eq!(parse_chat_id("+12"), None);
        assert_eq!(parse_chat_id(" 12"), None);
        assert_eq!(parse_chat_id("12a"), None);
        assert_eq!(parse_chat_id("--12"), None);
        // Too large for i64
        assert_eq!(parse_chat_id("99999999999999999999"), None);
    }

    #[test]
    fn test_confirm_requires_pending() {
        let mut reg = LinkRegistry::new();
        assert_eq!(reg.confirm_link(-100, 7), Err(LinkError::NotPending(7)));
        assert_eq!(reg.controller_of(-100), None);
        assert!(!reg.is_awaiting_names(-100));
    }

    #[test]
    fn test_request_and_confirm() {
        let mut reg = LinkRegistry::new();
        reg.request_link(7);
        reg.request_link(7);
        assert!(reg.is_pending(7));
        assert_eq!(reg.pending().count(), 1);

        reg.confirm_link(-100, 7).unwrap();
        assert!(!reg.is_pending(7));
        assert_eq!(reg.controller_of(-100), Some(7));
        assert!(reg.is_awaiting_names(-100));
        assert_eq!(reg.focus_of(7), Some(-100));

        // The pending request was consumed
        assert_eq!(reg.confirm_link(-200, 7), Err(LinkError::NotPending(7)));
    }

    #[test]
    fn test_relink_overwrites_controller() {
        let mut reg = LinkRegistry::new();
        reg.request_link(1);
        reg.confirm_link(-100, 1).unwrap();
        reg.request_link(2);
        reg.confirm_link(-100, 2).unwrap();

        assert_eq!(reg.controller_of(-100), Some(2));
        assert_eq!(reg.linked_pairs().count(), 1);
    }

    #[test]
    fn test_controller_with_two_targets_focuses_latest() {
        let mut reg = LinkRegistry::new();
        reg.request_link(1);
        reg.confirm_link(-100, 1).unwrap();
        reg.request_link(1);
        reg.confirm_link(-200, 1).unwrap();

        assert_eq!(reg.focus_of(1), Some(-200));
        assert_eq!(reg.controller_of(-100), Some(1));
        assert_eq!(reg.controller_of(-200), Some(1));
    }

    #[test]
    fn test_displaced_focus_falls_back_to_controlled_target() {
        let mut reg = LinkRegistry::new();
        reg.request_link(1);
        reg.confirm_link(-100, 1).unwrap();
        reg.names_received(-100);
        reg.request_link(1);
        reg.confirm_link(-200, 1).unwrap();
        assert_eq!(reg.current_target(1), Some(-200));

        // Another controller takes -200 over
        reg.request_link(2);
        reg.confirm_link(-200, 2).unwrap();
        assert_eq!(reg.focus_of(1), Some(-200));
        assert_eq!(reg.current_target(1), Some(-100));
        assert_eq!(reg.current_target(2), Some(-200));

        // Losing the last target leaves nothing
        reg.request_link(2);
        reg.confirm_link(-100, 2).unwrap();
        assert_eq!(reg.current_target(1), None);
    }

    #[test]
    fn test_revert_restores_previous_state() {
        let mut reg = LinkRegistry::new();
        reg.request_link(1);
        reg.confirm_link(-100, 1).unwrap();
        reg.names_received(-100);
        reg.request_link(2);
        let before = reg.clone();

        let change = reg.confirm_link(-100, 2).unwrap();
        assert_eq!(reg.controller_of(-100), Some(2));
        reg.revert(change);
        assert_eq!(reg, before);

        let mut fresh = LinkRegistry::new();
        fresh.request_link(3);
        let before = fresh.clone();
        let change = fresh.confirm_link(-300, 3).unwrap();
        fresh.revert(change);
        assert_eq!(fresh, before);
    }

    #[test]
    fn test_names_received() {
        let mut reg = LinkRegistry::new();
        reg.request_link(1);
        reg.confirm_link(-100, 1).unwrap();
        reg.names_received(-100);
        assert!(!reg.is_awaiting_names(-100));
        assert_eq!(reg.controller_of(-100), Some(1));
    }

    #[test]
    fn test_from_parts_round_trip() {
        let reg = LinkRegistry::from_parts(vec![5], vec![(-100, 1)], vec![-100], vec![(1, -100)]);
        assert!(reg.is_pending(5));
        assert_eq!(reg.controller_of(-100), Some(1));
        assert!(reg.is_awaiting_names(-100));
        assert_eq!(reg.focus_of(1), Some(-100));
    }
}

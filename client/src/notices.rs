//! User-facing notices: transient toasts, the persistent inbox and the quest popup

use serde_json::Value;
use shared::{now_timestamp, Friend, InboxNotification, QuestUpdate};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub const MAX_TOASTS: usize = 5;
pub const TOAST_DURATION: Duration = Duration::from_secs(5);
pub const QUEST_POPUP_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub level: ToastLevel,
    pub title: String,
    pub message: String,
    pub shown_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestPopup {
    pub update: QuestUpdate,
    pub shown_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Profile {
    pub level: u32,
    pub exp: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Notices {
    toasts: VecDeque<Toast>,
    next_toast_id: u64,
    inbox: Vec<InboxNotification>,
    next_local_id: u64,
    unread: usize,
    quest_popup: Option<QuestPopup>,
    profile: Profile,
    online_friends: Vec<Friend>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a toast, evicting the oldest past [`MAX_TOASTS`].
    pub fn push_toast(
        &mut self,
        level: ToastLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> u64 {
        self.next_toast_id += 1;
        let id = self.next_toast_id;
        self.toasts.push_back(Toast {
            id,
            level,
            title: title.into(),
            message: message.into(),
            shown_at: Instant::now(),
        });
        while self.toasts.len() > MAX_TOASTS {
            self.toasts.pop_front();
        }
        id
    }

    pub fn dismiss_oldest_toast(&mut self) -> Option<Toast> {
        self.toasts.pop_front()
    }

    pub fn toasts(&self) -> impl Iterator<Item = &Toast> {
        self.toasts.iter()
    }

    pub fn latest_toast(&self) -> Option<&Toast> {
        self.toasts.back()
    }

    /// Adds to the front of the inbox. A repeated id replaces the old entry.
    pub fn push_inbox(&mut self, notification: InboxNotification) {
        self.remove(&notification.id);
        if !notification.is_read {
            self.unread += 1;
        }
        self.inbox.insert(0, notification);
    }

    /// Files a client-built inbox entry for a realtime event.
    pub fn notify(
        &mut self,
        kind: &str,
        title: impl Into<String>,
        message: impl Into<String>,
        data: Value,
    ) -> String {
        self.next_local_id += 1;
        let id = format!("local-{}", self.next_local_id);
        self.push_inbox(InboxNotification {
            id: id.clone(),
            kind: kind.to_string(),
            title: title.into(),
            message: message.into(),
            is_read: false,
            created_at: Some(now_timestamp()),
            data,
        });
        id
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.inbox.iter_mut().find(|n| n.id == id) {
            Some(notification) if !notification.is_read => {
                notification.is_read = true;
                self.unread = self.unread.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for notification in &mut self.inbox {
            notification.is_read = true;
        }
        self.unread = 0;
    }

    pub fn remove(&mut self, id: &str) -> Option<InboxNotification> {
        let index = self.inbox.iter().position(|n| n.id == id)?;
        let removed = self.inbox.remove(index);
        if !removed.is_read {
            self.unread = self.unread.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn inbox(&self) -> &[InboxNotification] {
        &self.inbox
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn show_quest(&mut self, update: QuestUpdate) {
        self.quest_popup = Some(QuestPopup {
            update,
            shown_at: Instant::now(),
        });
    }

    pub fn quest_popup(&self) -> Option<&QuestPopup> {
        self.quest_popup.as_ref()
    }

    /// Drops toasts and the quest popup that have been visible long enough.
    pub fn expire(&mut self, now: Instant) {
        self.toasts
            .retain(|toast| now.saturating_duration_since(toast.shown_at) < TOAST_DURATION);

        if let Some(popup) = &self.quest_popup {
            if now.saturating_duration_since(popup.shown_at) >= QUEST_POPUP_DURATION {
                self.quest_popup = None;
            }
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn set_level(&mut self, level: u32, exp: u64) {
        self.profile = Profile { level, exp };
    }

    pub fn online_friends(&self) -> &[Friend] {
        &self.online_friends
    }

    pub fn set_online_friends(&mut self, friends: Vec<Friend>) {
        self.online_friends = friends;
    }

    pub fn clear(&mut self) {
        *self = Self {
            next_toast_id: self.next_toast_id,
            next_local_id: self.next_local_id,
            ..Self::default()
        };
    }
}

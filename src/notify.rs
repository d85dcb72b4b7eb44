use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Booking, Visit};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Booking activity on one area.
    Area(String),
    /// Visit scheduling and invitation activity.
    Visits,
}

/// Committed domain changes, published after the store acknowledged them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    BookingCreated(Booking),
    BookingDeleted { id: Ulid, area: String, date: NaiveDate },
    VisitScheduled(Visit),
    InvitationResent(Visit),
    VisitAccepted { id: Ulid },
}

impl Notice {
    pub fn topic(&self) -> Topic {
        match self {
            Notice::BookingCreated(b) => Topic::Area(b.area.clone()),
            Notice::BookingDeleted { area, .. } => Topic::Area(area.clone()),
            Notice::VisitScheduled(_) | Notice::InvitationResent(_) | Notice::VisitAccepted { .. } => {
                Topic::Visits
            }
        }
    }
}

/// Broadcast hub; the invitation mailer and other listeners subscribe per topic.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Notice> {
        self.channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, notice: Notice) {
        if let Some(sender) = self.channels.get(&notice.topic()) {
            let _ = sender.send(notice);
        }
    }

    pub fn remove(&self, topic: &Topic) {
        self.channels.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Topic::Visits);

        let notice = Notice::VisitAccepted { id: Ulid::new() };
        hub.send(notice.clone());

        assert_eq!(rx.recv().await.unwrap(), notice);
    }

    #[tokio::test]
    async fn area_topics_are_isolated() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Topic::Area("a1".into()));
        hub.send(Notice::BookingDeleted {
            id: Ulid::new(),
            area: "a2".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(Notice::VisitAccepted { id: Ulid::new() });
        hub.remove(&Topic::Visits);
    }
}

//! In-process fan-out of new messages to live subscribers.
//!
//! Single-node only: subscribers on another process never see the event.

use crate::models::conversation::Message;
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use uuid::Uuid;

const RELAY_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct MessageHub {
    tx: broadcast::Sender<Message>,
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(RELAY_CAPACITY);
        Self { tx }
    }

    /// Returns how many subscribers were live. Zero is not an error.
    pub fn publish(&self, message: Message) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    /// New messages of one conversation, from now on.
    ///
    /// A subscriber that falls behind skips what it missed and keeps going.
    pub fn subscribe(
        &self,
        conversation_id: Uuid,
    ) -> impl Stream<Item = Message> + Send + 'static + use<> {
        let rx = self.tx.subscribe();
        futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) if message.conversation_id == conversation_id => {
                        return Some((message, rx));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(conversation = %conversation_id, skipped, "relay subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{conversation::SenderSnapshot, reference::Role};
    use chrono::Utc;
    use futures::StreamExt;
    use sqlx::types::Json;

    fn message(conversation_id: Uuid, body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender: Json(SenderSnapshot {
                user_id: "u1".into(),
                display_name: "Ana".into(),
                role: Role::Client,
            }),
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_filters_by_conversation() {
        let hub = MessageHub::new();
        let wanted = Uuid::new_v4();
        let other = Uuid::new_v4();

        let stream = hub.subscribe(wanted);
        futures::pin_mut!(stream);

        assert_eq!(hub.publish(message(other, "not for you")), 1);
        hub.publish(message(wanted, "hello"));

        let got = stream.next().await.unwrap();
        assert_eq!(got.body, "hello");
    }

    #[tokio::test]
    async fn test_subscription_outlives_hub_handle() {
        let hub = MessageHub::new();
        let id = Uuid::new_v4();

        let stream = {
            let handle = hub.clone();
            handle.subscribe(id)
        };
        futures::pin_mut!(stream);

        hub.publish(message(id, "still here"));
        assert_eq!(stream.next().await.unwrap().body, "still here");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = MessageHub::new();
        assert_eq!(hub.publish(message(Uuid::new_v4(), "x")), 0);
    }
}

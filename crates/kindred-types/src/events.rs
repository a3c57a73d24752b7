use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// A message was posted to a group or private discussion
    MessageCreate {
        id: Uuid,
        discussion_id: Uuid,
        user_id: Uuid,
        content: String,
        private: bool,
        timestamp: DateTime<Utc>,
    },

    /// A user started typing in a discussion
    TypingStart { discussion_id: Uuid, user_id: Uuid },
}

impl GatewayEvent {
    /// Returns the discussion id this event is scoped to. Events that return
    /// `None` are global and delivered to every connected client.
    pub fn discussion_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { discussion_id, .. } => Some(*discussion_id),
            Self::TypingStart { discussion_id, .. } => Some(*discussion_id),
            // Ready is sent directly, never broadcast
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to events for specific discussions. The server only
    /// forwards discussion-scoped events for subscribed ids.
    Subscribe { discussion_ids: Vec<Uuid> },

    /// Stop receiving events for specific discussions
    Unsubscribe { discussion_ids: Vec<Uuid> },

    /// Indicate typing in a discussion
    StartTyping { discussion_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_create_is_discussion_scoped() {
        let id = Uuid::new_v4();
        let event = GatewayEvent::MessageCreate {
            id: Uuid::new_v4(),
            discussion_id: id,
            user_id: Uuid::new_v4(),
            content: "hello".into(),
            private: false,
            timestamp: Utc::now(),
        };
        assert_eq!(event.discussion_id(), Some(id));
        assert_eq!(
            GatewayEvent::Ready { user_id: Uuid::new_v4() }.discussion_id(),
            None
        );
    }

    #[test]
    fn commands_round_trip_through_json() {
        let cmd = GatewayCommand::Subscribe {
            discussion_ids: vec![Uuid::new_v4()],
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"Subscribe\""));
        let back: GatewayCommand = serde_json::from_str(&json).unwrap();
        match back {
            GatewayCommand::Subscribe { discussion_ids } => assert_eq!(discussion_ids.len(), 1),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}

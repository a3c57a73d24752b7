use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle of a match request. `Pending` is the only non-terminal state;
/// the only transitions out of it are accept, decline, and expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown match status: {}", other)),
        }
    }
}

/// Emotions a note can be tagged with.
pub const EMOTIONS: &[&str] = &[
    "joy",
    "sadness",
    "anger",
    "fear",
    "anxiety",
    "love",
    "disappointment",
    "hope",
    "loneliness",
    "gratitude",
];

/// Situations a note can be tagged with.
pub const SITUATIONS: &[&str] = &[
    "work",
    "studies",
    "relationships",
    "family",
    "health",
    "finances",
    "personal-project",
    "life-transition",
    "loss",
    "celebration",
    "big-decision",
    "conflict",
    "other",
];

/// Reactions a user can leave on a note.
pub const REACTIONS: &[&str] = &["heart", "comfort", "strength", "gratitude", "hope"];

pub fn is_valid_emotion(emotion: &str) -> bool {
    EMOTIONS.contains(&emotion)
}

pub fn is_valid_situation(situation: &str) -> bool {
    SITUATIONS.contains(&situation)
}

pub fn is_valid_reaction(reaction: &str) -> bool {
    REACTIONS.contains(&reaction)
}

/// Time-to-live configuration for every time-boxed entity. Group rooms are
/// short-lived, match requests wait a day, private discussions run two hours
/// from acceptance (not from the original request).
#[derive(Debug, Clone, Copy)]
pub struct Ttls {
    pub group_discussion: Duration,
    pub match_request: Duration,
    pub private_discussion: Duration,
}

impl Default for Ttls {
    fn default() -> Self {
        Self {
            group_discussion: Duration::from_secs(30 * 60),
            match_request: Duration::from_secs(24 * 60 * 60),
            private_discussion: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in ["pending", "accepted", "declined", "expired"] {
            let parsed: MatchStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("cancelled".parse::<MatchStatus>().is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!MatchStatus::Pending.is_terminal());
        assert!(MatchStatus::Accepted.is_terminal());
        assert!(MatchStatus::Declined.is_terminal());
        assert!(MatchStatus::Expired.is_terminal());
    }

    #[test]
    fn catalogs_accept_known_tags() {
        assert!(is_valid_emotion("joy"));
        assert!(!is_valid_emotion("Joy"));
        assert!(is_valid_situation("work"));
        assert!(!is_valid_situation("office"));
        assert!(is_valid_reaction("comfort"));
        assert!(!is_valid_reaction("like"));
    }
}

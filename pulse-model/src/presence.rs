//! Ephemeral presence records for connected users.

use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// TTL-backed record of whether a user is currently connected.
///
/// The canonical lifecycle owner is the connection handler: records are
/// written on connect, overwritten on status change, and the TTL is a safety
/// net for ungraceful disconnects.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PresenceRecord {
    pub user_id: String,
    pub status: PresenceStatus,
    pub connection_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn online(user_id: impl Into<String>, connection_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            status: PresenceStatus::Online,
            connection_id,
            timestamp: Utc::now(),
        }
    }

    pub fn offline(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            status: PresenceStatus::Offline,
            connection_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}

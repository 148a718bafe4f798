//! Domain event union for the platform's circulatory layer.
//!
//! Every variant carries the dotted wire discriminator under a `type` tag
//! (`user.created`, `post.created`, ...) plus its creation timestamp. Events
//! are immutable once published and are serialized to bytes for queue
//! transport; identifiers arrive as strings from the application layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a user account was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum VerificationMethod {
    FlashCall,
    WhatsappOtp,
    SmsOtp,
}

/// Content addressed by shares, flags and engagement events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum ContentKind {
    Post,
    Video,
    Comment,
    UserProfile,
}

/// Feed surfaces the refresh pipeline can rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum FeedKind {
    Circle,
    Discover,
    Trending,
}

/// Notification categories surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum NotificationKind {
    Follow,
    Like,
    Comment,
    Mention,
    Message,
    System,
}

/// Delivery channels for outbound notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum DeliveryChannel {
    Push,
    Email,
    Sms,
    Whatsapp,
    InApp,
}

/// Supported payment rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum PaymentMethod {
    Fawry,
    VodafoneCash,
    Card,
}

/// Why a piece of content was flagged for moderation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum FlagReason {
    Spam,
    Violence,
    HateSpeech,
    Nsfw,
    Misinformation,
    Other,
}

/// Severity assigned by the flagging pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum FlagSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Kinds of engagement tracked for analytics and interest vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum EngagementKind {
    View,
    Like,
    Comment,
    Share,
    Save,
}

/// Administrative actions recorded against the audit queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum AdminActionKind {
    UserSuspend,
    UserBan,
    ContentRemove,
    SystemConfig,
    Other,
}

/// Service health as reported by system health events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

/// Every event flowing through the bus and the real-time hub.
///
/// The `type` tag is the routing key: the router maps it to a queue and a
/// priority, and subscribers register handlers against it.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "type", rename_all_fields = "camelCase")
)]
pub enum DomainEvent {
    #[cfg_attr(feature = "serde", serde(rename = "user.created"))]
    UserCreated {
        user_id: String,
        email: String,
        display_name: String,
        created_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "user.verified"))]
    UserVerified {
        user_id: String,
        verification_method: VerificationMethod,
        verified_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "user.followed"))]
    UserFollowed {
        follower_id: String,
        followee_id: String,
        timestamp: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "user.blocked"))]
    UserBlocked {
        blocker_id: String,
        blocked_id: String,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "post.created"))]
    PostCreated {
        post_id: String,
        author_id: String,
        content: String,
        media_urls: Vec<String>,
        hashtags: Vec<String>,
        mentions: Vec<String>,
        created_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "post.deleted"))]
    PostDeleted {
        post_id: String,
        author_id: String,
        reason: Option<String>,
        deleted_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "video.uploaded"))]
    VideoUploaded {
        video_id: String,
        author_id: String,
        file_name: String,
        file_size: u64,
        uploaded_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "video.transcode.completed"))]
    VideoTranscodeCompleted {
        video_id: String,
        output_urls: HashMap<String, String>,
        thumbnail_url: String,
        duration_secs: f64,
        completed_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "comment.added"))]
    CommentAdded {
        comment_id: String,
        post_id: Option<String>,
        video_id: Option<String>,
        author_id: String,
        content: String,
        parent_comment_id: Option<String>,
        mentions: Vec<String>,
        created_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "like.added"))]
    LikeAdded {
        like_id: String,
        user_id: String,
        post_id: Option<String>,
        comment_id: Option<String>,
        video_id: Option<String>,
        created_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "like.removed"))]
    LikeRemoved {
        like_id: String,
        user_id: String,
        post_id: Option<String>,
        video_id: Option<String>,
        removed_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "share.created"))]
    ShareCreated {
        share_id: String,
        user_id: String,
        content_id: String,
        content_type: ContentKind,
        shared_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "feed.fan-out"))]
    FeedFanOut {
        post_id: String,
        author_id: String,
        followers: Vec<String>,
        created_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "feed.refresh"))]
    FeedRefresh {
        user_id: String,
        feed_type: FeedKind,
        refreshed_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "notification.created"))]
    NotificationCreated {
        notification_id: String,
        user_id: String,
        title: String,
        body: String,
        notification_type: NotificationKind,
        related_entity_id: Option<String>,
        created_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "notification.sent"))]
    NotificationSent {
        notification_id: String,
        user_id: String,
        channel: DeliveryChannel,
        sent_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "payment.initiated"))]
    PaymentInitiated {
        payment_id: String,
        user_id: String,
        amount_cents: i64,
        currency: String,
        method: PaymentMethod,
        initiated_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "payment.completed"))]
    PaymentCompleted {
        payment_id: String,
        user_id: String,
        amount_cents: i64,
        transaction_id: String,
        completed_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "payment.failed"))]
    PaymentFailed {
        payment_id: String,
        user_id: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "content.flagged"))]
    ContentFlagged {
        content_id: String,
        content_type: ContentKind,
        reason: FlagReason,
        flagged_by: String,
        severity: FlagSeverity,
        flagged_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "video.viewed"))]
    VideoViewed {
        video_id: String,
        user_id: String,
        watch_duration_secs: f64,
        watch_percentage: f32,
        viewed_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "content.engagement"))]
    ContentEngagement {
        content_id: String,
        user_id: String,
        engagement_type: EngagementKind,
        engaged_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "user.vector_update"))]
    UserVectorUpdate {
        user_id: String,
        trigger_event: String,
        updated_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "message.sent"))]
    MessageSent {
        message_id: String,
        sender_id: String,
        recipient_id: String,
        content: String,
        sent_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "typing.indicator"))]
    TypingIndicator {
        user_id: String,
        recipient_id: String,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "admin.action"))]
    AdminAction {
        admin_id: String,
        action: AdminActionKind,
        target_id: String,
        reason: Option<String>,
        performed_at: DateTime<Utc>,
    },
    #[cfg_attr(feature = "serde", serde(rename = "system.health"))]
    SystemHealth {
        service: String,
        status: HealthStatus,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The dotted wire discriminator used for routing and subscription.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserCreated { .. } => "user.created",
            Self::UserVerified { .. } => "user.verified",
            Self::UserFollowed { .. } => "user.followed",
            Self::UserBlocked { .. } => "user.blocked",
            Self::PostCreated { .. } => "post.created",
            Self::PostDeleted { .. } => "post.deleted",
            Self::VideoUploaded { .. } => "video.uploaded",
            Self::VideoTranscodeCompleted { .. } => "video.transcode.completed",
            Self::CommentAdded { .. } => "comment.added",
            Self::LikeAdded { .. } => "like.added",
            Self::LikeRemoved { .. } => "like.removed",
            Self::ShareCreated { .. } => "share.created",
            Self::FeedFanOut { .. } => "feed.fan-out",
            Self::FeedRefresh { .. } => "feed.refresh",
            Self::NotificationCreated { .. } => "notification.created",
            Self::NotificationSent { .. } => "notification.sent",
            Self::PaymentInitiated { .. } => "payment.initiated",
            Self::PaymentCompleted { .. } => "payment.completed",
            Self::PaymentFailed { .. } => "payment.failed",
            Self::ContentFlagged { .. } => "content.flagged",
            Self::VideoViewed { .. } => "video.viewed",
            Self::ContentEngagement { .. } => "content.engagement",
            Self::UserVectorUpdate { .. } => "user.vector_update",
            Self::MessageSent { .. } => "message.sent",
            Self::TypingIndicator { .. } => "typing.indicator",
            Self::AdminAction { .. } => "admin.action",
            Self::SystemHealth { .. } => "system.health",
        }
    }

    /// Creation timestamp carried by the variant.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::UserCreated { created_at, .. }
            | Self::PostCreated { created_at, .. }
            | Self::CommentAdded { created_at, .. }
            | Self::LikeAdded { created_at, .. }
            | Self::FeedFanOut { created_at, .. }
            | Self::NotificationCreated { created_at, .. } => *created_at,
            Self::UserVerified { verified_at, .. } => *verified_at,
            Self::UserFollowed { timestamp, .. }
            | Self::UserBlocked { timestamp, .. }
            | Self::TypingIndicator { timestamp, .. }
            | Self::SystemHealth { timestamp, .. } => *timestamp,
            Self::PostDeleted { deleted_at, .. } => *deleted_at,
            Self::VideoUploaded { uploaded_at, .. } => *uploaded_at,
            Self::VideoTranscodeCompleted { completed_at, .. }
            | Self::PaymentCompleted { completed_at, .. } => *completed_at,
            Self::LikeRemoved { removed_at, .. } => *removed_at,
            Self::ShareCreated { shared_at, .. } => *shared_at,
            Self::FeedRefresh { refreshed_at, .. } => *refreshed_at,
            Self::NotificationSent { sent_at, .. }
            | Self::MessageSent { sent_at, .. } => *sent_at,
            Self::PaymentInitiated { initiated_at, .. } => *initiated_at,
            Self::PaymentFailed { failed_at, .. } => *failed_at,
            Self::ContentFlagged { flagged_at, .. } => *flagged_at,
            Self::VideoViewed { viewed_at, .. } => *viewed_at,
            Self::ContentEngagement { engaged_at, .. } => *engaged_at,
            Self::UserVectorUpdate { updated_at, .. } => *updated_at,
            Self::AdminAction { performed_at, .. } => *performed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_wire_discriminator() {
        let event = DomainEvent::PostCreated {
            post_id: "p1".into(),
            author_id: "a1".into(),
            content: "hello".into(),
            media_urls: vec![],
            hashtags: vec![],
            mentions: vec![],
            created_at: Utc::now(),
        };
        assert_eq!(event.event_type(), "post.created");

        let event = DomainEvent::FeedFanOut {
            post_id: "p1".into(),
            author_id: "a1".into(),
            followers: vec!["f1".into()],
            created_at: Utc::now(),
        };
        assert_eq!(event.event_type(), "feed.fan-out");
    }

    #[test]
    fn occurred_at_returns_variant_timestamp() {
        let at = Utc::now();
        let event = DomainEvent::PaymentCompleted {
            payment_id: "pay1".into(),
            user_id: "u1".into(),
            amount_cents: 5_000,
            transaction_id: "tx1".into(),
            completed_at: at,
        };
        assert_eq!(event.occurred_at(), at);
    }
}

//! Domain record types for the board client
//!
//! All records come from the remote service with opaque string ids and
//! service-assigned timestamps. The client never fabricates timestamps for
//! remote records; it only reads them back for ordering.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Order lifecycle status as reported by the remote service.
///
/// The client reacts to whatever value it observes. It does not validate
/// transition legality; the remote service may set any status at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Delivered,
}

/// A kitchen order displayed on the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub order_number: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub store_name: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub kitchen_id: String,
    #[serde(default)]
    pub channel: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A product shown in the carousel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub image_url: String,
    pub logo_url: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub order_index: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Kind of a media item, derived from its URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Detect the media kind from a URL.
    ///
    /// Video hosting links (youtube, vimeo) and common video file extensions
    /// are treated as video; everything else, including an absent URL, is an
    /// image.
    pub fn from_url(url: Option<&str>) -> Self {
        let Some(url) = url else {
            return MediaKind::Image;
        };
        let lower = url.to_ascii_lowercase();
        let is_video = lower.contains("youtube")
            || lower.contains("youtu.be")
            || lower.contains("vimeo")
            || [".mp4", ".webm", ".ogg"].iter().any(|ext| lower.ends_with(ext));
        if is_video {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// A carousel media entry (image or video)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    /// Display duration in seconds (images only; videos run to completion)
    #[serde(default = "default_media_duration")]
    pub duration: i64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub order_index: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_media_duration() -> i64 {
    5
}

impl MediaItem {
    /// The URL the board should render, preferring the video source
    pub fn url(&self) -> Option<&str> {
        self.video_url.as_deref().or(self.image_url.as_deref())
    }

    /// Media kind derived from the render URL
    pub fn kind(&self) -> MediaKind {
        MediaKind::from_url(self.url())
    }
}

/// Board layout assigned to a paired display device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceLayout {
    OrdersList,
    OrdersKanban,
    OrdersOnly,
    OrdersOnlyKanban,
    MediaOnly,
    Default,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        DeviceLayout::OrdersList
    }
}

/// A paired display device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub layout_type: DeviceLayout,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_online: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Whether the device's last heartbeat is recent enough to count as
    /// online. A device that claims `is_online` but stopped heartbeating
    /// is reported offline.
    pub fn heartbeat_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.last_heartbeat {
            Some(at) => now.signed_duration_since(at) <= max_age,
            None => false,
        }
    }
}

/// Per-device board settings (colors, layout split, rotation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSettings {
    pub id: String,
    pub device_id: Option<String>,
    #[serde(default = "default_primary_color")]
    pub primary_color: String,
    #[serde(default)]
    pub logo_url: String,
    pub store_name: Option<String>,
    #[serde(default = "default_orders_percentage")]
    pub orders_percentage: i64,
    #[serde(default = "default_products_percentage")]
    pub products_percentage: i64,
    #[serde(default = "default_media_percentage")]
    pub media_percentage: i64,
    #[serde(default = "default_rotate_interval")]
    pub auto_rotate_interval: i64,
    #[serde(default)]
    pub show_full_name: bool,
    pub products_background_color: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn default_primary_color() -> String {
    "#3b82f6".to_string()
}

fn default_orders_percentage() -> i64 {
    70
}

fn default_products_percentage() -> i64 {
    10
}

fn default_media_percentage() -> i64 {
    20
}

fn default_rotate_interval() -> i64 {
    10
}

/// Common access to record identity and ordering timestamps.
///
/// Lets the reconciliation engine hold every collection in the same map
/// shape and sort projections by last-update time with a created-at
/// fallback.
pub trait Keyed {
    fn key(&self) -> &str;
    fn sort_timestamp(&self) -> Option<DateTime<Utc>>;
}

macro_rules! impl_keyed {
    ($($ty:ty),+) => {
        $(impl Keyed for $ty {
            fn key(&self) -> &str {
                &self.id
            }

            fn sort_timestamp(&self) -> Option<DateTime<Utc>> {
                self.updated_at.or(self.created_at)
            }
        })+
    };
}

impl_keyed!(Order, Product, MediaItem, Device);

impl Keyed for BoardSettings {
    fn key(&self) -> &str {
        &self.id
    }

    fn sort_timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_wire_values() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Ready).unwrap(),
            "\"READY\""
        );
        let status: OrderStatus = serde_json::from_str("\"PREPARING\"").unwrap();
        assert_eq!(status, OrderStatus::Preparing);
    }

    #[test]
    fn test_media_kind_detection() {
        assert_eq!(MediaKind::from_url(None), MediaKind::Image);
        assert_eq!(
            MediaKind::from_url(Some("https://cdn.example.com/banner.png")),
            MediaKind::Image
        );
        assert_eq!(
            MediaKind::from_url(Some("https://cdn.example.com/promo.MP4")),
            MediaKind::Video
        );
        assert_eq!(
            MediaKind::from_url(Some("https://youtu.be/abc123")),
            MediaKind::Video
        );
        assert_eq!(
            MediaKind::from_url(Some("https://vimeo.com/12345")),
            MediaKind::Video
        );
    }

    #[test]
    fn test_order_missing_fields_default() {
        // Partial rows from the feed decode with empty defaults; nothing
        // from a previous revision can leak in through deserialization.
        let order: Order = serde_json::from_str(
            r#"{"id": "o1", "status": "READY"}"#,
        )
        .unwrap();
        assert_eq!(order.customer_name, "");
        assert_eq!(order.store_name, "");
        assert!(order.updated_at.is_none());
        assert!(order.sort_timestamp().is_none());
    }

    #[test]
    fn test_sort_timestamp_fallback() {
        let created = "2024-03-01T09:00:00Z".parse().unwrap();
        let mut order: Order =
            serde_json::from_str(r#"{"id": "o1", "status": "PENDING"}"#).unwrap();
        order.created_at = Some(created);
        assert_eq!(order.sort_timestamp(), Some(created));

        let updated = "2024-03-01T10:00:00Z".parse().unwrap();
        order.updated_at = Some(updated);
        assert_eq!(order.sort_timestamp(), Some(updated));
    }

    #[test]
    fn test_heartbeat_freshness() {
        let now: DateTime<Utc> = "2024-03-01T10:00:00Z".parse().unwrap();
        let mut device: Device = serde_json::from_str(
            r#"{"id": "d1", "code": "ABC123", "is_online": true}"#,
        )
        .unwrap();
        assert!(!device.heartbeat_fresh(now, Duration::seconds(90)));

        device.last_heartbeat = Some("2024-03-01T09:59:30Z".parse().unwrap());
        assert!(device.heartbeat_fresh(now, Duration::seconds(90)));

        device.last_heartbeat = Some("2024-03-01T09:55:00Z".parse().unwrap());
        assert!(!device.heartbeat_fresh(now, Duration::seconds(90)));
    }

    #[test]
    fn test_device_layout_wire_values() {
        assert_eq!(
            serde_json::to_string(&DeviceLayout::OrdersKanban).unwrap(),
            "\"orders-kanban\""
        );
        let layout: DeviceLayout = serde_json::from_str("\"media-only\"").unwrap();
        assert_eq!(layout, DeviceLayout::MediaOnly);
    }
}

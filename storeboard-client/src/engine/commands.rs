//! Command operations
//!
//! Each command requests a remote mutation and, on success, applies the
//! corresponding local event immediately instead of waiting for the change
//! to round-trip through the feed. A rejected mutation is surfaced to the
//! caller and leaves the in-memory collections untouched.

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use storeboard_common::events::{ChangeEvent, Collection};
use storeboard_common::models::{
    default_primary_color, Device, DeviceLayout, MediaItem, MediaKind, Order, OrderStatus, Product,
};
use storeboard_common::{Error, Result};
use tracing::info;

use super::Engine;

/// Pairing code allocation attempts before giving up
const MAX_CODE_ATTEMPTS: usize = 5;

/// Fields the console supplies when creating an order
#[derive(Debug, Clone, Default)]
pub struct OrderDraft {
    pub order_number: String,
    pub customer_name: String,
    pub store_name: String,
    pub status: Option<OrderStatus>,
    pub store_id: String,
    pub kitchen_id: String,
    pub channel: Option<String>,
}

/// Fields the console supplies when creating or updating a product
#[derive(Debug, Clone, Default)]
pub struct ProductDraft {
    pub name: String,
    pub price: f64,
    pub image_url: String,
    pub logo_url: Option<String>,
    pub active: Option<bool>,
    pub order_index: Option<i64>,
}

/// Fields the console supplies when creating or updating a media entry.
/// The image/video split is derived from the URL, not trusted from input.
#[derive(Debug, Clone, Default)]
pub struct MediaDraft {
    pub title: String,
    pub url: Option<String>,
    pub duration: Option<i64>,
    pub active: Option<bool>,
    pub order_index: Option<i64>,
}

impl Engine {
    // ---------------------------------------------------------------
    // Orders
    // ---------------------------------------------------------------

    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order> {
        let row = self
            .remote
            .insert(
                Collection::Orders,
                json!({
                    "order_number": draft.order_number,
                    "customer_name": draft.customer_name,
                    "store_name": draft.store_name,
                    "status": draft.status.unwrap_or(OrderStatus::Pending),
                    "store_id": draft.store_id,
                    "kitchen_id": draft.kitchen_id,
                    "channel": draft.channel.unwrap_or_else(|| "local".to_string()),
                }),
            )
            .await?;

        let order: Order = serde_json::from_value(row.clone())?;
        self.apply_event(Collection::Orders, ChangeEvent::Upsert { row })
            .await;
        Ok(order)
    }

    pub async fn update_order(&self, id: &str, mut patch: Value) -> Result<Order> {
        stamp_updated_at(&mut patch);
        let row = self.remote.update(Collection::Orders, id, patch).await?;
        let order: Order = serde_json::from_value(row.clone())?;
        self.apply_event(Collection::Orders, ChangeEvent::Upsert { row })
            .await;
        Ok(order)
    }

    pub async fn update_order_status(&self, id: &str, status: OrderStatus) -> Result<Order> {
        self.update_order(id, json!({ "status": status })).await
    }

    pub async fn delete_order(&self, id: &str) -> Result<()> {
        self.remote.delete(Collection::Orders, id).await?;
        self.apply_event(Collection::Orders, ChangeEvent::Remove { id: id.to_string() })
            .await;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Products
    // ---------------------------------------------------------------

    pub async fn create_product(&self, draft: ProductDraft) -> Result<Product> {
        let order_index = match draft.order_index {
            Some(index) => index,
            // Append to the end of the carousel by default
            None => self.products.read().await.len() as i64,
        };
        let row = self
            .remote
            .insert(
                Collection::Products,
                json!({
                    "name": draft.name,
                    "price": draft.price,
                    "image_url": draft.image_url,
                    "logo_url": draft.logo_url,
                    "active": draft.active.unwrap_or(true),
                    "order_index": order_index,
                }),
            )
            .await?;

        let product: Product = serde_json::from_value(row.clone())?;
        self.apply_event(Collection::Products, ChangeEvent::Upsert { row })
            .await;
        Ok(product)
    }

    pub async fn update_product(&self, id: &str, patch: Value) -> Result<Product> {
        let row = self.remote.update(Collection::Products, id, patch).await?;
        let product: Product = serde_json::from_value(row.clone())?;
        self.apply_event(Collection::Products, ChangeEvent::Upsert { row })
            .await;
        Ok(product)
    }

    pub async fn delete_product(&self, id: &str) -> Result<()> {
        self.remote.delete(Collection::Products, id).await?;
        self.apply_event(
            Collection::Products,
            ChangeEvent::Remove { id: id.to_string() },
        )
        .await;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Media
    // ---------------------------------------------------------------

    pub async fn create_media(&self, draft: MediaDraft) -> Result<MediaItem> {
        let order_index = match draft.order_index {
            Some(index) => index,
            None => self.media.read().await.len() as i64,
        };
        let mut body = json!({
            "title": draft.title,
            "duration": draft.duration.unwrap_or(5),
            "active": draft.active.unwrap_or(true),
            "order_index": order_index,
        });
        apply_media_url(&mut body, draft.url.as_deref());

        let row = self.remote.insert(Collection::Media, body).await?;
        let item: MediaItem = serde_json::from_value(row.clone())?;
        self.apply_event(Collection::Media, ChangeEvent::Upsert { row })
            .await;
        Ok(item)
    }

    pub async fn update_media(&self, id: &str, draft: MediaDraft) -> Result<MediaItem> {
        let mut patch = json!({
            "title": draft.title,
        });
        if let Some(duration) = draft.duration {
            patch["duration"] = json!(duration);
        }
        if let Some(active) = draft.active {
            patch["active"] = json!(active);
        }
        apply_media_url(&mut patch, draft.url.as_deref());

        let row = self.remote.update(Collection::Media, id, patch).await?;
        let item: MediaItem = serde_json::from_value(row.clone())?;
        self.apply_event(Collection::Media, ChangeEvent::Upsert { row })
            .await;
        Ok(item)
    }

    pub async fn delete_media(&self, id: &str) -> Result<()> {
        self.remote.delete(Collection::Media, id).await?;
        self.apply_event(Collection::Media, ChangeEvent::Remove { id: id.to_string() })
            .await;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Devices and settings
    // ---------------------------------------------------------------

    /// Register a new display device with a fresh pairing code, then create
    /// its default settings row.
    ///
    /// Code uniqueness is enforced by the remote unique constraint: on a
    /// conflict the insert is retried with a new code, bounded by
    /// `MAX_CODE_ATTEMPTS`.
    pub async fn create_device(
        &self,
        name: Option<String>,
        layout: Option<DeviceLayout>,
    ) -> Result<Device> {
        let layout = layout.unwrap_or_default();
        let mut last_conflict = None;

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = pairing_code();
            let name = name
                .clone()
                .unwrap_or_else(|| format!("TV {}", code));
            let result = self
                .remote
                .insert(
                    Collection::Devices,
                    json!({
                        "code": code,
                        "name": name,
                        "layout_type": layout,
                    }),
                )
                .await;

            match result {
                Ok(row) => {
                    let device: Device = serde_json::from_value(row.clone())?;
                    self.apply_event(Collection::Devices, ChangeEvent::Upsert { row })
                        .await;
                    info!("Registered device {} with code {}", device.id, device.code);
                    self.create_default_settings(&device.id).await?;
                    return Ok(device);
                }
                Err(Error::Conflict(detail)) => {
                    info!("Pairing code {} already taken, regenerating", code);
                    last_conflict = Some(detail);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(format!(
            "could not allocate a unique pairing code after {} attempts: {}",
            MAX_CODE_ATTEMPTS,
            last_conflict.unwrap_or_default()
        )))
    }

    async fn create_default_settings(&self, device_id: &str) -> Result<()> {
        let row = self
            .remote
            .insert(
                Collection::Settings,
                json!({
                    "device_id": device_id,
                    "orders_percentage": 70,
                    "media_percentage": 20,
                    "products_percentage": 10,
                    "show_full_name": false,
                    "auto_rotate_interval": 10,
                    "primary_color": default_primary_color(),
                    "logo_url": "",
                }),
            )
            .await?;
        self.apply_event(Collection::Settings, ChangeEvent::Upsert { row })
            .await;
        Ok(())
    }

    pub async fn update_device(&self, id: &str, patch: Value) -> Result<Device> {
        let row = self.remote.update(Collection::Devices, id, patch).await?;
        let device: Device = serde_json::from_value(row.clone())?;
        self.apply_event(Collection::Devices, ChangeEvent::Upsert { row })
            .await;
        Ok(device)
    }

    pub async fn update_device_settings(&self, device_id: &str, mut patch: Value) -> Result<()> {
        let settings_id = self
            .settings_for_device(device_id)
            .await
            .map(|s| s.id)
            .ok_or_else(|| Error::NotFound(format!("settings for device {}", device_id)))?;

        stamp_updated_at(&mut patch);
        let row = self
            .remote
            .update(Collection::Settings, &settings_id, patch)
            .await?;
        self.apply_event(Collection::Settings, ChangeEvent::Upsert { row })
            .await;
        Ok(())
    }

    /// Remove a device and its settings row
    pub async fn delete_device(&self, id: &str) -> Result<()> {
        self.remote.delete(Collection::Devices, id).await?;
        self.apply_event(Collection::Devices, ChangeEvent::Remove { id: id.to_string() })
            .await;

        if let Some(settings) = self.settings_for_device(id).await {
            self.remote.delete(Collection::Settings, &settings.id).await?;
            self.apply_event(
                Collection::Settings,
                ChangeEvent::Remove { id: settings.id },
            )
            .await;
        }
        Ok(())
    }

    /// Look up a device by pairing code (case-insensitive). Refreshes the
    /// device collection first so a code created moments ago on the console
    /// is visible.
    pub async fn pair_device(&self, code: &str) -> Result<Device> {
        if self.remote.is_configured() {
            self.sync(Collection::Devices).await;
        }
        self.devices
            .read()
            .await
            .values()
            .find(|d| d.code.eq_ignore_ascii_case(code))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("device code {}", code.to_ascii_uppercase())))
    }

    pub async fn verify_device_password(&self, code: &str, password: &str) -> Result<bool> {
        let device = self.pair_device(code).await?;
        Ok(device.password == password)
    }
}

fn stamp_updated_at(patch: &mut Value) {
    if let Value::Object(map) = patch {
        map.insert("updated_at".to_string(), json!(Utc::now()));
    }
}

/// Route a media URL to image_url or video_url based on its detected kind,
/// nulling the other column
fn apply_media_url(body: &mut Value, url: Option<&str>) {
    let Value::Object(map) = body else {
        return;
    };
    match MediaKind::from_url(url) {
        MediaKind::Video => {
            map.insert("video_url".to_string(), json!(url.unwrap_or_default()));
            map.insert("image_url".to_string(), Value::Null);
        }
        MediaKind::Image => {
            map.insert("image_url".to_string(), json!(url.unwrap_or_default()));
            map.insert("video_url".to_string(), Value::Null);
        }
    }
}

/// Six uppercase alphanumeric characters, matching the pairing codes shown
/// on device screens
fn pairing_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing_code_shape() {
        for _ in 0..100 {
            let code = pairing_code();
            assert_eq!(code.len(), 6);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_media_url_routing() {
        let mut body = json!({"title": "promo"});
        apply_media_url(&mut body, Some("https://cdn.example.com/promo.mp4"));
        assert_eq!(body["video_url"], "https://cdn.example.com/promo.mp4");
        assert_eq!(body["image_url"], Value::Null);

        let mut body = json!({"title": "banner"});
        apply_media_url(&mut body, Some("https://cdn.example.com/banner.png"));
        assert_eq!(body["image_url"], "https://cdn.example.com/banner.png");
        assert_eq!(body["video_url"], Value::Null);
    }

    #[test]
    fn test_stamp_updated_at() {
        let mut patch = json!({"status": "READY"});
        stamp_updated_at(&mut patch);
        assert!(patch["updated_at"].is_string());
    }
}

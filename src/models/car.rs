//! Car listing model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One extracted car advertisement.
///
/// `url` is the natural key: at most one persisted row exists per URL.
/// Optional fields reflect what the listing page actually published -
/// absent means absent, never a fabricated default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarListing {
    /// Detail-page URL, globally unique per listing.
    pub url: String,
    /// Advertisement title.
    pub title: String,
    /// Price in US dollars, when the listing publishes one.
    pub price_usd: Option<i32>,
    /// Kilometers driven, already scaled from the site's thousands form.
    pub odometer: Option<i32>,
    /// Seller display name.
    pub username: Option<String>,
    /// Country-code-prefixed digit string, no separators.
    pub phone_number: Option<String>,
    /// Primary gallery image.
    pub image_url: Option<String>,
    /// Number of photos in the gallery; 0 means a listing without photos.
    pub images_count: i32,
    /// License plate shown on the page.
    pub car_number: Option<String>,
    /// Vehicle identification number.
    pub car_vin: Option<String>,
    /// First time this listing was seen; never updated afterwards.
    pub datetime_found: DateTime<Utc>,
}

//! Field extraction from rendered listing-detail pages.
//!
//! Pure functions over a captured DOM snapshot; all browser interaction
//! (navigation, waits, the phone reveal) happens before the snapshot is
//! taken. The phone number only exists in the DOM after the reveal popup
//! rendered - when the reveal did not complete the field simply comes back
//! absent, the extractor never retries it.

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::models::CarListing;

/// Title block; the content-wait keys on this element too.
pub(crate) const TITLE: &str = "#basicInfoTitle";
/// Price in the main info block.
const PRICE: &str = "#basicInfoPrice .titleL";
/// Odometer cell, published in thousands of kilometers.
const ODOMETER: &str = "#basicInfoTableMainInfo0 span";
/// Seller display name.
const SELLER_NAME: &str = "#sellerInfoUserName .titleM";
/// Revealed phone digits inside the popup.
pub(crate) const PHONE_POPUP: &str = "#autoPhonePopUpResponse div.button-main span.common-text";
/// Primary image in the gallery viewport.
const GALLERY_IMAGE: &str = "div.carousel__viewport img";
/// One gallery slide per photo.
const GALLERY_SLIDE: &str = "#photoSlider .carousel__slide";
/// License plate badge.
const PLATE: &str = "div.car-number span.common-text";
/// VIN badge.
const VIN_BADGE: &str = "#badgesVin span.badge";

/// Raised when a rendered page is missing a field the record cannot exist
/// without.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mandatory field `{field}` missing from rendered page")]
pub struct ExtractionError {
    pub field: &'static str,
}

impl ExtractionError {
    fn missing(field: &'static str) -> Self {
        Self { field }
    }
}

/// Parse a rendered detail page into a listing record.
///
/// `url` and `title` are mandatory; everything else is best-effort and
/// recorded as absent when the page does not show it.
pub fn extract_listing(url: &str, html: &str) -> Result<CarListing, ExtractionError> {
    if url.is_empty() {
        return Err(ExtractionError::missing("url"));
    }

    let doc = Html::parse_document(html);
    // The title element must exist; its text may legitimately be empty.
    let title = first_element(&doc, TITLE)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .ok_or_else(|| ExtractionError::missing("title"))?;

    Ok(CarListing {
        url: url.to_string(),
        title,
        price_usd: first_text(&doc, PRICE).as_deref().and_then(clean_price),
        odometer: first_text(&doc, ODOMETER).as_deref().and_then(clean_odometer),
        username: first_text(&doc, SELLER_NAME),
        phone_number: first_text(&doc, PHONE_POPUP).as_deref().and_then(clean_phone),
        image_url: first_attr(&doc, GALLERY_IMAGE, "src"),
        images_count: count_elements(&doc, GALLERY_SLIDE) as i32,
        car_number: first_text(&doc, PLATE),
        car_vin: first_text(&doc, VIN_BADGE),
        datetime_found: Utc::now(),
    })
}

/// Trimmed text of the first element matching `selector`, if any.
fn first_text(doc: &Html, selector: &str) -> Option<String> {
    first_element(doc, selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Attribute of the first element matching `selector`, if any.
fn first_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    first_element(doc, selector)
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

fn first_element<'a>(doc: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next()
}

fn count_elements(doc: &Html, selector: &str) -> usize {
    match Selector::parse(selector) {
        Ok(sel) => doc.select(&sel).count(),
        Err(_) => 0,
    }
}

/// Parse a displayed price like `"15 500 $"` into whole dollars.
pub fn clean_price(text: &str) -> Option<i32> {
    digits(text).parse().ok()
}

/// Parse the odometer display value into kilometers.
///
/// The site publishes mileage in thousands ("95 тис. км"), so the digits
/// are scaled by 1000. Zero and non-numeric values mean the field was not
/// actually published, not a zero-mileage car.
pub fn clean_odometer(text: &str) -> Option<i32> {
    let value: i32 = digits(text).parse().ok()?;
    if value == 0 {
        return None;
    }
    value.checked_mul(1000)
}

/// Normalize a displayed phone number like `"(063) 213 44 11"` into a
/// country-code-prefixed digit string.
pub fn clean_phone(text: &str) -> Option<String> {
    let raw = digits(text);
    if raw.is_empty() {
        return None;
    }
    let normalized = match raw.len() {
        10 => format!("38{raw}"),
        9 => format!("380{raw}"),
        _ => raw,
    };
    Some(normalized)
}

fn digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

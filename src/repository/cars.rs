//! Diesel-based car listing repository.
//!
//! One row per listing URL. `upsert` is a single INSERT .. ON CONFLICT
//! statement: the first observation of a URL inserts the row and stamps
//! `datetime_found`; every later observation overwrites the remaining
//! columns and leaves `datetime_found` untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};

use crate::models::CarListing;
use crate::schema::cars;
use crate::scrapers::ListingStore;

use super::pool::{AsyncSqlitePool, DieselError};

/// Database record for a car listing row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = cars)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CarRecord {
    pub id: i32,
    pub url: String,
    pub title: String,
    pub price_usd: Option<i32>,
    pub odometer: Option<i32>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub image_url: Option<String>,
    pub images_count: i32,
    pub car_number: Option<String>,
    pub car_vin: Option<String>,
    pub datetime_found: String,
}

impl From<CarRecord> for CarListing {
    fn from(record: CarRecord) -> Self {
        CarListing {
            url: record.url,
            title: record.title,
            price_usd: record.price_usd,
            odometer: record.odometer,
            username: record.username,
            phone_number: record.phone_number,
            image_url: record.image_url,
            images_count: record.images_count,
            car_number: record.car_number,
            car_vin: record.car_vin,
            datetime_found: parse_datetime(&record.datetime_found),
        }
    }
}

fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Repository for the `cars` table.
#[derive(Clone)]
pub struct CarRepository {
    pool: AsyncSqlitePool,
}

impl CarRepository {
    /// Create a new car repository.
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `cars` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS cars (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                price_usd INTEGER,
                odometer INTEGER,
                username TEXT,
                phone_number TEXT,
                image_url TEXT,
                images_count INTEGER NOT NULL DEFAULT 0,
                car_number TEXT,
                car_vin TEXT,
                datetime_found TEXT NOT NULL
            );
            "#,
        )
        .await
    }

    /// Insert or update a listing keyed by its URL.
    ///
    /// Atomic: the statement either lands completely or not at all.
    /// Applying the same record twice leaves the row unchanged.
    pub async fn upsert(&self, listing: &CarListing) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let datetime_found = listing.datetime_found.to_rfc3339();

        diesel::insert_into(cars::table)
            .values((
                cars::url.eq(listing.url.as_str()),
                cars::title.eq(listing.title.as_str()),
                cars::price_usd.eq(listing.price_usd),
                cars::odometer.eq(listing.odometer),
                cars::username.eq(listing.username.as_deref()),
                cars::phone_number.eq(listing.phone_number.as_deref()),
                cars::image_url.eq(listing.image_url.as_deref()),
                cars::images_count.eq(listing.images_count),
                cars::car_number.eq(listing.car_number.as_deref()),
                cars::car_vin.eq(listing.car_vin.as_deref()),
                cars::datetime_found.eq(datetime_found.as_str()),
            ))
            .on_conflict(cars::url)
            .do_update()
            .set((
                cars::title.eq(listing.title.as_str()),
                cars::price_usd.eq(listing.price_usd),
                cars::odometer.eq(listing.odometer),
                cars::username.eq(listing.username.as_deref()),
                cars::phone_number.eq(listing.phone_number.as_deref()),
                cars::image_url.eq(listing.image_url.as_deref()),
                cars::images_count.eq(listing.images_count),
                cars::car_number.eq(listing.car_number.as_deref()),
                cars::car_vin.eq(listing.car_vin.as_deref()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Look a listing up by its URL.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<CarListing>, DieselError> {
        let mut conn = self.pool.get().await?;
        let record = cars::table
            .filter(cars::url.eq(url))
            .select(CarRecord::as_select())
            .first::<CarRecord>(&mut conn)
            .await
            .optional()?;
        Ok(record.map(Into::into))
    }

    /// Total number of stored listings.
    pub async fn count(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;
        cars::table.count().get_result(&mut conn).await
    }
}

#[async_trait]
impl ListingStore for CarRepository {
    async fn upsert(&self, listing: &CarListing) -> anyhow::Result<()> {
        CarRepository::upsert(self, listing).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample(url: &str) -> CarListing {
        CarListing {
            url: url.to_string(),
            title: "Volkswagen Golf VII 2016".to_string(),
            price_usd: Some(15500),
            odometer: Some(95000),
            username: Some("Oleh".to_string()),
            phone_number: Some("380632134411".to_string()),
            image_url: Some("https://cdn.example/1.jpg".to_string()),
            images_count: 19,
            car_number: Some("AA 1234 BC".to_string()),
            car_vin: Some("WVWZZZAUZGW123456".to_string()),
            datetime_found: Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap(),
        }
    }

    async fn setup() -> (CarRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = AsyncSqlitePool::from_path(&dir.path().join("test.db"));
        let repo = CarRepository::new(pool);
        repo.ensure_schema().await.unwrap();
        (repo, dir)
    }

    #[tokio::test]
    async fn upsert_inserts_and_reads_back() {
        let (repo, _dir) = setup().await;

        repo.upsert(&sample("https://cars.example/auto_golf_1.html"))
            .await
            .unwrap();

        let stored = repo
            .get_by_url("https://cars.example/auto_golf_1.html")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, "Volkswagen Golf VII 2016");
        assert_eq!(stored.price_usd, Some(15500));
        assert_eq!(stored.odometer, Some(95000));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (repo, _dir) = setup().await;
        let listing = sample("https://cars.example/auto_golf_1.html");

        repo.upsert(&listing).await.unwrap();
        let first = repo.get_by_url(&listing.url).await.unwrap().unwrap();

        repo.upsert(&listing).await.unwrap();
        let second = repo.get_by_url(&listing.url).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_datetime_found_and_takes_latest_fields() {
        let (repo, _dir) = setup().await;
        let first = sample("https://cars.example/auto_golf_1.html");
        repo.upsert(&first).await.unwrap();

        let mut second = first.clone();
        second.price_usd = Some(14900);
        second.phone_number = None;
        second.images_count = 0;
        second.datetime_found = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        repo.upsert(&second).await.unwrap();

        let stored = repo.get_by_url(&first.url).await.unwrap().unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        // Latest observation wins for every mutable column.
        assert_eq!(stored.price_usd, Some(14900));
        assert_eq!(stored.phone_number, None);
        assert_eq!(stored.images_count, 0);
        // First-seen timestamp survives the update.
        assert_eq!(stored.datetime_found, first.datetime_found);
    }

    #[tokio::test]
    async fn get_by_url_returns_none_for_unknown() {
        let (repo, _dir) = setup().await;
        assert!(repo
            .get_by_url("https://cars.example/missing.html")
            .await
            .unwrap()
            .is_none());
    }
}

use log::{info, warn};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use crate::AppConfig;
use crate::catalog::{adjust_slots, get_class, reset_all_slots, take_slot, ClassId};
use crate::db::DbPool;
use crate::error::{booking_to_custom_error, validation_error, BookingError, BookingResult};

pub type BookingId = i64;

#[derive(Serialize, Deserialize, FromRow, Clone, Debug, PartialEq)]
pub struct BookingRecord {
    pub id: BookingId,
    pub class_id: ClassId,
    pub client_name: String,
    pub client_email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BookingRequest {
    pub class_id: ClassId,
    pub client_name: String,
    pub client_email: String,
}
impl BookingRequest {
    pub fn validate(&self) -> BookingResult<()> {
        validate_client(&self.client_name, &self.client_email)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CancelRequest {
    pub client_name: String,
    pub client_email: String,
    /// Narrows the match when the same client holds bookings in several classes.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<ClassId>,
}
impl CancelRequest {
    pub fn validate(&self) -> BookingResult<()> {
        validate_client(&self.client_name, &self.client_email)
    }
}

fn validate_client(client_name: &str, client_email: &str) -> BookingResult<()> {
    if client_name.trim().is_empty() {
        return Err(validation_error("client_name must not be empty"));
    }
    if !is_valid_email(client_email) {
        return Err(validation_error(format!("client_email is not a valid email address: {client_email}")));
    }
    Ok(())
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    let labels = domain.split('.').collect::<Vec<_>>();
    labels.len() >= 2 && labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    })
}

/// Reserves one seat of `class_id`.
///
/// The conditional decrement is the first statement of the transaction, so the
/// transaction holds SQLite's write lock before anything is read and two
/// concurrent bookings of the last slot cannot both succeed.
pub async fn book(pool: &SqlitePool, class_id: ClassId, client_name: &str, client_email: &str) -> BookingResult<BookingRecord> {
    let mut txn = pool.begin().await?;
    if !take_slot(&mut txn, class_id).await? {
        // missing class reports NotFound, existing one is full
        let class = get_class(&mut txn, class_id).await?;
        return Err(BookingError::CapacityExhausted(class.id));
    }
    let booking = sqlx::query_as::<_, BookingRecord>("INSERT INTO bookings (class_id, client_name, client_email) VALUES (?, ?, ?) RETURNING *")
        .bind(class_id)
        .bind(client_name)
        .bind(client_email)
        .fetch_one(&mut *txn)
        .await?;
    txn.commit().await?;
    Ok(booking)
}

/// Newest first, optionally only bookings of one email.
pub async fn list_bookings(conn: &mut SqliteConnection, email: Option<&str>) -> BookingResult<Vec<BookingRecord>> {
    let bookings = match email {
        Some(email) => {
            sqlx::query_as::<_, BookingRecord>("SELECT * FROM bookings WHERE client_email=? ORDER BY id DESC")
                .bind(email)
                .fetch_all(conn)
                .await?
        }
        None => {
            sqlx::query_as::<_, BookingRecord>("SELECT * FROM bookings ORDER BY id DESC")
                .fetch_all(conn)
                .await?
        }
    };
    Ok(bookings)
}

/// Removes the most recent booking matching the client exactly and gives its slot back.
/// Older bookings of the same client stay untouched.
pub async fn cancel(pool: &SqlitePool, client_name: &str, client_email: &str, class_id: Option<ClassId>) -> BookingResult<BookingRecord> {
    let mut txn = pool.begin().await?;
    let removed = sqlx::query_as::<_, BookingRecord>(
        "DELETE FROM bookings WHERE id = (
            SELECT id FROM bookings
            WHERE client_name=? AND client_email=? AND (? IS NULL OR class_id=?)
            ORDER BY id DESC LIMIT 1
        ) RETURNING *")
        .bind(client_name)
        .bind(client_email)
        .bind(class_id)
        .bind(class_id)
        .fetch_optional(&mut *txn)
        .await?;
    let Some(booking) = removed else {
        return Err(BookingError::BookingNotFound {
            client_name: client_name.to_string(),
            client_email: client_email.to_string(),
        });
    };
    adjust_slots(&mut txn, booking.class_id, 1).await?;
    txn.commit().await?;
    Ok(booking)
}

/// Drops every booking and resets all classes to `default_capacity`.
/// Per-class capacity is not remembered, every class gets the same value.
pub async fn cancel_all(pool: &SqlitePool, default_capacity: i64) -> BookingResult<u64> {
    if default_capacity < 0 {
        return Err(validation_error("Default capacity must not be negative"));
    }
    let mut txn = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM bookings")
        .execute(&mut *txn)
        .await?
        .rows_affected();
    reset_all_slots(&mut txn, default_capacity).await?;
    txn.commit().await?;
    Ok(deleted)
}

#[derive(Serialize, Deserialize, Debug)]
pub struct BookingResponse {
    pub message: String,
    pub booking: BookingRecord,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
}

#[post("/book", data = "<req>")]
async fn post_book(req: Json<BookingRequest>, db: &State<DbPool>) -> Result<Json<BookingResponse>, Custom<String>> {
    let req = req.into_inner();
    req.validate().map_err(booking_to_custom_error)?;
    info!("Booking attempt by {} ({}) for class_id={}", req.client_name, req.client_email, req.class_id);
    let booking = book(&db.0, req.class_id, &req.client_name, &req.client_email).await.map_err(booking_to_custom_error)?;
    info!("Booking successful: {} -> class {}", booking.client_email, booking.class_id);
    Ok(Json(BookingResponse {
        message: String::from("Booking successful"),
        booking,
    }))
}

#[get("/bookings?<email>")]
async fn get_bookings(email: Option<&str>, db: &State<DbPool>) -> Result<Json<Vec<BookingRecord>>, Custom<String>> {
    let email = email.filter(|e| !e.is_empty());
    let mut conn = db.0.acquire().await.map_err(|e| booking_to_custom_error(e.into()))?;
    let bookings = list_bookings(&mut conn, email).await.map_err(booking_to_custom_error)?;
    info!("Returned {} bookings{}", bookings.len(), email.map(|e| format!(" for {e}")).unwrap_or_default());
    Ok(Json(bookings))
}

#[get("/bookings/all")]
async fn get_all_bookings(db: &State<DbPool>) -> Result<Json<Vec<BookingRecord>>, Custom<String>> {
    let mut conn = db.0.acquire().await.map_err(|e| booking_to_custom_error(e.into()))?;
    let bookings = list_bookings(&mut conn, None).await.map_err(booking_to_custom_error)?;
    info!("Returned all {} bookings", bookings.len());
    Ok(Json(bookings))
}

#[delete("/bookings/delete", data = "<req>")]
async fn delete_booking(req: Json<CancelRequest>, db: &State<DbPool>) -> Result<Json<MessageResponse>, Custom<String>> {
    let req = req.into_inner();
    req.validate().map_err(booking_to_custom_error)?;
    let booking = cancel(&db.0, &req.client_name, &req.client_email, req.class_id).await.map_err(booking_to_custom_error)?;
    info!("Booking deleted: {} ({}), class {}", booking.client_name, booking.client_email, booking.class_id);
    Ok(Json(MessageResponse {
        message: format!("Booking deleted: {} ({})", booking.client_name, booking.client_email),
        deleted: None,
    }))
}

#[delete("/bookings/all/delete")]
async fn delete_all_bookings(cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<MessageResponse>, Custom<String>> {
    let deleted = cancel_all(&db.0, cfg.default_capacity).await.map_err(booking_to_custom_error)?;
    warn!("All bookings deleted ({deleted} entries)");
    Ok(Json(MessageResponse {
        message: format!("Deleted all {deleted} bookings and reset slots"),
        deleted: Some(deleted),
    }))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        post_book,
        get_bookings,
        get_all_bookings,
        delete_booking,
        delete_all_bookings,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::list_classes;
    use crate::test_support::TestDb;

    const DEFAULT_CAPACITY: i64 = 10;

    async fn slots(pool: &SqlitePool, class_id: ClassId) -> i64 {
        let mut conn = pool.acquire().await.unwrap();
        get_class(&mut conn, class_id).await.unwrap().available_slots
    }
    async fn bookings(pool: &SqlitePool, email: Option<&str>) -> Vec<BookingRecord> {
        let mut conn = pool.acquire().await.unwrap();
        list_bookings(&mut conn, email).await.unwrap()
    }
    /// available_slots + live bookings must equal the seeded capacity of every class
    async fn assert_slots_match_bookings(pool: &SqlitePool, capacity: &[(ClassId, i64)]) {
        let mut conn = pool.acquire().await.unwrap();
        let all = list_bookings(&mut conn, None).await.unwrap();
        for class in list_classes(&mut conn).await.unwrap() {
            let booked = all.iter().filter(|b| b.class_id == class.id).count() as i64;
            let (_, cap) = capacity.iter().find(|(id, _)| *id == class.id).unwrap();
            assert!(class.available_slots >= 0);
            assert_eq!(class.available_slots + booked, *cap, "class {}", class.name);
        }
    }
    const SEEDED: [(ClassId, i64); 3] = [(1, 4), (2, 1), (3, 4)];

    #[test]
    fn test_email_syntax() {
        for email in ["u1@x.com", "first.last@studio.example.org", "a+tag@sub-domain.in"] {
            assert!(is_valid_email(email), "{email}");
        }
        for email in ["", "plain", "@x.com", "u1@", "u1@x", "u1@@x.com", "u 1@x.com", "u1@x..com", ".u1@x.com", "u1@-x.com"] {
            assert!(!is_valid_email(email), "{email}");
        }
    }

    #[test]
    fn test_request_validation() {
        let req = BookingRequest { class_id: 1, client_name: "  ".to_string(), client_email: "a@b.com".to_string() };
        assert!(matches!(req.validate(), Err(BookingError::Validation(_))));
        let req = BookingRequest { class_id: 1, client_name: "Tester".to_string(), client_email: "not-an-email".to_string() };
        assert!(matches!(req.validate(), Err(BookingError::Validation(_))));
        let req = CancelRequest { client_name: "Tester".to_string(), client_email: "tester@example.com".to_string(), class_id: None };
        assert!(req.validate().is_ok());
    }

    #[rocket::async_test]
    async fn test_book_last_slot_then_exhausted() {
        let db = TestDb::seeded().await;
        let booking = book(&db.pool, 2, "U1", "u1@x.com").await.unwrap();
        assert_eq!(booking.class_id, 2);
        assert_eq!(slots(&db.pool, 2).await, 0);

        let err = book(&db.pool, 2, "U2", "u2@x.com").await.unwrap_err();
        assert!(matches!(err, BookingError::CapacityExhausted(2)));
        assert_eq!(slots(&db.pool, 2).await, 0);
        assert!(bookings(&db.pool, Some("u2@x.com")).await.is_empty());
        assert_slots_match_bookings(&db.pool, &SEEDED).await;
    }

    #[rocket::async_test]
    async fn test_book_then_cancel_restores_slot() {
        let db = TestDb::seeded().await;
        let before = slots(&db.pool, 1).await;
        book(&db.pool, 1, "Delete Me", "d@x.com").await.unwrap();
        assert_eq!(slots(&db.pool, 1).await, before - 1);

        let removed = cancel(&db.pool, "Delete Me", "d@x.com", None).await.unwrap();
        assert_eq!(removed.class_id, 1);
        assert!(bookings(&db.pool, Some("d@x.com")).await.is_empty());
        assert_eq!(slots(&db.pool, 1).await, before);
        assert_slots_match_bookings(&db.pool, &SEEDED).await;
    }

    #[rocket::async_test]
    async fn test_cancel_all() {
        let db = TestDb::seeded().await;
        book(&db.pool, 1, "UserA", "a@example.com").await.unwrap();
        book(&db.pool, 2, "UserB", "b@example.com").await.unwrap();

        assert_eq!(cancel_all(&db.pool, DEFAULT_CAPACITY).await.unwrap(), 2);
        assert!(bookings(&db.pool, None).await.is_empty());
        let mut conn = db.pool.acquire().await.unwrap();
        assert!(list_classes(&mut conn).await.unwrap().iter().all(|c| c.available_slots == DEFAULT_CAPACITY));
    }

    #[rocket::async_test]
    async fn test_book_missing_class() {
        let db = TestDb::seeded().await;
        let err = book(&db.pool, 999, "X", "x@x.com").await.unwrap_err();
        assert!(matches!(err, BookingError::ClassNotFound(999)));
        assert!(bookings(&db.pool, None).await.is_empty());
        assert_slots_match_bookings(&db.pool, &SEEDED).await;
    }

    #[rocket::async_test]
    async fn test_cancel_unknown_booking() {
        let db = TestDb::seeded().await;
        book(&db.pool, 1, "Tester", "tester@example.com").await.unwrap();
        // name and email are matched exactly, case included
        let err = cancel(&db.pool, "tester", "tester@example.com", None).await.unwrap_err();
        assert!(matches!(err, BookingError::BookingNotFound { .. }));
        let err = cancel(&db.pool, "Tester", "TESTER@example.com", None).await.unwrap_err();
        assert!(matches!(err, BookingError::BookingNotFound { .. }));
        assert_eq!(bookings(&db.pool, None).await.len(), 1);
        assert_slots_match_bookings(&db.pool, &SEEDED).await;
    }

    #[rocket::async_test]
    async fn test_cancel_resolves_most_recent_match() {
        let db = TestDb::seeded().await;
        let older = book(&db.pool, 1, "Twice", "twice@x.com").await.unwrap();
        let newer = book(&db.pool, 3, "Twice", "twice@x.com").await.unwrap();

        let removed = cancel(&db.pool, "Twice", "twice@x.com", None).await.unwrap();
        assert_eq!(removed, newer);
        assert_eq!(bookings(&db.pool, Some("twice@x.com")).await, vec![older.clone()]);
        assert_slots_match_bookings(&db.pool, &SEEDED).await;

        // class discriminator that matches nothing
        let err = cancel(&db.pool, "Twice", "twice@x.com", Some(3)).await.unwrap_err();
        assert!(matches!(err, BookingError::BookingNotFound { .. }));
        let removed = cancel(&db.pool, "Twice", "twice@x.com", Some(1)).await.unwrap();
        assert_eq!(removed, older);
        assert!(bookings(&db.pool, Some("twice@x.com")).await.is_empty());
        assert_slots_match_bookings(&db.pool, &SEEDED).await;
    }

    #[rocket::async_test]
    async fn test_list_bookings_newest_first() {
        let db = TestDb::seeded().await;
        let first = book(&db.pool, 1, "User1", "user1@example.com").await.unwrap();
        let second = book(&db.pool, 3, "User2", "user2@example.com").await.unwrap();
        let third = book(&db.pool, 3, "User1", "user1@example.com").await.unwrap();

        let all = bookings(&db.pool, None).await;
        assert_eq!(all, vec![third.clone(), second, first.clone()]);
        let user1 = bookings(&db.pool, Some("user1@example.com")).await;
        assert_eq!(user1, vec![third, first]);
        assert!(bookings(&db.pool, Some("nobody@example.com")).await.is_empty());
    }

    #[rocket::async_test]
    async fn test_parallel_booking_of_last_slot() {
        const N: usize = 8;
        let db = TestDb::seeded().await;
        let mut handles = vec![];
        for n in 0..N {
            let pool = db.pool.clone();
            handles.push(rocket::tokio::spawn(async move {
                book(&pool, 2, &format!("U{n}"), &format!("u{n}@x.com")).await
            }));
        }
        let mut booked = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => booked += 1,
                Err(BookingError::CapacityExhausted(2)) => exhausted += 1,
                Err(e) => panic!("unexpected booking error: {e:?}"),
            }
        }
        assert_eq!(booked, 1);
        assert_eq!(exhausted, N - 1);
        assert_eq!(slots(&db.pool, 2).await, 0);
        assert_eq!(bookings(&db.pool, None).await.len(), 1);
        assert_slots_match_bookings(&db.pool, &SEEDED).await;
    }

    #[rocket::async_test]
    async fn test_failed_booking_insert_rolls_back_slot() {
        let db = TestDb::seeded().await;
        sqlx::query("CREATE TRIGGER reject_bookings BEFORE INSERT ON bookings BEGIN SELECT RAISE(ABORT, 'bookings closed'); END")
            .execute(&db.pool)
            .await
            .unwrap();
        let err = book(&db.pool, 1, "X", "x@x.com").await.unwrap_err();
        assert!(matches!(err, BookingError::Storage(_)));
        assert_eq!(slots(&db.pool, 1).await, 4);
        assert!(bookings(&db.pool, None).await.is_empty());
    }

    #[rocket::async_test]
    async fn test_failed_slot_restore_keeps_booking() {
        let db = TestDb::seeded().await;
        let booking = book(&db.pool, 1, "X", "x@x.com").await.unwrap();
        sqlx::query("CREATE TRIGGER freeze_classes BEFORE UPDATE ON classes BEGIN SELECT RAISE(ABORT, 'classes frozen'); END")
            .execute(&db.pool)
            .await
            .unwrap();
        let err = cancel(&db.pool, "X", "x@x.com", None).await.unwrap_err();
        assert!(matches!(err, BookingError::Storage(_)));
        assert_eq!(bookings(&db.pool, None).await, vec![booking]);
        assert_eq!(slots(&db.pool, 1).await, 3);
    }
}

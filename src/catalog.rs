use log::info;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use chrono_tz::Tz;
use crate::AppConfig;
use crate::classtime::{parse_timezone, ClassTime};
use crate::db::DbPool;
use crate::error::{booking_to_custom_error, validation_error, BookingError, BookingResult};

pub type ClassId = i64;

const INVALID_TIMEZONE: &str = "Invalid datetime or timezone";

#[derive(Serialize, Deserialize, FromRow, Clone, Debug)]
pub struct ClassRecord {
    pub id: ClassId,
    pub name: String,
    #[sqlx(rename = "datetime")]
    pub start_time: ClassTime,
    pub instructor: String,
    pub available_slots: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewClass {
    pub name: String,
    pub start_time: ClassTime,
    pub instructor: String,
    pub available_slots: i64,
}

/// Class as shown to the caller, start time converted to the display timezone.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassView {
    pub id: ClassId,
    pub name: String,
    pub datetime: String,
    pub instructor: String,
    pub available_slots: i64,
}

pub async fn list_classes(conn: &mut SqliteConnection) -> BookingResult<Vec<ClassRecord>> {
    let classes = sqlx::query_as::<_, ClassRecord>("SELECT * FROM classes ORDER BY datetime ASC, id ASC")
        .fetch_all(conn)
        .await?;
    Ok(classes)
}

pub async fn get_class(conn: &mut SqliteConnection, class_id: ClassId) -> BookingResult<ClassRecord> {
    sqlx::query_as::<_, ClassRecord>("SELECT * FROM classes WHERE id=?")
        .bind(class_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BookingError::ClassNotFound(class_id))
}

/// Applies `available_slots += delta` without re-validating capacity.
/// The `CHECK (available_slots >= 0)` constraint still rejects a negative result.
pub async fn adjust_slots(conn: &mut SqliteConnection, class_id: ClassId, delta: i64) -> BookingResult<ClassRecord> {
    sqlx::query_as::<_, ClassRecord>("UPDATE classes SET available_slots = available_slots + ? WHERE id=? RETURNING *")
        .bind(delta)
        .bind(class_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BookingError::ClassNotFound(class_id))
}

/// Decrements the class by one slot if any remain, returns false otherwise.
pub async fn take_slot(conn: &mut SqliteConnection, class_id: ClassId) -> BookingResult<bool> {
    let res = sqlx::query("UPDATE classes SET available_slots = available_slots - 1 WHERE id=? AND available_slots > 0")
        .bind(class_id)
        .execute(conn)
        .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn reset_all_slots(conn: &mut SqliteConnection, default_capacity: i64) -> BookingResult<u64> {
    let res = sqlx::query("UPDATE classes SET available_slots=?")
        .bind(default_capacity)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

pub async fn create_class(conn: &mut SqliteConnection, class: &NewClass) -> BookingResult<ClassRecord> {
    if class.name.trim().is_empty() {
        return Err(validation_error("Class name must not be empty"));
    }
    if class.instructor.trim().is_empty() {
        return Err(validation_error("Instructor must not be empty"));
    }
    if class.available_slots < 0 {
        return Err(validation_error("Available slots must not be negative"));
    }
    let rec = sqlx::query_as::<_, ClassRecord>("INSERT INTO classes (name, datetime, instructor, available_slots) VALUES (?, ?, ?, ?) RETURNING *")
        .bind(&class.name)
        .bind(class.start_time.to_db_string())
        .bind(&class.instructor)
        .bind(class.available_slots)
        .fetch_one(conn)
        .await?;
    info!("Class created, id: {}, {} at {}", rec.id, rec.name, rec.start_time.to_db_string());
    Ok(rec)
}

impl ClassView {
    pub fn from_record(rec: ClassRecord, reference: Tz, target: Tz) -> Result<Self, anyhow::Error> {
        Ok(Self {
            datetime: rec.start_time.to_iso_string_in(reference, target)?,
            id: rec.id,
            name: rec.name,
            instructor: rec.instructor,
            available_slots: rec.available_slots,
        })
    }
}

/// Resolves the stored reference zone and the zone the caller wants to see, defaulting to the reference.
fn display_timezones(timezone: Option<&str>, cfg: &AppConfig) -> Result<(Tz, Tz), Custom<String>> {
    let reference = parse_timezone(&cfg.reference_timezone)
        .map_err(|e| booking_to_custom_error(validation_error(e.to_string())))?;
    let target = match timezone {
        Some(tz) => parse_timezone(tz)
            .map_err(|_| Custom(Status::BadRequest, INVALID_TIMEZONE.to_string()))?,
        None => reference,
    };
    Ok((reference, target))
}

#[get("/classes?<timezone>")]
async fn get_classes(timezone: Option<&str>, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<Vec<ClassView>>, Custom<String>> {
    let (reference, target) = display_timezones(timezone, cfg)?;
    let mut conn = db.0.acquire().await.map_err(|e| booking_to_custom_error(e.into()))?;
    let classes = list_classes(&mut conn).await.map_err(booking_to_custom_error)?;
    let views = classes.into_iter()
        .map(|c| ClassView::from_record(c, reference, target))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| Custom(Status::BadRequest, INVALID_TIMEZONE.to_string()))?;
    info!("Returned {} classes for timezone={}", views.len(), target.name());
    Ok(Json(views))
}

#[get("/classes/<class_id>?<timezone>")]
async fn get_class_by_id(class_id: ClassId, timezone: Option<&str>, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<ClassView>, Custom<String>> {
    let (reference, target) = display_timezones(timezone, cfg)?;
    let mut conn = db.0.acquire().await.map_err(|e| booking_to_custom_error(e.into()))?;
    let class = get_class(&mut conn, class_id).await.map_err(booking_to_custom_error)?;
    let view = ClassView::from_record(class, reference, target)
        .map_err(|_| Custom(Status::BadRequest, INVALID_TIMEZONE.to_string()))?;
    Ok(Json(view))
}

#[post("/classes", data = "<class>")]
async fn post_class(class: Json<NewClass>, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<ClassView>, Custom<String>> {
    let (reference, target) = display_timezones(None, cfg)?;
    let mut conn = db.0.acquire().await.map_err(|e| booking_to_custom_error(e.into()))?;
    let rec = create_class(&mut conn, &class).await.map_err(booking_to_custom_error)?;
    let view = ClassView::from_record(rec, reference, target)
        .map_err(|_| Custom(Status::BadRequest, INVALID_TIMEZONE.to_string()))?;
    Ok(Json(view))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        get_classes,
        get_class_by_id,
        post_class,
    ])
}

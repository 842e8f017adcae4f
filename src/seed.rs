use log::info;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use crate::catalog::{list_classes, ClassRecord};
use crate::classtime::ClassTime;
use crate::db::DbPool;
use crate::error::{booking_to_custom_error, validation_error, BookingResult};

const DEMO_CLASSES: [(&str, &str, &str, i64); 3] = [
    ("Yoga", "2025-08-22T07:00:00", "Sagar", 4),
    ("Zumba", "2025-08-22T09:00:00", "Sachin", 1),
    ("HIIT", "2025-08-22T18:00:00", "Santosh", 4),
];

/// Fills an empty catalog with the demo classes, returns how many were inserted.
///
/// A single `INSERT .. WHERE NOT EXISTS` statement, so concurrent callers serialize on
/// the write lock and only the first one inserts anything.
pub async fn seed_demo_classes(pool: &SqlitePool) -> BookingResult<usize> {
    let mut rows = Vec::with_capacity(DEMO_CLASSES.len());
    for (name, start_time, instructor, available_slots) in DEMO_CLASSES {
        let start_time = ClassTime::parse(start_time).map_err(|e| validation_error(e.to_string()))?;
        rows.push((name, start_time.to_db_string(), instructor, available_slots));
    }
    let mut query_builder = QueryBuilder::<Sqlite>::new("INSERT INTO classes (name, datetime, instructor, available_slots) SELECT * FROM (");
    query_builder.push_values(rows, |mut row, (name, start_time, instructor, available_slots)| {
        row.push_bind(name)
            .push_bind(start_time)
            .push_bind(instructor)
            .push_bind(available_slots);
    });
    query_builder.push(") WHERE NOT EXISTS (SELECT 1 FROM classes)");
    let res = query_builder.build().execute(pool).await?;
    Ok(res.rows_affected() as usize)
}

#[post("/classes/seed-demo")]
async fn post_seed_demo(db: &State<DbPool>) -> Result<Json<Vec<ClassRecord>>, Custom<String>> {
    let inserted = seed_demo_classes(&db.0).await.map_err(booking_to_custom_error)?;
    info!("Seeded {inserted} demo classes");
    let mut conn = db.0.acquire().await.map_err(|e| booking_to_custom_error(e.into()))?;
    let classes = list_classes(&mut conn).await.map_err(booking_to_custom_error)?;
    Ok(Json(classes))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        post_seed_demo,
    ])
}

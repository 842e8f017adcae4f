use anyhow::anyhow;
use chrono::{DateTime, MappedLocalTime, NaiveDateTime, SecondsFormat, TimeZone};
use chrono_tz::Tz;
use rocket::serde::{Deserialize, Serialize};

const DB_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Civil start time of a class, without offset, in the studio reference timezone.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct ClassTime(pub NaiveDateTime);
impl ClassTime {
    pub fn parse(datetime_str: &str) -> Result<Self, anyhow::Error> {
        let datetime_str = datetime_str.trim();
        for &format in &[
            "%Y-%m-%dT%H:%M:%S%.f",    // 2025-08-22T07:00:00
            "%Y-%m-%d %H:%M:%S%.f",    // 2025-08-22 07:00:00
            "%Y-%m-%dT%H:%M",          // 2025-08-22T07:00
            "%Y-%m-%d %H:%M",          // 2025-08-22 07:00
        ] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, format) {
                return Ok(Self(dt))
            }
        }
        Err(anyhow!("Unrecognized class date-time string: {datetime_str}"))
    }
    pub fn to_db_string(self) -> String {
        self.0.format(DB_FORMAT).to_string()
    }
    pub fn in_timezone(self, reference: Tz, target: Tz) -> Result<DateTime<Tz>, anyhow::Error> {
        let dt = match reference.from_local_datetime(&self.0) {
            MappedLocalTime::Single(dt) => dt,
            MappedLocalTime::Ambiguous(earliest, _) => earliest,
            MappedLocalTime::None => return Err(anyhow!("{} does not exist in {}", self.to_db_string(), reference.name())),
        };
        Ok(dt.with_timezone(&target))
    }
    pub fn to_iso_string_in(self, reference: Tz, target: Tz) -> Result<String, anyhow::Error> {
        let dt = self.in_timezone(reference, target)?;
        Ok(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, anyhow::Error> {
    name.trim().parse::<Tz>().map_err(|_| anyhow!("Unknown timezone: {name}"))
}

impl<DB: sqlx::Database> sqlx::Type<DB> for ClassTime
where
    str: sqlx::Type<DB>,
{
    fn type_info() -> <DB as sqlx::Database>::TypeInfo {
        // TEXT columns only
        <&str as sqlx::Type<DB>>::type_info()
    }
}
impl<'r, DB: sqlx::Database> sqlx::Decode<'r, DB> for ClassTime
where
    &'r str: sqlx::Decode<'r, DB>,
{
    fn decode(value: <DB as sqlx::Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let value = <&str as sqlx::Decode<DB>>::decode(value)?;
        Ok(ClassTime::parse(value)?)
    }
}

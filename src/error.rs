use std::backtrace::Backtrace;
use rocket::http::Status;
use rocket::response::status::Custom;
use thiserror::Error;
use crate::catalog::ClassId;

pub type BookingResult<T> = Result<T, BookingError>;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Class not found")]
    ClassNotFound(ClassId),
    #[error("Booking not found")]
    BookingNotFound { client_name: String, client_email: String },
    #[error("No slots available")]
    CapacityExhausted(ClassId),
    #[error("{0}")]
    Validation(String),
    /// Every storage cause collapses here, detail is never shown to the caller.
    #[error("Internal Server Error")]
    Storage(#[from] sqlx::Error),
}

impl BookingError {
    pub fn status(&self) -> Status {
        match self {
            BookingError::ClassNotFound(_) | BookingError::BookingNotFound { .. } => Status::NotFound,
            BookingError::CapacityExhausted(_) => Status::BadRequest,
            BookingError::Validation(_) => Status::UnprocessableEntity,
            BookingError::Storage(_) => Status::InternalServerError,
        }
    }
}

pub(crate) fn booking_to_custom_error(err: BookingError) -> Custom<String> {
    match &err {
        BookingError::Storage(e) => {
            log::error!("SQL Error: {e}\nbacktrace: {}", Backtrace::capture());
        }
        BookingError::ClassNotFound(class_id) => {
            log::info!("Class id={class_id} not found");
        }
        BookingError::BookingNotFound { client_name, client_email } => {
            log::info!("Booking of {client_name} ({client_email}) not found");
        }
        BookingError::CapacityExhausted(class_id) => {
            log::info!("Class id={class_id} is fully booked");
        }
        BookingError::Validation(msg) => {
            log::debug!("Rejected request: {msg}");
        }
    }
    Custom(err.status(), err.to_string())
}

pub(crate) fn validation_error(msg: impl Into<String>) -> BookingError {
    BookingError::Validation(msg.into())
}

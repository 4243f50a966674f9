//! Domain models for the Jimini sync engine.

mod note;
mod patient;

pub use note::*;
pub use patient::*;

/// Current time as unix milliseconds, the unit of every stored timestamp.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Every generation session gets a fresh random identifier.
pub type SessionId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Create a new, never-before-used session identifier.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4()
}

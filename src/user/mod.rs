pub mod user_models;
pub mod user_directory;

pub use user_directory::{MemoryUserDirectory, PgUserDirectory, UserDirectory};
pub use user_models::UserSummary;

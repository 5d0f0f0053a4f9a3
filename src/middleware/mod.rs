pub mod auth;

pub use auth::{auth_middleware, authenticate_token, extract_token, AuthUser};

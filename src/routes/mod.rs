pub mod auth;
pub mod health;

pub use auth::get_auth_routes;

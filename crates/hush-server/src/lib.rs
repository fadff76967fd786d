pub mod auth;
pub mod crypto;
pub mod handlers;
pub mod server;
pub mod service;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: service::MessageService,
    /// Optional bearer token write-protecting the admin routes.
    pub admin_token: Option<String>,
}

pub use server::{resolve_data_dir, run, ServerConfig};

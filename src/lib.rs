// CMS Engine - generic entity query and mutation engine for posts and terms

pub mod config;
pub mod core;
pub mod ent_framework;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod query;
pub mod services;
pub mod stores;

pub use error::{AppError, AppResult};

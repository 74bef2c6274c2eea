// Services - entity orchestration on top of the stores

pub mod attachments;
pub mod entity_service;
pub mod payload;

pub use entity_service::{EntityService, ListResult};

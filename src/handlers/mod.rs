pub mod health_handlers;
pub mod index_handlers;

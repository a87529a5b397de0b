pub mod conversation_handlers;
pub mod health_handlers;
pub mod reference_handlers;
pub mod upload_handlers;

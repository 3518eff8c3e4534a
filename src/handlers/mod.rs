//! HTTP handlers. Each module maps requests onto `UploadService` calls.

pub mod file_handlers;
pub mod health_handlers;
pub mod upload_handlers;

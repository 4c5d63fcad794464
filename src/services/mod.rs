// src/services/mod.rs
pub mod admin_service;
pub mod dispatch_service;
pub mod identity_service;
pub mod message_templates;
pub mod messaging_service;
pub mod notification_dispatcher;
pub mod rating_service;
pub mod route_service;
pub mod store;

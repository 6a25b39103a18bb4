//! mailtask — create project-tracker tasks from email URLs.

pub mod analyze;
pub mod clickup;
pub mod config;
pub mod credentials;
pub mod error;
pub mod extract;
pub mod fields;
pub mod retry;
pub mod workflow;

pub mod chat;
pub mod config;
pub mod history;
pub mod models;
pub mod usage;

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod users;

pub mod auth;
pub mod config;
pub mod directory;
pub mod policy;
pub mod state;
pub mod web;

pub mod app;
pub mod auth;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod feature;
pub mod filter;
pub mod output;
pub mod request;
pub mod series;
pub mod upload;

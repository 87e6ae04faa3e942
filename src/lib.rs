//! Companion Chat - conversation session core for a personal companion chatbot.
//!
//! The crate keeps a collection of conversations, streams replies from a
//! hosted model into them, derives titles and follow-up suggestions, speaks
//! replies aloud and persists everything between runs.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

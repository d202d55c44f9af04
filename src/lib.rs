//! # People Ratings Telegram Bot
//!
//! A Telegram bot that lets people collect 1–5 ratings about themselves
//! through share links and question polls. Statistics are unlocked by paid
//! subscriptions reconciled against an external payment provider.

pub mod admin;
pub mod bot;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod link;
pub mod localization;
pub mod memory_storage;
pub mod models;
pub mod provider;
pub mod questions;
pub mod ratings;
pub mod reconciliation;
pub mod storage;
pub mod subscription;
pub mod sweep;

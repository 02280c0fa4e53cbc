//! Studyhall - Education Platform Backend
//!
//! This crate implements the subscription and referral reconciliation engine:
//! payment webhook ingestion, the subscription state machine, referral
//! milestone rewards, and trial-expiry reminders.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

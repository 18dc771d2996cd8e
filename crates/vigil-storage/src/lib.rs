//! Persistence for alert rules, their append-only run history, and the
//! singleton email/SMS transport settings.
//!
//! [`AlertStore`] wraps a SeaORM connection (SQLite by default) and runs the
//! schema migrations on connect. Transport secrets are encrypted at rest
//! with [`crypto::SecretEncryptor`].

pub mod crypto;
pub mod entities;
pub mod store;

#[cfg(test)]
mod tests;

pub use store::{AlertRuleRow, AlertRuleUpdate, AlertStore, EmailConfigRow, SmsConfigRow};

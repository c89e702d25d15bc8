//! Custom types for common data structures

use chrono::{DateTime as ChronoDateTime, Utc};

/// Database DateTime type used across all Temps crates
///
/// This is the canonical datetime type for database TIMESTAMPTZ columns.
pub type DBDateTime = ChronoDateTime<Utc>;

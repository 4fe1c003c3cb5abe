//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql, types::Type};
use serde::de::DeserializeOwned;

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// This provides graceful error handling instead of panicking when database
/// contains invalid enum values (from corruption, migration errors, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?
        .parse::<T>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text))
}

fn parse_opt_enum<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text)),
        None => Ok(None),
    }
}

/// Parse a JSON text column.
fn parse_json<T: DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const CHECKOUT_INTENT_COLS: &str = "uref, provider, email, price_minor, currency, payment_type, frequency, metadata, callback_url, on_success, provider_subscription_id, provider_order_id, paid, paid_at, cancelled_at, created_at, updated_at";

pub const PLAN_SUBSCRIPTION_COLS: &str =
    "uref, email, plan_id, provider_subscription_id, activated_at";

pub const COURSE_ENROLLMENT_COLS: &str = "course_id, email, uref, enrolled_at";

pub const BOOKING_PAYMENT_COLS: &str = "booking_id, uref, paid_at";

// ============ FromRow Implementations ============

impl FromRow for CheckoutIntent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CheckoutIntent {
            uref: row.get(0)?,
            provider: parse_enum(row, 1, "provider")?,
            email: row.get(2)?,
            price_minor: row.get(3)?,
            currency: row.get(4)?,
            payment_type: parse_enum(row, 5, "payment_type")?,
            frequency: parse_opt_enum(row, 6, "frequency")?,
            metadata: parse_json(row, 7)?,
            callback_url: row.get(8)?,
            on_success: parse_json(row, 9)?,
            provider_subscription_id: row.get(10)?,
            provider_order_id: row.get(11)?,
            paid: row.get::<_, i32>(12)? != 0,
            paid_at: row.get(13)?,
            cancelled_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

impl FromRow for PlanSubscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PlanSubscription {
            uref: row.get(0)?,
            email: row.get(1)?,
            plan_id: row.get(2)?,
            provider_subscription_id: row.get(3)?,
            activated_at: row.get(4)?,
        })
    }
}

impl FromRow for CourseEnrollment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CourseEnrollment {
            course_id: row.get(0)?,
            email: row.get(1)?,
            uref: row.get(2)?,
            enrolled_at: row.get(3)?,
        })
    }
}

impl FromRow for BookingPayment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(BookingPayment {
            booking_id: row.get(0)?,
            uref: row.get(1)?,
            paid_at: row.get(2)?,
        })
    }
}

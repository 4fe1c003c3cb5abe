//! Completion actions run once a checkout is confirmed paid.
//!
//! Each [`CompletionAction`] kind maps to a [`CompletionHandler`]. Handlers
//! run inside the webhook's reconciliation transaction, only for the
//! delivery that flipped the checkout to paid. A failing handler rolls the
//! whole reconciliation back so the provider redelivers.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{CheckoutIntent, CompletionAction};

pub trait CompletionHandler: Send + Sync {
    fn complete(&self, conn: &Connection, checkout: &CheckoutIntent, uref: &str) -> Result<()>;
}

/// Lookup from action kind to handler.
pub struct CompletionRegistry {
    handlers: HashMap<&'static str, Box<dyn CompletionHandler>>,
}

impl CompletionRegistry {
    /// A registry with no handlers. Every non-`none` action fails.
    pub fn empty() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register("none", NoopHandler);
        registry
    }

    /// The built-in handlers for every [`CompletionAction`] kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("activate_plan", ActivatePlanHandler);
        registry.register("grant_course_access", GrantCourseAccessHandler);
        registry.register("confirm_booking", ConfirmBookingHandler);
        registry
    }

    /// Register (or replace) the handler for an action kind.
    pub fn register(&mut self, kind: &'static str, handler: impl CompletionHandler + 'static) {
        self.handlers.insert(kind, Box::new(handler));
    }

    /// Run the checkout's stored action.
    pub fn dispatch(&self, conn: &Connection, checkout: &CheckoutIntent) -> Result<()> {
        let kind = checkout.on_success.kind();
        let handler = self.handlers.get(kind).ok_or_else(|| {
            AppError::Internal(format!("No completion handler registered for '{}'", kind))
        })?;
        handler.complete(conn, checkout, &checkout.uref)?;
        tracing::info!("Completed '{}' for checkout {}", kind, checkout.uref);
        Ok(())
    }
}

impl Default for CompletionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CompletionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("CompletionRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

fn mismatch(expected: &str, checkout: &CheckoutIntent) -> AppError {
    AppError::Internal(format!(
        "Handler for '{}' called with '{}' action on {}",
        expected,
        checkout.on_success.kind(),
        checkout.uref
    ))
}

struct NoopHandler;

impl CompletionHandler for NoopHandler {
    fn complete(&self, _conn: &Connection, _checkout: &CheckoutIntent, _uref: &str) -> Result<()> {
        Ok(())
    }
}

struct ActivatePlanHandler;

impl CompletionHandler for ActivatePlanHandler {
    fn complete(&self, conn: &Connection, checkout: &CheckoutIntent, _uref: &str) -> Result<()> {
        let CompletionAction::ActivatePlan { plan_id } = &checkout.on_success else {
            return Err(mismatch("activate_plan", checkout));
        };
        queries::activate_plan_subscription(conn, checkout, plan_id)
    }
}

struct GrantCourseAccessHandler;

impl CompletionHandler for GrantCourseAccessHandler {
    fn complete(&self, conn: &Connection, checkout: &CheckoutIntent, uref: &str) -> Result<()> {
        let CompletionAction::GrantCourseAccess { course_id } = &checkout.on_success else {
            return Err(mismatch("grant_course_access", checkout));
        };
        if !queries::grant_course_access(conn, course_id, &checkout.email, uref)? {
            tracing::debug!("{} already enrolled in course {}", checkout.email, course_id);
        }
        Ok(())
    }
}

struct ConfirmBookingHandler;

impl CompletionHandler for ConfirmBookingHandler {
    fn complete(&self, conn: &Connection, checkout: &CheckoutIntent, uref: &str) -> Result<()> {
        let CompletionAction::ConfirmBooking { booking_id } = &checkout.on_success else {
            return Err(mismatch("confirm_booking", checkout));
        };
        if !queries::confirm_booking_payment(conn, booking_id, uref)? {
            tracing::debug!("Booking {} was already confirmed", booking_id);
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

/// What to do once a checkout is confirmed paid.
///
/// Stored as JSON on the checkout row and dispatched through
/// [`crate::completion::CompletionRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CompletionAction {
    ActivatePlan { plan_id: String },
    GrantCourseAccess { course_id: String },
    ConfirmBooking { booking_id: String },
    #[default]
    None,
}

impl CompletionAction {
    /// Registry key for this action.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ActivatePlan { .. } => "activate_plan",
            Self::GrantCourseAccess { .. } => "grant_course_access",
            Self::ConfirmBooking { .. } => "confirm_booking",
            Self::None => "none",
        }
    }
}

/// Row in `plan_subscriptions`, written by `ActivatePlan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSubscription {
    pub uref: String,
    pub email: String,
    pub plan_id: String,
    pub provider_subscription_id: Option<String>,
    pub activated_at: i64,
}

/// Row in `course_enrollments`, written by `GrantCourseAccess`.
#[derive(Debug, Clone, Serialize)]
pub struct CourseEnrollment {
    pub course_id: String,
    pub email: String,
    pub uref: String,
    pub enrolled_at: i64,
}

/// Row in `booking_payments`, written by `ConfirmBooking`.
#[derive(Debug, Clone, Serialize)]
pub struct BookingPayment {
    pub booking_id: String,
    pub uref: String,
    pub paid_at: i64,
}

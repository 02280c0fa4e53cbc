//! Class room entity created by a one-time purchase.

use crate::domain::foundation::{ClassId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// A teacher's class, created when a one-time "class purchase" checkout
/// completes.
///
/// The provider checkout session id is stored with a uniqueness constraint
/// so a redelivered webhook cannot create the class twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRoom {
    pub id: ClassId,

    /// The purchasing teacher.
    pub teacher_user_id: UserId,

    /// Display name, taken from checkout metadata.
    pub name: String,

    /// Short code students use to join.
    pub join_code: String,

    /// Natural idempotency key: the checkout session that paid for this class.
    pub checkout_session_id: String,

    pub created_at: Timestamp,
}

impl ClassRoom {
    /// Creates a class from a completed checkout.
    ///
    /// The join code is derived from the class id, so redelivered creations
    /// that lose the insert race produce no second code.
    pub fn from_checkout(
        teacher_user_id: UserId,
        name: impl Into<String>,
        checkout_session_id: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        let id = ClassId::new();
        Self {
            id,
            teacher_user_id,
            name: name.into(),
            join_code: join_code_for(&id),
            checkout_session_id: checkout_session_id.into(),
            created_at,
        }
    }
}

/// Derives an 8-character join code from a class id.
fn join_code_for(id: &ClassId) -> String {
    id.as_uuid().simple().to_string()[..8].to_uppercase()
}

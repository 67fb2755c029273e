use thiserror::Error;

use crate::currency::Quantity;
use crate::identity::AccountId;
use crate::offer::OfferStatus;

/// Typed failure taxonomy for every core operation.
///
/// Nothing is retried internally and nothing is coerced: an invalid
/// request is rejected with exactly one of these kinds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("account {actor} is not permitted to {action}")]
    Unauthorized {
        actor: AccountId,
        action: &'static str,
    },

    #[error("event {event} is not valid from status {from:?}")]
    InvalidTransition {
        from: OfferStatus,
        event: &'static str,
    },

    #[error("requested quantity {requested} kg exceeds remaining {remaining} kg")]
    InsufficientQuantity {
        requested: Quantity,
        remaining: Quantity,
    },

    #[error("conflict: {0}")]
    Conflict(String),
}

impl MarketError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MarketError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        MarketError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(actor: &AccountId, action: &'static str) -> Self {
        MarketError::Unauthorized {
            actor: actor.clone(),
            action,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        MarketError::Conflict(msg.into())
    }
}

//! Request lifecycle events.
//!
//! Each mutation of a request emits exactly one event. Events are consumed
//! by the notification engine inside the same transaction as the mutation;
//! push delivery happens after commit.

use cmsvs_db::entities::request;
use cmsvs_db::entities::request::RequestStatus;

/// A request lifecycle event.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A request was created.
    Created {
        request: request::Model,
    },
    /// A request moved between statuses.
    StatusChanged {
        request: request::Model,
        old: RequestStatus,
        new: RequestStatus,
    },
    /// A request's details were edited.
    Updated {
        request: request::Model,
    },
    /// A request was archived or unarchived.
    Archived {
        request: request::Model,
        archived: bool,
    },
    /// A request was deleted.
    Deleted {
        request: request::Model,
    },
}

impl LifecycleEvent {
    /// The request this event concerns.
    #[must_use]
    pub const fn request(&self) -> &request::Model {
        match self {
            Self::Created { request }
            | Self::StatusChanged { request, .. }
            | Self::Updated { request }
            | Self::Archived { request, .. }
            | Self::Deleted { request } => request,
        }
    }
}

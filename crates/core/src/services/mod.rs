//! Business logic services.

pub mod attachment;
pub mod events;
pub mod notification;
pub mod push;
pub mod request;

pub use attachment::AttachmentService;
pub use events::LifecycleEvent;
pub use notification::{NotificationEngine, PendingPush};
pub use push::{PushDispatch, PushJob};
pub use request::{Actor, CreateRequestInput, RequestService, UpdateDetailsInput};

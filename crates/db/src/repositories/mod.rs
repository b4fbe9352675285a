//! Database repositories.

pub mod file;
pub mod notification;
pub mod notification_preference;
pub mod push_subscription;
pub mod request;
pub mod user;

pub use file::FileRepository;
pub use notification::NotificationRepository;
pub use notification_preference::NotificationPreferenceRepository;
pub use push_subscription::{NewSubscription, PushSubscriptionRepository};
pub use request::{RequestFilter, RequestRepository};
pub use user::UserRepository;

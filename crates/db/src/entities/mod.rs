//! Database entities.

pub mod file;
pub mod notification;
pub mod notification_preference;
pub mod push_subscription;
pub mod request;
pub mod user;

pub use file::Entity as File;
pub use notification::Entity as Notification;
pub use notification_preference::Entity as NotificationPreference;
pub use push_subscription::Entity as PushSubscription;
pub use request::Entity as Request;
pub use user::Entity as User;

//! Notification domain module.

mod notification;

pub use notification::{Notification, NotificationKind};

pub mod system_notifier;

pub use system_notifier::{Publication, SystemNotifier};

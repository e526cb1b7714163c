//! Server configuration

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{AddressBookConfig, AppConfig, InboxConfig, QueueConfig, XmppConfig};

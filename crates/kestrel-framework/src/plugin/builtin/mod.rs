//! Plugins shipped with the framework.

pub mod management;
pub mod reply;

pub use management::{GeneratedPluginStore, GeneratedRecord, install as install_management};
pub use reply::ReplyPlugin;

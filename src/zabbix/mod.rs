//! Zabbix integration: JSON-RPC API client, object provisioning, and the
//! zabbix_sender line-protocol submission path.

mod client;
mod dashboard;
mod hosts;
mod sender;
mod template;
pub mod types;

pub use client::Client;
pub use sender::{Sender, SenderData};
pub use template::{BULLETINS_LLD_KEY, HOSTS_LLD_KEY, PACKAGES_LLD_KEY};
pub use types::{Host, HostGroup, HostInterface, Item, LldData, Template};

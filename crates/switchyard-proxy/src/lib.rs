//! The switchyard proxy: accepts game clients, connects each to a backend and
//! moves them between backends on request without dropping the connection.

pub mod driver;
pub mod error;
pub mod server;
pub mod settings;

pub use driver::{EXCEPTION_PREFIX, drive_session};
pub use error::ProxyError;
pub use server::{ConnectionId, ProxyServer};
pub use settings::{ProxySettings, switch_policy};

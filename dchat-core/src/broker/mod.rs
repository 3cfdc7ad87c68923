//! Embedded publish/subscribe broker
//!
//! A [`Server`] accepts plaintext client connections and, when clustering is
//! enabled, full-mesh route connections to peer servers (optionally over
//! mutual TLS). [`BrokerClient`] is the matching client.

pub mod client;
pub mod credentials;
pub mod error;
pub mod options;
pub mod permissions;
pub mod protocol;
mod route;
pub mod server;
pub mod subject;
pub mod tls;

pub use client::{BrokerClient, ClientOptions, Message, Subscription};
pub use credentials::{format_credentials, parse_credentials, read_credentials};
pub use error::{BrokerError, BrokerResult};
pub use options::{
    parse_route_url, AuthFile, AuthFileCluster, Authorization, ClusterOptions, ServerOptions,
};
pub use permissions::{RoutePermissions, SubjectPermission};
pub use server::{RouteSummary, Server, ServerHandle, ServerStats};
pub use tls::ClusterTls;

//! # dubbo-invoke-client
//!
//! Client library for invoking Dubbo services.
//!
//! This crate provides:
//! - One-shot socket exchange of Dubbo frames with timeouts
//! - Address classification and a process-wide resolution cache
//! - Provider discovery through ZooKeeper, Nacos, Consul, Redis and multicast
//! - A fallback chain over generic reference, direct protocol and HTTP
//! - Parameter conversion from JSON literals and type hints

pub mod address;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod invoker;
pub mod params;
pub mod registry;
pub mod result;
pub mod transport;

pub use address::{RegistryScheme, ServiceAddress};
pub use cache::{ResolutionCache, ResolvedEndpoint};
pub use config::{ClientConfig, ConfigError, TimeoutConfig};
pub use context::ClientContext;
pub use error::{ClientError, ErrorKind, Fallback, Layer, ResolutionError, TransportError};
pub use invoker::Invocation;
pub use params::{parse_parameters, parse_type_hints, Parameters};
pub use registry::{ProviderUrl, RegistryClient};
pub use result::InvocationResult;
pub use transport::Transport;

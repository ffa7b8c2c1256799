//! The layered fallback chain.
//!
//! Layers run in order and the first success wins:
//!
//! 1. generic reference (`$invoke`), against discovered providers or the
//!    direct address
//! 2. direct protocol, a typed request with an exact descriptor (direct
//!    addresses only)
//! 3. HTTP, a JSON POST to the provider host
//!
//! A failure either hands over to the next layer or ends the chain, as
//! decided by [`ClientError::fallback`].

use crate::address::{RegistryScheme, ServiceAddress};
use crate::cache::ResolvedEndpoint;
use crate::config::ClientConfig;
use crate::error::{ClientError, Fallback, Layer, ResolutionError};
use crate::http::{self, HttpClient, HttpInvocation};
use crate::params::Parameters;
use crate::registry::{DiscoveryQuery, ProviderUrl, RegistryClient};
use crate::transport::Transport;
use dubbo_invoke_protocol::{
    decode_response, method_descriptor, sanitize, InvocationRequest, Response, ResponseKind,
    Value, DEFAULT_SERVICE_VERSION,
};
use std::time::Duration;

/// One call, as handed to the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub service: String,
    pub method: String,
    pub parameters: Parameters,
    /// Empty means the configured version.
    pub version: String,
    /// Empty means the configured group.
    pub group: String,
    /// Per-call address override.
    pub address: Option<String>,
}

impl Invocation {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            parameters: Parameters::default(),
            version: String::new(),
            group: String::new(),
            address: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Runs an invocation through the layers.
pub struct Invoker<'a> {
    config: &'a ClientConfig,
    http: &'a HttpClient,
}

impl<'a> Invoker<'a> {
    pub fn new(config: &'a ClientConfig, http: &'a HttpClient) -> Self {
        Self { config, http }
    }

    /// Runs the chain and sanitizes the successful value.
    pub async fn invoke(
        &self,
        endpoint: &ResolvedEndpoint,
        invocation: &Invocation,
    ) -> Result<Value, ClientError> {
        let version = or_default(&invocation.version, &self.config.version);
        let group = or_default(&invocation.group, &self.config.group);
        let mut attempts: Vec<(Layer, ClientError)> = Vec::new();

        tracing::info!(
            service = %invocation.service,
            method = %invocation.method,
            address = %endpoint.address(),
            "invoking"
        );

        let generic = self
            .generic_reference(endpoint, invocation, version, group)
            .await;
        match settle(Layer::GenericReference, generic, &mut attempts) {
            Step::Done(result) => return result.map(|v| sanitize(&v)),
            Step::Next => {}
        }

        if let ServiceAddress::Direct { host, port } = endpoint.address() {
            let direct = self
                .direct_protocol(host, *port, invocation, version, group)
                .await;
            match settle(Layer::DirectProtocol, direct, &mut attempts) {
                Step::Done(result) => return result.map(|v| sanitize(&v)),
                Step::Next => {}
            }
        }

        if self.config.http_fallback {
            match http_target(endpoint) {
                Some((host, port)) => {
                    let over_http = self
                        .over_http(&host, port, invocation, version, group)
                        .await;
                    match settle(Layer::Http, over_http, &mut attempts) {
                        Step::Done(result) => return result.map(|v| sanitize(&v)),
                        Step::Next => {}
                    }
                }
                None => tracing::debug!("no HTTP target known, skipping HTTP layer"),
            }
        }

        tracing::error!(
            service = %invocation.service,
            layers = attempts.len(),
            "every invocation layer failed"
        );
        Err(ClientError::FallbackExhausted(attempts))
    }

    // =========================================================================
    // Generic reference
    // =========================================================================

    async fn generic_reference(
        &self,
        endpoint: &ResolvedEndpoint,
        invocation: &Invocation,
        version: &str,
        group: &str,
    ) -> Result<Value, ClientError> {
        let timeouts = &self.config.timeouts;
        match endpoint.address() {
            ServiceAddress::Direct { host, port } => {
                let request =
                    generic_request(invocation, &self.config.application, version, group);
                self.call(host, *port, &request, timeouts.reference_call())
                    .await
            }
            ServiceAddress::Registry { scheme, .. } => {
                let address = endpoint.address();
                let query = DiscoveryQuery {
                    service: &invocation.service,
                    version,
                    group,
                };
                let providers = endpoint
                    .providers(|| async {
                        match RegistryClient::for_address(address, timeouts, self.http) {
                            Ok(registry) => registry.discover(query, timeouts).await,
                            Err(err) => Err(err.into()),
                        }
                    })
                    .await?;

                let call_timeout = match scheme {
                    RegistryScheme::Zookeeper => timeouts.zookeeper_call(),
                    _ => timeouts.reference_call(),
                };
                self.call_providers(providers, invocation, version, group, call_timeout)
                    .await
            }
        }
    }

    /// Tries providers in order, moving on while failures are recoverable.
    async fn call_providers(
        &self,
        providers: &[ProviderUrl],
        invocation: &Invocation,
        version: &str,
        group: &str,
        call_timeout: Duration,
    ) -> Result<Value, ClientError> {
        let mut last = None;
        for provider in providers {
            let version = provider_requirement(version, provider.param("version"));
            let group = provider_requirement(group, provider.param("group"));
            let request =
                generic_request(invocation, &self.config.application, version, group);

            match self
                .call(&provider.host, provider.port, &request, call_timeout)
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) if err.fallback() == Fallback::Continue => {
                    tracing::warn!(
                        provider = %provider.authority(),
                        error = %err,
                        "provider failed"
                    );
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| {
            ResolutionError::NoProvider {
                service: invocation.service.clone(),
                registry: String::new(),
            }
            .into()
        }))
    }

    // =========================================================================
    // Direct protocol
    // =========================================================================

    async fn direct_protocol(
        &self,
        host: &str,
        port: u16,
        invocation: &Invocation,
        version: &str,
        group: &str,
    ) -> Result<Value, ClientError> {
        let parameters = &invocation.parameters;
        let mut request = InvocationRequest::new(
            invocation.service.as_str(),
            invocation.method.as_str(),
            method_descriptor(&parameters.types),
            parameters.values.clone(),
        )?
        .with_version(version)
        .with_attachment("path", invocation.service.as_str())
        .with_attachment("interface", invocation.service.as_str())
        .with_attachment("version", request_version(version));
        if !self.config.application.is_empty() {
            request = request.with_attachment("application", self.config.application.as_str());
        }
        if !group.is_empty() {
            request = request.with_attachment("group", group);
        }

        self.call(host, port, &request, self.config.timeouts.direct_read())
            .await
    }

    // =========================================================================
    // HTTP
    // =========================================================================

    async fn over_http(
        &self,
        host: &str,
        port: u16,
        invocation: &Invocation,
        version: &str,
        group: &str,
    ) -> Result<Value, ClientError> {
        let body = HttpInvocation {
            service: invocation.service.clone(),
            method: invocation.method.clone(),
            parameter_types: invocation.parameters.types.clone(),
            parameters: invocation.parameters.to_json(),
            version: version.to_string(),
            group: group.to_string(),
        };
        http::invoke(self.http, host, port, &body).await
    }

    /// One socket exchange, decoded into a value or a failure.
    async fn call(
        &self,
        host: &str,
        port: u16,
        request: &InvocationRequest,
        read_timeout: Duration,
    ) -> Result<Value, ClientError> {
        let frame = request.to_frame()?;
        let transport = Transport::new(self.config.timeouts.connect(), read_timeout);
        let reply = transport.exchange(host, port, &frame).await?;
        into_result(decode_response(&reply))
    }
}

/// Turns a decoded response into the call outcome.
pub fn into_result(response: Response) -> Result<Value, ClientError> {
    match response.kind {
        ResponseKind::Value => Ok(response.value),
        ResponseKind::Exception => Err(ClientError::Application(response.value)),
        ResponseKind::Error => Err(ClientError::Remote {
            status: response.status,
            message: response.value.to_string(),
        }),
    }
}

enum Step {
    Done(Result<Value, ClientError>),
    Next,
}

/// Records a continue-class failure, or finishes the chain.
fn settle(
    layer: Layer,
    result: Result<Value, ClientError>,
    attempts: &mut Vec<(Layer, ClientError)>,
) -> Step {
    match result {
        Ok(value) => {
            tracing::info!(%layer, kind = value.kind(), "invocation succeeded");
            Step::Done(Ok(value))
        }
        Err(err) if err.fallback() == Fallback::Continue => {
            tracing::warn!(%layer, error = %err, "layer failed, falling back");
            attempts.push((layer, err));
            Step::Next
        }
        Err(err) => {
            tracing::error!(%layer, error = %err, kind = %err.kind(), "invocation failed");
            Step::Done(Err(err))
        }
    }
}

fn generic_request(
    invocation: &Invocation,
    application: &str,
    version: &str,
    group: &str,
) -> InvocationRequest {
    let parameters = &invocation.parameters;
    let mut request = InvocationRequest::generic(
        invocation.service.as_str(),
        request_version(version),
        &invocation.method,
        &parameters.types,
        parameters.values.clone(),
    );
    if !application.is_empty() {
        request = request.with_attachment("application", application);
    }
    if group.is_empty() {
        request
    } else {
        request.with_attachment("group", group)
    }
}

/// Where the HTTP layer posts: the direct address, or the first provider
/// found through the registry.
fn http_target(endpoint: &ResolvedEndpoint) -> Option<(String, u16)> {
    match endpoint.address() {
        ServiceAddress::Direct { host, port } => Some((host.clone(), *port)),
        ServiceAddress::Registry { .. } => endpoint
            .cached_providers()
            .and_then(|providers| providers.first())
            .map(|p| (p.host.clone(), p.port)),
    }
}

fn or_default<'s>(value: &'s str, fallback: &'s str) -> &'s str {
    if value.trim().is_empty() {
        fallback.trim()
    } else {
        value.trim()
    }
}

/// A wildcard requirement adopts what the provider registered.
fn provider_requirement<'s>(requested: &'s str, registered: Option<&'s str>) -> &'s str {
    if requested.is_empty() || requested == "*" || requested == DEFAULT_SERVICE_VERSION {
        registered.unwrap_or(requested)
    } else {
        requested
    }
}

fn request_version(version: &str) -> &str {
    if version.is_empty() || version == "*" {
        DEFAULT_SERVICE_VERSION
    } else {
        version
    }
}

//! Connection handling shared by the per-signal exporter builders.
//!
//! gRPC multiplexes every signal over one lazily-connected tonic channel.
//! HTTP exporters each own a client; they share only the resolved endpoint
//! and headers computed here.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::env::ResolvedConfig;
use crate::error::{BoxError, ConstructionError, Signal};
use crate::options::Protocol;

/// Transport every exporter of one pipeline is built over.
pub(crate) enum Transport {
    #[cfg(feature = "grpc")]
    Channel(std::sync::Arc<SharedChannel>),
    Requests(RequestSettings),
}

impl Transport {
    /// Open the transport described by the config.
    ///
    /// For gRPC this creates the single shared channel; for HTTP it only
    /// prepares endpoints and headers.
    pub(crate) fn open(config: &ResolvedConfig) -> Result<Self, ConstructionError> {
        if config.insecure {
            tracing::warn!(endpoint = %config.endpoint, "using insecure OTLP transport");
        }

        match config.protocol {
            Protocol::Grpc => {
                #[cfg(feature = "grpc")]
                {
                    let uri = normalize_endpoint(&config.endpoint, config.insecure);
                    let channel = SharedChannel::connect(uri, config.insecure)?;
                    Ok(Transport::Channel(std::sync::Arc::new(channel)))
                }
                #[cfg(not(feature = "grpc"))]
                {
                    Err(ConstructionError::Transport {
                        endpoint: config.endpoint.clone(),
                        source: "gRPC transport requested but the `grpc` feature is not enabled"
                            .into(),
                    })
                }
            }
            Protocol::HttpProtobuf | Protocol::HttpJson => {
                Ok(Transport::Requests(RequestSettings::from_config(config)))
            }
        }
    }

    pub(crate) fn is_shared(&self) -> bool {
        match self {
            #[cfg(feature = "grpc")]
            Transport::Channel(_) => true,
            Transport::Requests(_) => false,
        }
    }

    /// Teardown callable for the shutdown registry. A no-op for HTTP.
    pub(crate) fn closer(&self) -> impl FnOnce() -> Result<(), BoxError> + Send + 'static {
        #[cfg(feature = "grpc")]
        let channel = match self {
            Transport::Channel(channel) => Some(std::sync::Arc::clone(channel)),
            Transport::Requests(_) => None,
        };

        move || {
            #[cfg(feature = "grpc")]
            {
                if let Some(channel) = channel {
                    channel.close();
                }
            }
            Ok(())
        }
    }
}

/// Per-signal HTTP export settings.
#[derive(Debug, Clone)]
pub(crate) struct RequestSettings {
    pub base_endpoint: String,
    pub protocol: Protocol,
    pub headers: HashMap<String, String>,
}

impl RequestSettings {
    fn from_config(config: &ResolvedConfig) -> Self {
        let mut headers = HashMap::new();
        if let Some((user, pass)) = &config.credentials {
            headers.insert("Authorization".to_owned(), basic_auth(user, pass));
        }

        Self {
            base_endpoint: normalize_endpoint(&config.endpoint, config.insecure),
            protocol: config.protocol,
            headers,
        }
    }

    /// Full OTLP/HTTP URL of one signal, e.g. `http://collector:4318/v1/traces`.
    pub(crate) fn endpoint_for(&self, signal: Signal) -> String {
        let path = match signal {
            Signal::Traces => "v1/traces",
            Signal::Metrics => "v1/metrics",
            Signal::Logs => "v1/logs",
        };
        format!("{}/{path}", self.base_endpoint.trim_end_matches('/'))
    }

    #[cfg(feature = "http")]
    pub(crate) fn otlp_protocol(&self) -> opentelemetry_otlp::Protocol {
        match self.protocol {
            Protocol::HttpJson => opentelemetry_otlp::Protocol::HttpJson,
            Protocol::Grpc | Protocol::HttpProtobuf => opentelemetry_otlp::Protocol::HttpBinary,
        }
    }
}

/// `Basic` authorization header value for the given credentials.
pub(crate) fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Give the endpoint a scheme matching the transport security.
///
/// Scheme-less endpoints get `http://` when insecure and `https://` otherwise.
/// An explicit `https://` is downgraded when insecure; an explicit `http://`
/// is kept as written.
pub(crate) fn normalize_endpoint(endpoint: &str, insecure: bool) -> String {
    let endpoint = endpoint.trim();
    match endpoint.split_once("://") {
        Some(("https", rest)) if insecure => format!("http://{rest}"),
        Some(_) => endpoint.to_owned(),
        None if insecure => format!("http://{endpoint}"),
        None => format!("https://{endpoint}"),
    }
}

/// The single gRPC channel shared by the span, metric and log exporters.
#[cfg(feature = "grpc")]
pub(crate) struct SharedChannel {
    endpoint: String,
    channel: std::sync::Mutex<Option<tonic::transport::Channel>>,
}

#[cfg(feature = "grpc")]
impl SharedChannel {
    /// Create a lazily-connecting channel. Must be called within a tokio runtime.
    fn connect(uri: String, insecure: bool) -> Result<Self, ConstructionError> {
        let transport_err = |source: BoxError| ConstructionError::Transport {
            endpoint: uri.clone(),
            source,
        };

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(transport_err(
                "the gRPC transport must be opened from within a tokio runtime".into(),
            ));
        }

        let endpoint = tonic::transport::Endpoint::from_shared(uri.clone())
            .map_err(|e| transport_err(e.into()))?;
        let endpoint = if insecure {
            endpoint
        } else {
            with_tls(endpoint).map_err(transport_err)?
        };

        Ok(Self {
            channel: std::sync::Mutex::new(Some(endpoint.connect_lazy())),
            endpoint: uri,
        })
    }

    /// A handle to the shared channel, or `None` once it has been closed.
    pub(crate) fn channel(&self) -> Option<tonic::transport::Channel> {
        self.channel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Release this handle on the connection. Returns `false` if already closed.
    ///
    /// tonic closes the underlying connection once the last clone is dropped;
    /// the exporter clones go away when their providers shut down.
    pub(crate) fn close(&self) -> bool {
        self.channel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .is_some()
    }
}

#[cfg(feature = "tls")]
fn with_tls(
    endpoint: tonic::transport::Endpoint,
) -> Result<tonic::transport::Endpoint, BoxError> {
    let tls = tonic::transport::ClientTlsConfig::new().with_native_roots();
    Ok(endpoint.tls_config(tls)?)
}

#[cfg(all(feature = "grpc", not(feature = "tls")))]
fn with_tls(
    _endpoint: tonic::transport::Endpoint,
) -> Result<tonic::transport::Endpoint, BoxError> {
    Err("TLS requested but the `tls` feature is not enabled; enable it or set insecure".into())
}

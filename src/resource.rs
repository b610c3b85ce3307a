use std::collections::HashMap;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

use crate::error::ConstructionError;

/// Semantic-conventions schema the resource attribute names follow.
pub(crate) const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.26.0";

/// Service identity attached to every exported span, metric and log record.
#[derive(Debug, Clone)]
pub(crate) struct ServiceIdentity<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub namespace: Option<&'a str>,
    pub host: Option<&'a str>,
}

/// Build an OpenTelemetry [`Resource`] from the service identity and extra attributes.
///
/// Absent or empty namespace and host are left out rather than encoded as empty strings.
///
/// # Errors
///
/// Returns an error if the service name or version is blank; telemetry that
/// cannot be attributed to a service is useless at the collector.
pub(crate) fn build_resource(
    identity: &ServiceIdentity<'_>,
    attributes: &HashMap<String, String>,
) -> Result<Resource, ConstructionError> {
    if identity.name.trim().is_empty() {
        return Err(ConstructionError::Resource(
            "service.name must not be empty".to_owned(),
        ));
    }
    if identity.version.trim().is_empty() {
        return Err(ConstructionError::Resource(
            "service.version must not be empty".to_owned(),
        ));
    }

    let mut kvs: Vec<KeyValue> = Vec::with_capacity(attributes.len() + 4);
    kvs.push(KeyValue::new("service.name", identity.name.to_owned()));
    kvs.push(KeyValue::new("service.version", identity.version.to_owned()));

    if let Some(namespace) = identity.namespace.filter(|ns| !ns.is_empty()) {
        kvs.push(KeyValue::new("service.namespace", namespace.to_owned()));
    }
    if let Some(host) = identity.host.filter(|h| !h.is_empty()) {
        kvs.push(KeyValue::new("host.name", host.to_owned()));
    }

    for (key, value) in attributes {
        kvs.push(KeyValue::new(key.clone(), value.clone()));
    }

    Ok(Resource::builder().with_schema_url(kvs, SCHEMA_URL).build())
}

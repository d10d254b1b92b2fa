//! Resource construction.
//!
//! Attributes are merged in increasing priority: SDK defaults and
//! `OTEL_RESOURCE_ATTRIBUTES`, host and process detection, the configured
//! service identity, then user-supplied attributes.

use observe_config::ServiceConfig;
use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::{Resource, ResourceDetector};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use opentelemetry_semantic_conventions::resource as semconv_res;
use std::borrow::Cow;
use std::env;

/// Detects `host.name` and `os.type`.
#[derive(Debug, Default)]
pub struct HostDetector;

impl ResourceDetector for HostDetector {
    fn detect(&self) -> Resource {
        let mut attributes = vec![KeyValue::new(semconv_res::OS_TYPE, env::consts::OS)];

        if let Some(host) = host_name() {
            attributes.push(KeyValue::new(semconv_res::HOST_NAME, host));
        }

        Resource::builder_empty()
            .with_schema_url(attributes, Cow::Borrowed(SCHEMA_URL))
            .build()
    }
}

fn host_name() -> Option<String> {
    env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Detects `process.pid` and `process.executable.name`.
#[derive(Debug, Default)]
pub struct ProcessDetector;

impl ResourceDetector for ProcessDetector {
    fn detect(&self) -> Resource {
        let mut attributes = vec![KeyValue::new(
            semconv_res::PROCESS_PID,
            i64::from(std::process::id()),
        )];

        if let Some(name) = env::current_exe()
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        {
            attributes.push(KeyValue::new(semconv_res::PROCESS_EXECUTABLE_NAME, name));
        }

        Resource::builder_empty()
            .with_schema_url(attributes, Cow::Borrowed(SCHEMA_URL))
            .build()
    }
}

/// Builds the resource shared by every provider of one runtime instance.
pub fn build_resource(service: &ServiceConfig) -> Resource {
    let identity = [
        KeyValue::new(semconv_res::SERVICE_VERSION, service.version.clone()),
        KeyValue::new(semconv_res::SERVICE_NAMESPACE, service.namespace.clone()),
        KeyValue::new("deployment.environment.name", service.environment.clone()),
    ];
    let user = service
        .attributes
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));

    Resource::builder()
        .with_detector(Box::new(HostDetector))
        .with_detector(Box::new(ProcessDetector))
        .with_service_name(service.name.clone())
        .with_attributes(identity)
        .with_attributes(user)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};
    use serial_test::serial;

    fn get(resource: &Resource, key: &'static str) -> Option<Value> {
        resource.get(&Key::from_static_str(key))
    }

    #[test]
    #[serial]
    fn test_service_identity() {
        temp_env::with_vars([("OTEL_RESOURCE_ATTRIBUTES", None::<&str>)], || {
            let service = ServiceConfig {
                name: "checkout".to_string(),
                version: "1.2.3".to_string(),
                ..Default::default()
            };

            let resource = build_resource(&service);

            assert_eq!(get(&resource, "service.name"), Some("checkout".into()));
            assert_eq!(get(&resource, "service.version"), Some("1.2.3".into()));
            assert_eq!(get(&resource, "service.namespace"), Some("default".into()));
            assert_eq!(
                get(&resource, "deployment.environment.name"),
                Some("development".into())
            );
        });
    }

    #[test]
    #[serial]
    fn test_user_attributes_win() {
        temp_env::with_vars(
            [("OTEL_RESOURCE_ATTRIBUTES", Some("team=env-team,region=eu"))],
            || {
                let mut service = ServiceConfig::default();
                service
                    .attributes
                    .insert("team".to_string(), "config-team".to_string());
                service
                    .attributes
                    .insert("service.version".to_string(), "override".to_string());

                let resource = build_resource(&service);

                assert_eq!(get(&resource, "team"), Some("config-team".into()));
                assert_eq!(get(&resource, "region"), Some("eu".into()));
                assert_eq!(get(&resource, "service.version"), Some("override".into()));
            },
        );
    }

    #[test]
    fn test_process_detector() {
        let resource = ProcessDetector.detect();

        assert_eq!(
            get(&resource, "process.pid"),
            Some(Value::I64(i64::from(std::process::id())))
        );
    }

    #[test]
    #[serial]
    fn test_host_detector_prefers_env() {
        temp_env::with_vars([("HOSTNAME", Some("web-1"))], || {
            let resource = HostDetector.detect();

            assert_eq!(get(&resource, "host.name"), Some("web-1".into()));
            assert_eq!(get(&resource, "os.type"), Some(env::consts::OS.into()));
        });
    }
}

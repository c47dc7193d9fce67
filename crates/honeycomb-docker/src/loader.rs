use std::sync::Arc;

use async_trait::async_trait;
use honeycomb_backend::Endpoint;
use honeycomb_name::Matcher;
use tracing::warn;

use crate::{DockerClient, DockerError, ServiceInspector, MATCH_LABEL};

/// A discovered route: one pattern of one service, with the endpoint the
/// service resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    pub matcher: Matcher,
    pub endpoint: Endpoint,
}

/// Supplies the current list of routable services.
#[async_trait]
pub trait ServiceLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<ServiceInfo>, DockerError>;
}

/// Loads routable services from the Docker daemon.
///
/// A service is routable when it carries the match label. Services that fail
/// inspection, and individual labels that fail to compile, are logged and
/// skipped rather than failing the whole poll.
pub struct DockerServiceLoader {
    client: Arc<DockerClient>,
    inspector: ServiceInspector,
}

impl DockerServiceLoader {
    pub fn new(client: Arc<DockerClient>) -> Self {
        let inspector = ServiceInspector::new(client.clone());
        DockerServiceLoader { client, inspector }
    }
}

#[async_trait]
impl ServiceLoader for DockerServiceLoader {
    async fn load(&self) -> Result<Vec<ServiceInfo>, DockerError> {
        let services = self.client.list_services(MATCH_LABEL).await?;
        let mut result = Vec::new();

        for service in &services {
            let name = &service.spec.name;
            let image = &service.spec.task_template.container_spec.image;

            let endpoint = match self.inspector.inspect(service).await {
                Ok(endpoint) => endpoint,
                Err(error) => {
                    warn!(service = %name, image = %image, %error, "can not route to service");
                    continue;
                }
            };

            for (key, value) in &service.spec.labels {
                if key != MATCH_LABEL && !key.starts_with(&format!("{MATCH_LABEL}.")) {
                    continue;
                }

                match Matcher::new(value) {
                    Ok(matcher) => result.push(ServiceInfo {
                        name: name.clone(),
                        matcher,
                        endpoint: endpoint.clone(),
                    }),
                    Err(error) => {
                        warn!(
                            service = %name,
                            image = %image,
                            pattern = %value,
                            %error,
                            "can not route to service via pattern"
                        );
                    }
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use honeycomb_backend::TlsMode;

    use super::*;

    #[test]
    fn service_info_equality_covers_all_fields() {
        let info = ServiceInfo {
            name: "web".to_string(),
            matcher: Matcher::new("*.example.com").unwrap(),
            endpoint: Endpoint {
                description: "example/web:1.0".to_string(),
                address: "web:8080".to_string(),
                tls_mode: TlsMode::Disabled,
            },
        };

        let same = info.clone();
        assert_eq!(info, same);

        let mut different = info.clone();
        different.matcher = Matcher::new("*.example.org").unwrap();
        assert_ne!(info, different);

        let mut different = info.clone();
        different.endpoint.address = "web:9090".to_string();
        assert_ne!(info, different);
    }
}

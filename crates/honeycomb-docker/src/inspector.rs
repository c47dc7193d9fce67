use std::sync::Arc;

use honeycomb_backend::{Endpoint, TlsMode};

use crate::{DockerClient, DockerError, Service};

/// Label carrying the server-name pattern(s) routed to a service. Additional
/// patterns may be added with dotted suffixes (`honeycomb.match.admin`, ...).
pub const MATCH_LABEL: &str = "honeycomb.match";

/// Label selecting the backend port when the image exposes more than one.
pub const PORT_LABEL: &str = "honeycomb.port";

/// Label selecting the TLS posture (`enabled`/`true`, `disabled`/`false`,
/// `insecure`).
pub const TLS_LABEL: &str = "honeycomb.tls";

/// Label overriding the human-readable endpoint description.
pub const DESCRIPTION_LABEL: &str = "honeycomb.description";

/// Derives backend endpoints from swarm services.
pub struct ServiceInspector {
    client: Arc<DockerClient>,
}

impl ServiceInspector {
    pub fn new(client: Arc<DockerClient>) -> Self {
        ServiceInspector { client }
    }

    /// Produce an endpoint for the given service.
    pub async fn inspect(&self, service: &Service) -> Result<Endpoint, DockerError> {
        let port = self.port(service).await?;
        let tls_mode = tls_mode(service, port)?;

        let description = service
            .spec
            .labels
            .get(DESCRIPTION_LABEL)
            .cloned()
            .unwrap_or_else(|| service.spec.task_template.container_spec.image.clone());

        Ok(Endpoint {
            description,
            address: format!("{}:{}", service.spec.name, port),
            tls_mode,
        })
    }

    async fn port(&self, service: &Service) -> Result<u16, DockerError> {
        // Trust whatever is in the port label if it's present.
        if let Some(value) = service.spec.labels.get(PORT_LABEL) {
            return value
                .parse()
                .map_err(|_| DockerError::InvalidPortLabel {
                    label: PORT_LABEL.to_string(),
                    value: value.clone(),
                });
        }

        // Otherwise the image must expose exactly one TCP port.
        let image = &service.spec.task_template.container_spec.image;
        let inspect = self.client.inspect_image(image).await?;
        let ports = inspect.exposed_tcp_ports();

        match ports.as_slice() {
            [] => Err(DockerError::NoExposedPorts {
                image: image.clone(),
            }),
            [port] => port.parse().map_err(|_| DockerError::InvalidPortLabel {
                label: PORT_LABEL.to_string(),
                value: port.clone(),
            }),
            _ => Err(DockerError::MultipleExposedPorts {
                image: image.clone(),
                ports: ports.join(", "),
                label: PORT_LABEL.to_string(),
            }),
        }
    }
}

fn tls_mode(service: &Service, port: u16) -> Result<TlsMode, DockerError> {
    if let Some(value) = service.spec.labels.get(TLS_LABEL) {
        return match value.as_str() {
            "enabled" | "true" => Ok(TlsMode::Enabled),
            "disabled" | "false" => Ok(TlsMode::Disabled),
            "insecure" => Ok(TlsMode::Insecure),
            _ => Err(DockerError::InvalidTlsLabel {
                label: TLS_LABEL.to_string(),
                value: value.clone(),
            }),
        };
    }

    match port {
        443 | 8443 => Ok(TlsMode::Enabled),
        _ => Ok(TlsMode::Disabled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(labels: &[(&str, &str)]) -> Service {
        let mut service = Service::default();
        service.spec.name = "web".to_string();
        service.spec.task_template.container_spec.image = "example/web:1.0".to_string();
        for (key, value) in labels {
            service
                .spec
                .labels
                .insert(key.to_string(), value.to_string());
        }
        service
    }

    #[test]
    fn tls_label_overrides_the_port_heuristic() {
        let svc = service(&[(TLS_LABEL, "disabled")]);
        assert_eq!(tls_mode(&svc, 443).unwrap(), TlsMode::Disabled);

        let svc = service(&[(TLS_LABEL, "insecure")]);
        assert_eq!(tls_mode(&svc, 80).unwrap(), TlsMode::Insecure);

        let svc = service(&[(TLS_LABEL, "true")]);
        assert_eq!(tls_mode(&svc, 80).unwrap(), TlsMode::Enabled);
    }

    #[test]
    fn tls_defaults_follow_the_port() {
        let svc = service(&[]);
        assert_eq!(tls_mode(&svc, 443).unwrap(), TlsMode::Enabled);
        assert_eq!(tls_mode(&svc, 8443).unwrap(), TlsMode::Enabled);
        assert_eq!(tls_mode(&svc, 8080).unwrap(), TlsMode::Disabled);
    }

    #[test]
    fn unknown_tls_labels_are_rejected() {
        let svc = service(&[(TLS_LABEL, "maybe")]);
        assert!(tls_mode(&svc, 443).is_err());
    }
}

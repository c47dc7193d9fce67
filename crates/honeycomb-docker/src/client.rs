use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use bytes::{Buf, Bytes};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

use crate::DockerError;

/// A swarm service as reported by the Docker API.
///
/// Only the fields the inspector needs are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Service {
    #[serde(rename = "Spec", default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSpec {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
    #[serde(rename = "TaskTemplate", default)]
    pub task_template: TaskTemplate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskTemplate {
    #[serde(rename = "ContainerSpec", default)]
    pub container_spec: ContainerSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerSpec {
    #[serde(rename = "Image", default)]
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageInspect {
    #[serde(rename = "Config", default)]
    pub config: ImageConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "ExposedPorts", default)]
    pub exposed_ports: HashMap<String, serde_json::Value>,
}

impl ImageInspect {
    /// The TCP ports the image exposes, as decimal strings.
    pub fn exposed_tcp_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self
            .config
            .exposed_ports
            .keys()
            .filter_map(|key| key.strip_suffix("/tcp"))
            .map(str::to_string)
            .collect();
        ports.sort();
        ports
    }
}

enum DockerHost {
    Unix(PathBuf),
    Tcp(String),
}

/// A minimal Docker Engine API client.
///
/// Speaks HTTP/1.1 over the daemon's unix socket (the default) or a TCP
/// address taken from `DOCKER_HOST`.
pub struct DockerClient {
    host: DockerHost,
}

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

impl DockerClient {
    /// Build a client from a `DOCKER_HOST`-style address.
    pub fn new(host: &str) -> Result<Self, DockerError> {
        let host = if let Some(path) = host.strip_prefix("unix://") {
            DockerHost::Unix(PathBuf::from(path))
        } else if let Some(addr) = host.strip_prefix("tcp://") {
            DockerHost::Tcp(addr.to_string())
        } else {
            return Err(DockerError::UnsupportedHost(host.to_string()));
        };

        Ok(DockerClient { host })
    }

    /// Build a client from the `DOCKER_HOST` environment variable, falling
    /// back to the default unix socket.
    pub fn from_env() -> Result<Self, DockerError> {
        match std::env::var("DOCKER_HOST") {
            Ok(host) if !host.is_empty() => Self::new(&host),
            _ => Self::new(&format!("unix://{DEFAULT_SOCKET}")),
        }
    }

    /// List the swarm services carrying the given label.
    pub async fn list_services(&self, label: &str) -> Result<Vec<Service>, DockerError> {
        let filters = format!(r#"{{"label":["{label}"]}}"#);
        let path = format!("/services?filters={}", percent_encode(&filters));
        let body = self.get(&path).await?;
        Ok(serde_json::from_reader(body.reader())?)
    }

    /// Inspect an image by name.
    pub async fn inspect_image(&self, image: &str) -> Result<ImageInspect, DockerError> {
        let path = format!("/images/{}/json", percent_encode(image));
        let body = self.get(&path).await?;
        Ok(serde_json::from_reader(body.reader())?)
    }

    /// Ping the daemon.
    pub async fn ping(&self) -> Result<(), DockerError> {
        self.get("/_ping").await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, DockerError> {
        debug!(path, "docker api request");

        match &self.host {
            DockerHost::Unix(socket) => {
                let stream = UnixStream::connect(socket)
                    .await
                    .map_err(DockerError::Connect)?;
                roundtrip(stream, path).await
            }
            DockerHost::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(DockerError::Connect)?;
                roundtrip(stream, path).await
            }
        }
    }
}

async fn roundtrip<S>(stream: S, path: &str) -> Result<Bytes, DockerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            debug!(%error, "docker api connection closed");
        }
    });

    let request = Request::get(path)
        .header(http::header::HOST, "docker")
        .body(Empty::<Bytes>::new())?;

    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();

    if status == StatusCode::OK {
        Ok(body)
    } else {
        Err(DockerError::Api {
            status,
            message: String::from_utf8_lossy(&body).trim().to_string(),
        })
    }
}

/// Percent-encode a query-string or path component.
fn percent_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());

    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                encoded.push(byte as char);
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }

    encoded
}

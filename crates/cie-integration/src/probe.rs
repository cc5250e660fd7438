//! 外部系统连通性探测

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use cie_core::{AuthenticationConfig, ExternalSystem, SystemType};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// 连通性探测接口，超时由调用方控制
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, system: &ExternalSystem) -> Result<()>;
}

/// 基于网络的探测：HTTP类系统发GET请求，套接字类系统建立TCP连接，文件系统检查路径
#[derive(Debug, Clone, Default)]
pub struct NetworkProbe {
    client: reqwest::Client,
}

impl NetworkProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加认证头
    fn add_auth_headers(
        request: reqwest::RequestBuilder,
        auth: &AuthenticationConfig,
    ) -> reqwest::RequestBuilder {
        match auth {
            AuthenticationConfig::None => request,
            AuthenticationConfig::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            AuthenticationConfig::ApiKey { key, header } => {
                let header_name = header.as_deref().unwrap_or("X-API-Key");
                request.header(header_name, key)
            }
            AuthenticationConfig::Bearer { token } => request.bearer_auth(token),
            AuthenticationConfig::OAuth2 { client_id, .. } => {
                request.header("X-Client-ID", client_id)
            }
            AuthenticationConfig::Certificate { .. } => {
                debug!("Certificate authentication is not applied to connectivity probes");
                request
            }
        }
    }

    async fn probe_http(&self, system: &ExternalSystem) -> Result<()> {
        let endpoint = system.configuration.endpoint.trim_end_matches('/');
        let url = match system.system_type {
            SystemType::Fhir => format!("{}/metadata", endpoint),
            _ => endpoint.to_string(),
        };

        let mut request = self.client.get(&url);
        for (name, value) in &system.configuration.headers {
            request = request.header(name, value);
        }
        let request = Self::add_auth_headers(request, &system.configuration.authentication);

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        if response.status().is_server_error() || response.status().is_client_error() {
            bail!("GET {} returned {}", url, response.status());
        }
        Ok(())
    }

    async fn probe_tcp(&self, system: &ExternalSystem) -> Result<()> {
        let address = socket_address(system)?;
        TcpStream::connect(&address)
            .await
            .with_context(|| format!("TCP connect to {} failed", address))?;
        Ok(())
    }

    async fn probe_file(&self, system: &ExternalSystem) -> Result<()> {
        let path = system.configuration.endpoint.trim_start_matches("file://");
        tokio::fs::metadata(path)
            .await
            .with_context(|| format!("path {} is not accessible", path))?;
        Ok(())
    }
}

#[async_trait]
impl ConnectivityProbe for NetworkProbe {
    async fn probe(&self, system: &ExternalSystem) -> Result<()> {
        debug!("Probing {} system {}", system.system_type, system.name);
        let result = match system.system_type {
            SystemType::Fhir | SystemType::RestApi => self.probe_http(system).await,
            SystemType::File => self.probe_file(system).await,
            SystemType::Hl7
            | SystemType::Database
            | SystemType::Mqtt
            | SystemType::Dicom
            | SystemType::Websocket => self.probe_tcp(system).await,
        };
        if let Err(e) = &result {
            warn!("Probe of {} failed: {:#}", system.name, e);
        }
        result
    }
}

/// 由endpoint和port推导 `host:port`
///
/// endpoint可带协议前缀与路径；endpoint内的端口优先于配置端口。
pub fn socket_address(system: &ExternalSystem) -> Result<String> {
    let endpoint = system.configuration.endpoint.trim();
    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, endpoint),
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        bail!("endpoint {} has no host", endpoint);
    }

    if let Some((host, port)) = authority.rsplit_once(':') {
        if !host.is_empty() && port.parse::<u16>().is_ok() {
            return Ok(authority.to_string());
        }
    }

    let port = system
        .configuration
        .port
        .or(match scheme.as_deref() {
            Some("ws") | Some("http") => Some(80),
            Some("wss") | Some("https") => Some(443),
            _ => None,
        })
        .ok_or_else(|| anyhow!("no port configured for {}", system.name))?;
    Ok(format!("{}:{}", authority, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cie_core::{RegisterSystemRequest, SystemConfiguration};
    use tokio::net::TcpListener;

    fn system(system_type: SystemType, endpoint: &str, port: Option<u16>) -> ExternalSystem {
        ExternalSystem::new(RegisterSystemRequest {
            name: "probe-target".to_string(),
            system_type,
            vendor: "test".to_string(),
            version: "1".to_string(),
            configuration: SystemConfiguration {
                endpoint: endpoint.to_string(),
                protocol: "tcp".to_string(),
                port,
                authentication: AuthenticationConfig::None,
                timeout: 1000,
                retry_attempts: 0,
                retry_delay: 0,
                batch_size: None,
                headers: Default::default(),
                mapping: Default::default(),
                validation: Default::default(),
            },
        })
    }

    #[test]
    fn test_socket_address_resolution() {
        assert_eq!(
            socket_address(&system(SystemType::Hl7, "10.0.0.12", Some(2575))).unwrap(),
            "10.0.0.12:2575"
        );
        assert_eq!(
            socket_address(&system(SystemType::Mqtt, "mqtt://broker:1883/topic", Some(9999))).unwrap(),
            "broker:1883"
        );
        assert_eq!(
            socket_address(&system(SystemType::Websocket, "wss://feed.example.org/live", None)).unwrap(),
            "feed.example.org:443"
        );
        assert!(socket_address(&system(SystemType::Database, "db.local", None)).is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = NetworkProbe::new();
        let target = system(SystemType::Hl7, "127.0.0.1", Some(port));
        assert!(probe.probe(&target).await.is_ok());

        drop(listener);
        let missing = system(SystemType::File, "/definitely/not/here", None);
        assert!(probe.probe(&missing).await.is_err());
    }
}

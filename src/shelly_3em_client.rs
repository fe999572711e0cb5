use crate::config::{CustomScript, DeviceConfig};
use crate::digest_auth::{DigestChallenge, DIGEST_USERNAME};
use crate::error::ShellyError;
use crate::shelly_types::{
    CustomScriptData, EnergyPayload, ShellyEMDataStatus, ShellyEMStatus, ShellySysConfig,
};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

// RPC endpoints are documented here
// https://shelly-api-docs.shelly.cloud/gen2/ComponentsAndServices/EM
pub const SYS_GET_CONFIG: &str = "/rpc/Sys.GetConfig";
pub const EM_GET_STATUS: &str = "/rpc/EM.GetStatus?id=0";
pub const EMDATA_GET_STATUS: &str = "/rpc/EMData.GetStatus?id=0";

/// Request target as sent: percent-encoded path plus query.
fn digest_uri(url: &reqwest::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

pub fn custom_script_path(script: &CustomScript) -> String {
    format!("/script/{}/{}", script.id, script.endpoint)
}

/// The two data sources a poll cycle reads from.
#[async_trait]
pub trait MeterApi: Send + Sync {
    /// Instant telemetry (`EM.GetStatus`).
    async fn em_status(&self) -> Result<ShellyEMStatus, ShellyError>;

    /// Cumulative energy, from `EMData.GetStatus` or the configured custom script.
    async fn energy_payload(&self) -> Result<EnergyPayload, ShellyError>;
}

/// HTTP client for one Shelly Pro 3EM.
///
/// Every call is a single logical request bounded by the device timeout. Nothing is retried;
/// the poll loop's next tick is the retry.
pub struct Shelly3EMClient {
    device: DeviceConfig,
    client: reqwest::Client,
}

impl Shelly3EMClient {
    pub fn new(device: DeviceConfig) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { device, client }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.device.ip, path)
    }

    /// Fetches `path` and decodes the JSON body as `T`.
    pub async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ShellyError> {
        let url = self.url(path);
        let timeout = self.device.timeout;

        let result = match tokio::time::timeout(timeout, self.request_json(&url)).await {
            Ok(result) => result,
            Err(_) => Err(ShellyError::Timeout(timeout)),
        };
        if let Err(e) = &result {
            debug!(
                "[{}] Failed to fetch or parse JSON from {}: {}",
                self.device.name, url, e
            );
        }
        result
    }

    async fn request_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ShellyError> {
        let response = self.send(url).await?;
        let status = response.status();
        debug!("[{}] Response status: {}", self.device.name, status);

        let body = response
            .text()
            .await
            .map_err(|source| ShellyError::Request {
                url: url.to_string(),
                source,
            })?;

        if !status.is_success() {
            return Err(ShellyError::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| ShellyError::Parse {
            url: url.to_string(),
            source,
        })
    }

    /// Plain GET, answered with a digest handshake when the device asks for one and we hold
    /// a password.
    async fn send(&self, url: &str) -> Result<reqwest::Response, ShellyError> {
        let map_err = |source| ShellyError::Request {
            url: url.to_string(),
            source,
        };
        // The digest must cover the request target exactly as sent
        let target = reqwest::Url::parse(url).map_err(|e| ShellyError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(map_err)?;

        let Some(password) = self.device.password.as_deref() else {
            return Ok(response);
        };
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let challenge = match response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
        {
            Some(header) => DigestChallenge::parse(header)?,
            None => return Ok(response),
        };

        let authorization =
            challenge.authorization(DIGEST_USERNAME, password, "GET", &digest_uri(&target));
        self.client
            .get(target)
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(map_err)
    }

    pub async fn sys_config(&self) -> Result<ShellySysConfig, ShellyError> {
        self.fetch_json(SYS_GET_CONFIG).await
    }

    pub async fn em_status(&self) -> Result<ShellyEMStatus, ShellyError> {
        self.fetch_json(EM_GET_STATUS).await
    }

    pub async fn em_data_status(&self) -> Result<ShellyEMDataStatus, ShellyError> {
        self.fetch_json(EMDATA_GET_STATUS).await
    }

    pub async fn custom_script_data(
        &self,
        script: &CustomScript,
    ) -> Result<CustomScriptData, ShellyError> {
        self.fetch_json(&custom_script_path(script)).await
    }
}

#[async_trait]
impl MeterApi for Shelly3EMClient {
    async fn em_status(&self) -> Result<ShellyEMStatus, ShellyError> {
        Shelly3EMClient::em_status(self).await
    }

    async fn energy_payload(&self) -> Result<EnergyPayload, ShellyError> {
        match &self.device.custom_script {
            Some(script) => self
                .custom_script_data(script)
                .await
                .map(EnergyPayload::CustomScript),
            None => self.em_data_status().await.map(EnergyPayload::Standard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::device_with;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server, tweak: impl FnOnce(&mut DeviceConfig)) -> Shelly3EMClient {
        let host = server.host_with_port();
        Shelly3EMClient::new(device_with(|d| {
            d.ip = host;
            tweak(d);
        }))
    }

    #[tokio::test]
    async fn test_em_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rpc/EM.GetStatus?id=0")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{ "id": 0, "a_voltage": 230.1, "total_act_power": 1234.5 }"#)
            .create_async()
            .await;

        let client = client_for(&server, |_| {});
        let status = client.em_status().await.unwrap();

        assert_eq!(status.a_voltage, Some(230.1));
        assert_eq!(status.total_act_power, Some(1234.5));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rpc/Sys.GetConfig")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let client = client_for(&server, |_| {});
        let err = client.sys_config().await.unwrap_err();

        assert!(err.is_unauthorized());
        match err {
            ShellyError::Http { status, body, url } => {
                assert_eq!(status, 401);
                assert_eq!(body, "Unauthorized");
                assert!(url.ends_with("/rpc/Sys.GetConfig"));
            }
            other => panic!("Expected HTTP error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rpc/EMData.GetStatus?id=0")
            .with_status(200)
            .with_body("{ not json")
            .create_async()
            .await;

        let client = client_for(&server, |_| {});
        let err = client.em_data_status().await.unwrap_err();
        assert!(matches!(err, ShellyError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_device_is_request_error() {
        // Nothing listens on port 1 of localhost
        let client = Shelly3EMClient::new(device_with(|d| d.ip = "127.0.0.1:1".to_string()));
        let err = client.em_status().await.unwrap_err();
        assert!(matches!(err, ShellyError::Request { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_energy_payload_uses_custom_script() {
        let mut server = mockito::Server::new_async().await;
        let script_mock = server
            .mock("GET", "/script/3/energy")
            .with_status(200)
            .with_body(r#"{ "energyWh": 12.34, "retEnergyWh": 1.5 }"#)
            .create_async()
            .await;
        let standard_mock = server
            .mock("GET", "/rpc/EMData.GetStatus?id=0")
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server, |d| {
            d.custom_script = Some(CustomScript {
                id: 3,
                endpoint: "energy".to_string(),
                energy_key: "energyWh".to_string(),
                return_energy_key: "retEnergyWh".to_string(),
            })
        });

        match client.energy_payload().await.unwrap() {
            EnergyPayload::CustomScript(data) => {
                assert_eq!(data.get("energyWh").and_then(|v| v.as_f64()), Some(12.34))
            }
            other => panic!("Expected custom script payload, got {other:?}"),
        }
        script_mock.assert_async().await;
        standard_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_energy_payload_uses_emdata_by_default() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rpc/EMData.GetStatus?id=0")
            .with_status(200)
            .with_body(r#"{ "id": 0, "total_act": 4321.0 }"#)
            .create_async()
            .await;

        let client = client_for(&server, |_| {});
        match client.energy_payload().await.unwrap() {
            EnergyPayload::Standard(data) => assert_eq!(data.total_act, Some(4321.0)),
            other => panic!("Expected standard payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_digest_handshake() {
        let mut server = mockito::Server::new_async().await;
        let challenge_mock = server
            .mock("GET", "/rpc/EM.GetStatus?id=0")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_header(
                "www-authenticate",
                r#"Digest qop="auth", realm="shellypro3em-test", nonce="12345", algorithm=SHA-256"#,
            )
            .create_async()
            .await;
        let authed_mock = server
            .mock("GET", "/rpc/EM.GetStatus?id=0")
            .match_header(
                "authorization",
                Matcher::Regex(
                    r#"^Digest username="admin", realm="shellypro3em-test", nonce="12345", uri="/rpc/EM.GetStatus\?id=0", algorithm=SHA-256, response="[0-9a-f]{64}", qop=auth, nc=00000001, cnonce="[0-9a-f]{16}"$"#
                        .to_string(),
                ),
            )
            .with_status(200)
            .with_body(r#"{ "id": 0, "total_act_power": 10.0 }"#)
            .create_async()
            .await;

        let client = client_for(&server, |d| d.password = Some("secret".to_string()));
        let status = client.em_status().await.unwrap();

        assert_eq!(status.total_act_power, Some(10.0));
        challenge_mock.assert_async().await;
        authed_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_digest_without_password() {
        let mut server = mockito::Server::new_async().await;
        let challenge_mock = server
            .mock("GET", "/rpc/EM.GetStatus?id=0")
            .with_status(401)
            .with_header(
                "www-authenticate",
                r#"Digest qop="auth", realm="r", nonce="n", algorithm=SHA-256"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, |_| {});
        let err = client.em_status().await.unwrap_err();
        assert!(err.is_unauthorized());
        challenge_mock.assert_async().await;
    }

    #[test]
    fn test_custom_script_path() {
        let script = CustomScript {
            id: 7,
            endpoint: "totals".to_string(),
            energy_key: "e".to_string(),
            return_energy_key: "r".to_string(),
        };
        assert_eq!(custom_script_path(&script), "/script/7/totals");
    }

    #[test]
    fn test_digest_uri_is_percent_encoded() {
        let url = reqwest::Url::parse("http://10.0.0.2/script/1/my energy").unwrap();
        assert_eq!(digest_uri(&url), "/script/1/my%20energy");

        let url = reqwest::Url::parse("http://10.0.0.2/rpc/EM.GetStatus?id=0").unwrap();
        assert_eq!(digest_uri(&url), "/rpc/EM.GetStatus?id=0");
    }

    #[tokio::test]
    async fn test_digest_handshake_on_encoded_script_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let challenge_mock = server
            .mock("GET", "/script/1/my%20energy")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_header(
                "www-authenticate",
                r#"Digest qop="auth", realm="shellypro3em-test", nonce="12345", algorithm=SHA-256"#,
            )
            .create_async()
            .await;
        let authed_mock = server
            .mock("GET", "/script/1/my%20energy")
            .match_header(
                "authorization",
                Matcher::Regex(r#"uri="/script/1/my%20energy""#.to_string()),
            )
            .with_status(200)
            .with_body(r#"{ "e": 1.5 }"#)
            .create_async()
            .await;

        let script = CustomScript {
            id: 1,
            endpoint: "my energy".to_string(),
            energy_key: "e".to_string(),
            return_energy_key: "r".to_string(),
        };
        let client = client_for(&server, |d| d.password = Some("secret".to_string()));
        let data = client.custom_script_data(&script).await.unwrap();

        assert_eq!(data.get("e").and_then(|v| v.as_f64()), Some(1.5));
        challenge_mock.assert_async().await;
        authed_mock.assert_async().await;
    }
}

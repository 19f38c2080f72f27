//! Thin client for Caddy's admin API, limited to the `apps.http.servers` table.

use crate::error::ProxyError;
use crate::registry::ProxyRecord;
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode, header};
use hyper_tls::HttpsConnector;
use log::{debug, info, trace, warn};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

pub const SERVERS_PATH: &str = "/config/apps/http/servers";
const CONFIG_ROOT: &str = "/config/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Caddy answers a read of a config path that does not exist with this in the error body.
const PATH_NOT_FOUND: &str = "path not found";

/// A response from the admin API, body already collected.
#[derive(Debug)]
struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    fn is_missing_path(&self) -> bool {
        self.status == StatusCode::NOT_FOUND || (!self.status.is_success() && self.body.contains(PATH_NOT_FOUND))
    }

    fn into_remote_error(self, method: &Method, path: &str) -> ProxyError {
        ProxyError::Remote { method: method.to_string(), path: path.to_string(), status: self.status.as_u16(), body: self.body }
    }
}

/// What can be recovered from a live server block that was not created by us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteServer {
    pub hostname: String,
    pub port: u16,
    pub target: String,
}

impl RemoteServer {
    /// Hostname from the first host matcher, port from the first listen address and
    /// target from the first upstream dial. `None` if any of them is missing.
    pub fn parse(server: &Value) -> Option<Self> {
        let listen = server.get("listen")?.as_array()?.first()?.as_str()?;
        let port = listen.rsplit(':').next()?.parse().ok()?;

        let routes = server.get("routes")?.as_array()?;
        let mut hostname = None;
        let mut target = None;
        for route in routes {
            if hostname.is_none() {
                hostname = route
                    .get("match")
                    .and_then(Value::as_array)
                    .and_then(|m| m.iter().find_map(|m| m.get("host")?.as_array()?.first()?.as_str()))
                    .map(str::to_string);
            }
            if target.is_none() {
                target = route.get("handle").and_then(Value::as_array).and_then(|handlers| {
                    handlers
                        .iter()
                        .filter(|h| h.get("handler").and_then(Value::as_str) == Some("reverse_proxy"))
                        .find_map(|h| h.get("upstreams")?.as_array()?.first()?.get("dial")?.as_str())
                        .map(str::to_string)
                });
            }
        }
        Some(Self { hostname: hostname?, port, target: target? })
    }
}

#[derive(Clone)]
pub struct CaddyClient {
    base_url: String,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl CaddyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let https = HttpsConnector::new();
        let client: Client<_, Body> = Client::builder().build::<_, Body>(https);
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse, ProxyError> {
        let uri = format!("{}{}", self.base_url, path);
        let mut builder = Request::builder().method(method.clone()).uri(&uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(value)?)
            }
            None => Body::empty(),
        };
        let request = builder.body(body)?;

        trace!("caddy API request: {} {}", method, uri);
        let exchange = async {
            let mut response = self.client.request(request).await?;
            let status = response.status();
            let bytes = to_bytes(response.body_mut()).await?;
            Ok::<_, hyper::Error>(ApiResponse { status, body: String::from_utf8_lossy(&bytes).into_owned() })
        };
        let response = tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| ProxyError::Timeout { method: method.to_string(), path: path.to_string() })??;
        debug!("caddy API {} {} -> {}", method, path, response.status);
        Ok(response)
    }

    /// The live server table. A missing `apps.http.servers` path, `null` and `{}` all
    /// mean "no servers"; any other failure is an error.
    pub async fn list_servers(&self) -> Result<BTreeMap<String, Value>, ProxyError> {
        let response = self.send(Method::GET, SERVERS_PATH, None).await?;
        if response.is_missing_path() {
            debug!("caddy has no http servers configured yet");
            return Ok(BTreeMap::new());
        }
        if !response.status.is_success() {
            return Err(response.into_remote_error(&Method::GET, SERVERS_PATH));
        }
        if response.body.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let servers: Option<BTreeMap<String, Value>> = serde_json::from_str(&response.body)?;
        Ok(servers.unwrap_or_default())
    }

    /// Make sure `apps.http.servers` exists so slots can be written below it.
    pub async fn ensure_servers_path(&self) -> Result<(), ProxyError> {
        let response = self.send(Method::GET, CONFIG_ROOT, None).await?;
        let root = if response.is_missing_path() {
            Value::Null
        } else if response.status.is_success() {
            match response.body.trim() {
                "" => Value::Null,
                body => serde_json::from_str(body)?,
            }
        } else {
            return Err(response.into_remote_error(&Method::GET, CONFIG_ROOT));
        };

        if root.pointer("/apps/http/servers").is_some_and(Value::is_object) {
            trace!("caddy servers path already present");
            return Ok(());
        }

        let (method, merged) = match root {
            Value::Null => (Method::POST, json!({ "apps": { "http": { "servers": {} } } })),
            Value::Object(map) => (Method::PATCH, Value::Object(with_servers_path(map))),
            other => {
                warn!("caddy config root is not an object ({}), replacing it", other);
                (Method::POST, json!({ "apps": { "http": { "servers": {} } } }))
            }
        };

        info!("Creating apps.http.servers in caddy config");
        let response = self.send(method.clone(), CONFIG_ROOT, Some(&merged)).await?;
        if !response.status.is_success() {
            return Err(response.into_remote_error(&method, CONFIG_ROOT));
        }
        Ok(())
    }

    /// Write a server slot: PATCH replaces an existing one, PUT creates a new one.
    pub async fn upsert_server(&self, name: &str, config: &Value) -> Result<(), ProxyError> {
        let path = format!("{}/{}", SERVERS_PATH, name);
        let response = self.send(Method::PATCH, &path, Some(config)).await?;
        if response.status.is_success() {
            debug!("Updated caddy server {}", name);
            return Ok(());
        }
        if !response.is_missing_path() {
            return Err(response.into_remote_error(&Method::PATCH, &path));
        }
        debug!("Caddy server {} does not exist yet, creating it", name);

        let response = self.send(Method::PUT, &path, Some(config)).await?;
        if !response.status.is_success() {
            return Err(response.into_remote_error(&Method::PUT, &path));
        }
        debug!("Created caddy server {}", name);
        Ok(())
    }

    /// Remove a server slot. A slot that does not exist is already removed.
    pub async fn delete_server(&self, name: &str) -> Result<(), ProxyError> {
        let path = format!("{}/{}", SERVERS_PATH, name);
        let response = self.send(Method::DELETE, &path, None).await?;
        if response.status.is_success() {
            debug!("Deleted caddy server {}", name);
            return Ok(());
        }
        if response.is_missing_path() {
            debug!("caddy server {} was not configured", name);
            return Ok(());
        }
        Err(response.into_remote_error(&Method::DELETE, &path))
    }

    /// The server block routing `record.hostname` on `record.port` to its upstream.
    pub fn server_config(record: &ProxyRecord) -> Value {
        json!({
            "listen": [format!(":{}", record.port)],
            "routes": [{
                "match": [{ "host": [record.hostname] }],
                "handle": [{
                    "handler": "reverse_proxy",
                    "upstreams": [{ "dial": record.target }]
                }],
                "terminal": true
            }]
        })
    }
}

fn with_servers_path(mut root: Map<String, Value>) -> Map<String, Value> {
    let apps = root.entry("apps").or_insert_with(|| json!({}));
    if !apps.is_object() {
        *apps = json!({});
    }
    if let Some(apps) = apps.as_object_mut() {
        let http = apps.entry("http").or_insert_with(|| json!({}));
        if !http.is_object() {
            *http = json!({});
        }
        if let Some(http) = http.as_object_mut() {
            let servers = http.entry("servers").or_insert_with(|| json!({}));
            if !servers.is_object() {
                *servers = json!({});
            }
        }
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::testing::MockCaddy;

    #[tokio::test]
    async fn test_list_servers_missing_path() {
        let caddy = MockCaddy::fixed(404, r#"{"error":"loading config path \"/apps/http/servers\": path not found"}"#).await;
        let client = CaddyClient::new(caddy.url());
        assert!(client.list_servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_servers_null() {
        let caddy = MockCaddy::fixed(200, "null").await;
        let client = CaddyClient::new(caddy.url());
        assert!(client.list_servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_servers_empty_object() {
        let caddy = MockCaddy::fixed(200, "{}").await;
        let client = CaddyClient::new(caddy.url());
        assert!(client.list_servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_servers_path_not_found_in_other_status() {
        let caddy = MockCaddy::fixed(400, r#"{"error":"path not found"}"#).await;
        let client = CaddyClient::new(caddy.url());
        assert!(client.list_servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_servers_real_error() {
        let caddy = MockCaddy::fixed(500, r#"{"error":"internal server error"}"#).await;
        let client = CaddyClient::new(caddy.url());
        let result = client.list_servers().await;
        assert!(matches!(result, Err(ProxyError::Remote { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_ensure_path_on_empty_config() {
        let caddy = MockCaddy::new().await;
        let client = CaddyClient::new(caddy.url());

        client.ensure_servers_path().await.unwrap();
        assert_eq!(caddy.config(), json!({ "apps": { "http": { "servers": {} } } }));
        assert!(caddy.requests().iter().any(|r| r.method == "POST" && r.path == CONFIG_ROOT));

        // Already present: read only
        let before = caddy.requests().len();
        client.ensure_servers_path().await.unwrap();
        let after = caddy.requests();
        assert_eq!(after.len(), before + 1);
        assert_eq!(after[before].method, "GET");
    }

    #[tokio::test]
    async fn test_ensure_path_keeps_other_config() {
        let caddy = MockCaddy::with_config(json!({ "admin": { "listen": "localhost:2019" }, "apps": { "tls": {} } })).await;
        let client = CaddyClient::new(caddy.url());

        client.ensure_servers_path().await.unwrap();
        let config = caddy.config();
        assert_eq!(config["admin"]["listen"], "localhost:2019");
        assert!(config["apps"]["tls"].is_object());
        assert!(config["apps"]["http"]["servers"].is_object());
        assert!(caddy.requests().iter().any(|r| r.method == "PATCH" && r.path == CONFIG_ROOT));
    }

    #[tokio::test]
    async fn test_upsert_creates_then_replaces() {
        let caddy = MockCaddy::with_config(json!({ "apps": { "http": { "servers": {} } } })).await;
        let client = CaddyClient::new(caddy.url());
        let mut record = ProxyRecord::new("web", "web.example.com", 8443, "localhost:9091");

        client.upsert_server("srv0", &CaddyClient::server_config(&record)).await.unwrap();
        let methods: Vec<String> = caddy.requests().into_iter().map(|r| r.method).collect();
        assert_eq!(methods, vec!["PATCH", "PUT"]);

        record.target = "localhost:9092".to_string();
        client.upsert_server("srv0", &CaddyClient::server_config(&record)).await.unwrap();
        assert_eq!(caddy.requests().len(), 3);

        let servers = client.list_servers().await.unwrap();
        assert_eq!(servers["srv0"]["routes"][0]["handle"][0]["upstreams"][0]["dial"], "localhost:9092");
    }

    #[tokio::test]
    async fn test_upsert_rejected_config_is_not_retried() {
        let caddy = MockCaddy::fixed(400, r#"{"error":"unknown handler"}"#).await;
        let client = CaddyClient::new(caddy.url());
        let record = ProxyRecord::new("web", "web.example.com", 8443, "localhost:9091");

        let err = client.upsert_server("srv0", &CaddyClient::server_config(&record)).await.unwrap_err();
        assert!(matches!(err, ProxyError::Remote { ref method, status: 400, .. } if method == "PATCH"));
        let methods: Vec<String> = caddy.requests().into_iter().map(|r| r.method).collect();
        assert_eq!(methods, vec!["PATCH"]);
    }

    #[tokio::test]
    async fn test_delete_missing_server_is_ok() {
        let caddy = MockCaddy::new().await;
        let client = CaddyClient::new(caddy.url());
        client.delete_server("srv7").await.unwrap();

        let caddy = MockCaddy::fixed(500, "boom").await;
        let client = CaddyClient::new(caddy.url());
        assert!(client.delete_server("srv7").await.is_err());
    }

    #[test]
    fn test_server_config_shape() {
        let record = ProxyRecord::new("web", "web.example.com", 8443, "localhost:9091");
        let config = CaddyClient::server_config(&record);
        assert_eq!(config["listen"][0], ":8443");
        assert_eq!(config["routes"][0]["match"][0]["host"][0], "web.example.com");
        assert_eq!(config["routes"][0]["handle"][0]["handler"], "reverse_proxy");
        assert_eq!(config["routes"][0]["terminal"], true);

        let parsed = RemoteServer::parse(&config).unwrap();
        assert_eq!(parsed, RemoteServer { hostname: "web.example.com".into(), port: 8443, target: "localhost:9091".into() });
    }

    #[test]
    fn test_parse_foreign_server() {
        let server = json!({
            "listen": ["0.0.0.0:9000"],
            "routes": [
                { "handle": [{ "handler": "static_response", "body": "hi" }] },
                {
                    "match": [{ "path": ["/api"] }, { "host": ["api.example.com", "www.example.com"] }],
                    "handle": [{ "handler": "reverse_proxy", "upstreams": [{ "dial": "10.0.0.5:3000" }] }]
                }
            ]
        });
        let parsed = RemoteServer::parse(&server).unwrap();
        assert_eq!(parsed.hostname, "api.example.com");
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.target, "10.0.0.5:3000");

        assert!(RemoteServer::parse(&json!({ "listen": [":80"], "routes": [] })).is_none());
        assert!(RemoteServer::parse(&json!({})).is_none());
    }
}

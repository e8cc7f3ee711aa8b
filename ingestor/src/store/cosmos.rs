use super::credential::{CredentialChain, TokenSource};
use super::{document_id, DocumentStore};
use crate::config::CosmosConfig;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-12-31";
const USER_AGENT: &str = concat!("telemetry-ingestor/", env!("CARGO_PKG_VERSION"));

// unreserved characters stay as-is in the authorization header
const AUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub enum CosmosCredential {
    MasterKey(Vec<u8>),
    Aad {
        source: Box<dyn TokenSource>,
        scope: String,
    },
}

impl CosmosCredential {
    pub fn master_key(key: &str) -> Result<Self> {
        let key = STANDARD
            .decode(key.trim())
            .map_err(|e| Error::Credential(format!("account key is not valid base64: {}", e)))?;
        Ok(CosmosCredential::MasterKey(key))
    }

    pub fn aad(source: Box<dyn TokenSource>, account_endpoint: &str) -> Self {
        CosmosCredential::Aad {
            source,
            scope: token_scope(account_endpoint),
        }
    }
}

pub struct CosmosStore {
    client: Client,
    endpoint: String,
    credential: CosmosCredential,
}

impl CosmosStore {
    pub fn new(config: &CosmosConfig) -> Result<Self> {
        if config.accept_invalid_certs {
            warn!("TLS certificate validation is disabled for the Cosmos DB endpoint");
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        let credential = match &config.account_key {
            Some(key) => {
                info!("Using account key authentication for Cosmos DB");
                CosmosCredential::master_key(key)?
            }
            None => {
                info!("Using Azure AD authentication for Cosmos DB");
                let chain = CredentialChain::azure_default(config.client_id.as_deref())?;
                CosmosCredential::aad(Box::new(chain), &config.account_endpoint)
            }
        };

        Ok(Self::with_client(client, &config.account_endpoint, credential))
    }

    pub fn with_client(client: Client, endpoint: &str, credential: CosmosCredential) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential,
        }
    }

    async fn authorization(
        &self,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> Result<String> {
        let raw = match &self.credential {
            CosmosCredential::MasterKey(key) => {
                let signature = master_key_signature(key, verb, resource_type, resource_link, date)?;
                format!("type=master&ver=1.0&sig={}", signature)
            }
            CosmosCredential::Aad { source, scope } => {
                format!("type=aad&ver=1.0&sig={}", source.token(scope).await?)
            }
        };
        Ok(utf8_percent_encode(&raw, AUTH_ENCODE_SET).to_string())
    }

    async fn send(
        &self,
        method: Method,
        url_path: &str,
        resource_type: &str,
        resource_link: &str,
        body: Option<&Value>,
        partition_key: Option<&str>,
    ) -> Result<Response> {
        let date = rfc1123_now();
        let authorization = self
            .authorization(method.as_str(), resource_type, resource_link, &date)
            .await?;

        let mut request = self
            .client
            .request(method, format!("{}/{}", self.endpoint, url_path))
            .header("authorization", authorization)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION);

        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(key) = partition_key {
            request = request
                .header("x-ms-documentdb-partitionkey", serde_json::to_string(&[key])?)
                .header("x-ms-documentdb-is-upsert", "False");
        }

        request.send().await.map_err(classify_transport_error)
    }

    // Read first: data-plane roles may read databases and containers but
    // never create them. Empty parent for a database.
    async fn create_if_absent(
        &self,
        parent_link: &str,
        parent_path: &str,
        resource_type: &str,
        name: &str,
        body: &Value,
    ) -> Result<()> {
        let create_path = child(parent_path, resource_type);
        let read_path = format!("{}/{}", create_path, encode_segment(name));
        let read_link = format!("{}/{}", child(parent_link, resource_type), name);

        let response = self
            .send(Method::GET, &read_path, resource_type, &read_link, None, None)
            .await?;
        match response.status() {
            status if status.is_success() => {
                debug!("{} '{}' already exists", resource_type, name);
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            _ => return Err(error_from_response(response, name).await),
        }

        let response = self
            .send(Method::POST, &create_path, resource_type, parent_link, Some(body), None)
            .await?;
        match response.status() {
            StatusCode::CONFLICT => Ok(()),
            status if status.is_success() => {
                info!("Created {} '{}'", resource_type, name);
                Ok(())
            }
            _ => Err(error_from_response(response, name).await),
        }
    }
}

#[async_trait]
impl DocumentStore for CosmosStore {
    async fn ensure_database(&self, database: &str) -> Result<()> {
        self.create_if_absent("", "", "dbs", database, &json!({ "id": database }))
            .await
    }

    async fn ensure_container(
        &self,
        database: &str,
        container: &str,
        partition_key_path: &str,
    ) -> Result<()> {
        let body = json!({
            "id": container,
            "partitionKey": {
                "paths": [partition_key_path],
                "kind": "Hash",
                "version": 2
            }
        });

        self.create_if_absent(
            &format!("dbs/{}", database),
            &format!("dbs/{}", encode_segment(database)),
            "colls",
            container,
            &body,
        )
        .await
    }

    async fn create_item(
        &self,
        database: &str,
        container: &str,
        partition_key: &str,
        document: &Value,
    ) -> Result<()> {
        let id = document_id(document)?;
        let url_path = format!(
            "dbs/{}/colls/{}/docs",
            encode_segment(database),
            encode_segment(container)
        );
        let resource_link = format!("dbs/{}/colls/{}", database, container);

        let response = self
            .send(
                Method::POST,
                &url_path,
                "docs",
                &resource_link,
                Some(document),
                Some(partition_key),
            )
            .await?;

        if response.status().is_success() {
            debug!("Created document {} in partition {}", id, partition_key);
            return Ok(());
        }

        Err(error_from_response(response, &format!("{}/{}", partition_key, id)).await)
    }
}

pub(crate) fn master_key_signature(
    key: &[u8],
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
) -> Result<String> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Credential(format!("invalid account key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn child(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}/{}", parent, segment)
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT_ENCODE_SET).to_string()
}

// data-plane scope is the account endpoint without the default port
fn token_scope(account_endpoint: &str) -> String {
    format!(
        "{}/.default",
        account_endpoint
            .trim_end_matches('/')
            .trim_end_matches(":443")
    )
}

fn classify_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else if err.is_connect() {
        Error::Connection(err.to_string())
    } else {
        Error::Http(err)
    }
}

async fn error_from_response(response: Response, context: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);

    classify_status(status, context, message)
}

fn classify_status(status: StatusCode, context: &str, message: String) -> Error {
    match status {
        StatusCode::CONFLICT => Error::Conflict(context.to_string()),
        StatusCode::TOO_MANY_REQUESTS => Error::Throttled,
        StatusCode::REQUEST_TIMEOUT => Error::Timeout,
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Error::Unavailable(format!("{}: {}", status, message)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(message),
        StatusCode::NOT_FOUND => Error::NotFound(format!("{}: {}", context, message)),
        _ => Error::Service {
            status: status.as_u16(),
            message,
        },
    }
}

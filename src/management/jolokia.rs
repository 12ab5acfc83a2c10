//! ActiveMQ Artemis management over Jolokia.
//!
//! Every operation is an `exec` (or `read`) request against the broker's
//! `ActiveMQServerControl` MBean. Artemis reports failures as HTTP 200 with a
//! Jolokia `status` of 500 and the original exception message, so failures are
//! classified from the `AMQ` message codes rather than from HTTP status.

use super::{
    BrokerConnector, BrokerEndpoint, BrokerManagement, ManagementError, ManagementResult,
    QueueSpec, SharedManagement,
};
use crate::model::{AddressInfo, AddressSettings, ConnectionInfo, LinkInfo, QueueInfo, RoutingType};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const ALREADY_EXISTS_CODES: &[&str] = &["AMQ229204", "AMQ229019", "AMQ229033"];
const NOT_FOUND_CODES: &[&str] = &["AMQ229203", "AMQ229017", "AMQ229110"];
const LIST_OPTIONS: &str = r#"{"field":"","operation":"","value":""}"#;

#[derive(Debug, Serialize)]
struct JolokiaRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    mbean: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attribute: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    arguments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct JolokiaResponse {
    status: u16,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

/// Page of a `listX(options, page, pageSize)` result.
#[derive(Debug, Deserialize)]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    /// Total row count; some brokers leave it out.
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    count: Option<u64>,
}

/// Whether a paged listing has been read to the end.
fn listing_done(rows: usize, fetched: usize, count: Option<u64>, page_size: usize) -> bool {
    match count {
        Some(total) => fetched == 0 || rows as u64 >= total,
        None => fetched < page_size,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressRow {
    name: String,
    #[serde(default)]
    routing_types: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueRow {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    routing_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    durable: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    temporary: bool,
    #[serde(default, deserialize_with = "lenient_u64")]
    consumer_count: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    message_count: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    messages_added: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    messages_acked: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    delivering_count: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    messages_expired: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    messages_killed: u64,
}

impl From<QueueRow> for QueueInfo {
    fn from(row: QueueRow) -> Self {
        QueueInfo {
            name: row.name,
            address: row.address,
            routing_type: row.routing_type.and_then(|r| r.parse().ok()),
            durable: row.durable,
            temporary: row.temporary,
            consumer_count: row.consumer_count,
            message_count: row.message_count,
            messages_added: row.messages_added,
            messages_acked: row.messages_acked,
            delivering_count: row.delivering_count,
            messages_expired: row.messages_expired,
            messages_killed: row.messages_killed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectionRow {
    #[serde(rename = "connectionID")]
    connection_id: String,
    #[serde(default, rename = "remoteAddress")]
    remote_address: String,
    #[serde(default)]
    protocol: Option<String>,
}

/// Producer or consumer row; both carry the owning connection and an address.
#[derive(Debug, Deserialize)]
struct LinkRow {
    #[serde(rename = "connectionID")]
    connection_id: String,
    #[serde(default, alias = "destination")]
    address: Option<String>,
    #[serde(default)]
    queue: Option<String>,
}

impl LinkRow {
    fn target(self) -> Option<String> {
        self.address
            .filter(|a| !a.is_empty())
            .or(self.queue.filter(|q| !q.is_empty()))
    }
}

fn number_from(value: Value) -> Result<Option<u64>, String> {
    match value {
        Value::Number(n) => Ok(Some(
            n.as_u64()
                .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
                .unwrap_or(0),
        )),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse().map(Some).map_err(|e| format!("{e}")),
        Value::Null => Ok(None),
        other => Err(format!("expected number, got {other}")),
    }
}

/// Artemis list payloads encode most numbers and booleans as strings.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    number_from(Value::deserialize(deserializer)?)
        .map(Option::unwrap_or_default)
        .map_err(serde::de::Error::custom)
}

fn lenient_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    number_from(Value::deserialize(deserializer)?).map_err(serde::de::Error::custom)
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!("expected bool, got {other}"))),
    }
}

/// `"ANYCAST"`, `"ANYCAST,MULTICAST"` and `"[MULTICAST]"` all appear in the wild.
fn parse_routing_types(raw: &str) -> Vec<RoutingType> {
    let mut types: Vec<RoutingType> = raw
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter_map(|part| part.parse().ok())
        .collect();
    types.sort();
    types.dedup();
    types
}

/// Map a Jolokia error message onto the management error taxonomy.
fn classify_message(operation: &str, message: &str) -> ManagementError {
    let lowered = message.to_lowercase();
    if ALREADY_EXISTS_CODES.iter().any(|c| message.contains(c)) || lowered.contains("already exists")
    {
        ManagementError::AlreadyExists(message.to_string())
    } else if NOT_FOUND_CODES.iter().any(|c| message.contains(c))
        || lowered.contains("does not exist")
    {
        ManagementError::NotFound(message.to_string())
    } else {
        ManagementError::failed(operation, message)
    }
}

fn classify_response(operation: &str, response: JolokiaResponse) -> ManagementResult<Value> {
    if response.status == 200 {
        return Ok(response.value);
    }
    let message = match (response.error_type, response.error) {
        (_, Some(error)) => error,
        (Some(kind), None) => kind,
        (None, None) => format!("jolokia status {}", response.status),
    };
    Err(classify_message(operation, &message))
}

fn map_transport(operation: &str, err: &reqwest::Error) -> ManagementError {
    if err.is_timeout() {
        ManagementError::Timeout(format!("{operation}: {err}"))
    } else if err.is_connect() || err.is_request() {
        ManagementError::Connection(format!("{operation}: {err}"))
    } else {
        ManagementError::failed(operation, err.to_string())
    }
}

/// Jolokia returns list payloads and settings as JSON encoded inside a string.
fn decode_embedded<T: DeserializeOwned>(operation: &str, value: Value) -> ManagementResult<T> {
    let decoded = match value {
        Value::String(raw) => serde_json::from_str(&raw),
        other => serde_json::from_value(other),
    };
    decoded.map_err(|err| ManagementError::failed(operation, format!("undecodable payload: {err}")))
}

fn jolokia_url(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/jolokia") {
        format!("{trimmed}/")
    } else {
        format!("{trimmed}/jolokia/")
    }
}

/// HTTP client bound to one broker's server control MBean.
#[derive(Clone)]
pub struct JolokiaClient {
    http: reqwest::Client,
    url: String,
    mbean: String,
    page_size: usize,
    closed: Arc<AtomicBool>,
}

impl JolokiaClient {
    pub fn new(endpoint: &BrokerEndpoint) -> ManagementResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        // newer Artemis consoles reject Jolokia requests without an Origin
        if let Ok(origin) = reqwest::header::HeaderValue::from_str(&endpoint.url) {
            headers.insert(reqwest::header::ORIGIN, origin);
        }
        let http = reqwest::Client::builder()
            .timeout(endpoint.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| ManagementError::Connection(format!("client build failed: {err}")))?;
        Ok(Self {
            http,
            url: jolokia_url(&endpoint.url),
            mbean: format!(
                "org.apache.activemq.artemis:broker=\"{}\"",
                endpoint.broker_name
            ),
            page_size: endpoint.page_size.max(1),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn send(&self, operation: &str, request: &JolokiaRequest<'_>) -> ManagementResult<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ManagementError::Connection(format!(
                "{operation}: management connection closed"
            )));
        }
        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|err| map_transport(operation, &err))?;
        if !response.status().is_success() {
            return Err(ManagementError::failed(
                operation,
                format!("jolokia HTTP status {}", response.status()),
            ));
        }
        let parsed: JolokiaResponse = response
            .json()
            .await
            .map_err(|err| map_transport(operation, &err))?;
        classify_response(operation, parsed)
    }

    async fn exec(&self, signature: &str, arguments: Vec<Value>) -> ManagementResult<Value> {
        let operation = signature.split('(').next().unwrap_or(signature);
        tracing::debug!(operation, "jolokia exec");
        let request = JolokiaRequest {
            kind: "exec",
            mbean: &self.mbean,
            operation: Some(signature),
            attribute: None,
            arguments,
        };
        self.send(operation, &request).await
    }

    async fn read(&self, attribute: &str) -> ManagementResult<Value> {
        let request = JolokiaRequest {
            kind: "read",
            mbean: &self.mbean,
            operation: None,
            attribute: Some(attribute),
            arguments: Vec::new(),
        };
        self.send(attribute, &request).await
    }

    /// Broker version; doubles as the connection handshake.
    pub async fn version(&self) -> ManagementResult<String> {
        let value = self.read("Version").await?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn list_all<T: DeserializeOwned>(&self, name: &str) -> ManagementResult<Vec<T>> {
        let signature = format!("{name}(java.lang.String,int,int)");
        let mut rows = Vec::new();
        let mut page = 1u64;
        loop {
            let value = self
                .exec(
                    &signature,
                    vec![json!(LIST_OPTIONS), json!(page), json!(self.page_size)],
                )
                .await?;
            let batch: ListPage<T> = decode_embedded(name, value)?;
            let fetched = batch.data.len();
            rows.extend(batch.data);
            if listing_done(rows.len(), fetched, batch.count, self.page_size) {
                break;
            }
            page += 1;
        }
        Ok(rows)
    }
}

#[async_trait]
impl BrokerManagement for JolokiaClient {
    async fn list_addresses(&self) -> ManagementResult<Vec<AddressInfo>> {
        let rows: Vec<AddressRow> = self.list_all("listAddresses").await?;
        Ok(rows
            .into_iter()
            .map(|row| AddressInfo {
                routing_types: parse_routing_types(&row.routing_types),
                name: row.name,
            })
            .collect())
    }

    async fn list_queues(&self) -> ManagementResult<Vec<QueueInfo>> {
        let rows: Vec<QueueRow> = self.list_all("listQueues").await?;
        Ok(rows.into_iter().map(QueueInfo::from).collect())
    }

    async fn list_connections(&self) -> ManagementResult<Vec<ConnectionInfo>> {
        let (connections, producers, consumers) = tokio::try_join!(
            self.list_all::<ConnectionRow>("listConnections"),
            self.list_all::<LinkRow>("listProducers"),
            self.list_all::<LinkRow>("listConsumers"),
        )?;
        let mut by_id: HashMap<String, ConnectionInfo> = connections
            .into_iter()
            .map(|row| {
                let mut info = ConnectionInfo::new(row.connection_id.clone(), row.remote_address);
                info.protocol = row.protocol;
                (row.connection_id, info)
            })
            .collect();
        for producer in producers {
            let id = producer.connection_id.clone();
            if let (Some(conn), Some(address)) = (by_id.get_mut(&id), producer.target()) {
                conn.senders.push(LinkInfo { address });
            }
        }
        for consumer in consumers {
            let id = consumer.connection_id.clone();
            if let (Some(conn), Some(address)) = (by_id.get_mut(&id), consumer.target()) {
                conn.receivers.push(LinkInfo { address });
            }
        }
        let mut out: Vec<ConnectionInfo> = by_id.into_values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn create_address(&self, name: &str, routing: RoutingType) -> ManagementResult<()> {
        self.exec(
            "createAddress(java.lang.String,java.lang.String)",
            vec![json!(name), json!(routing.as_str())],
        )
        .await
        .map(drop)
    }

    async fn delete_address(&self, name: &str, force: bool) -> ManagementResult<()> {
        self.exec(
            "deleteAddress(java.lang.String,boolean)",
            vec![json!(name), json!(force)],
        )
        .await
        .map(drop)
    }

    async fn create_queue(&self, queue: &QueueSpec) -> ManagementResult<()> {
        self.exec(
            "createQueue(java.lang.String,java.lang.String,java.lang.String,java.lang.String,boolean,int,boolean,boolean)",
            vec![
                json!(queue.address),
                json!(queue.routing.as_str()),
                json!(queue.name),
                Value::Null,
                json!(queue.durable),
                json!(-1),
                json!(false),
                json!(false),
            ],
        )
        .await
        .map(drop)
    }

    async fn destroy_queue(&self, name: &str) -> ManagementResult<()> {
        self.exec(
            "destroyQueue(java.lang.String,boolean)",
            vec![json!(name), json!(true)],
        )
        .await
        .map(drop)
    }

    async fn add_address_settings(
        &self,
        address_match: &str,
        settings: &AddressSettings,
    ) -> ManagementResult<()> {
        let encoded = serde_json::to_string(settings)
            .map_err(|err| ManagementError::failed("addAddressSettings", err.to_string()))?;
        self.exec(
            "addAddressSettings(java.lang.String,java.lang.String)",
            vec![json!(address_match), json!(encoded)],
        )
        .await
        .map(drop)
    }

    async fn remove_address_settings(&self, address_match: &str) -> ManagementResult<()> {
        self.exec(
            "removeAddressSettings(java.lang.String)",
            vec![json!(address_match)],
        )
        .await
        .map(drop)
    }

    async fn default_max_size_bytes(&self) -> ManagementResult<Option<u64>> {
        let value = self
            .exec("getAddressSettingsAsJSON(java.lang.String)", vec![json!("#")])
            .await?;
        let settings: Value = decode_embedded("getAddressSettingsAsJSON", value)?;
        Ok(extract_max_size(&settings))
    }

    async fn close(&self) -> ManagementResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Artemis uses `-1` for "unbounded".
fn extract_max_size(settings: &Value) -> Option<u64> {
    let raw = settings.get("maxSizeBytes")?;
    let size = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    u64::try_from(size).ok().filter(|s| *s > 0)
}

/// Connects Jolokia clients, reading the broker version as the handshake.
#[derive(Debug, Clone, Default)]
pub struct JolokiaConnector;

#[async_trait]
impl BrokerConnector for JolokiaConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> ManagementResult<SharedManagement> {
        let client = JolokiaClient::new(endpoint)?;
        let version = client.version().await?;
        tracing::info!(url = %endpoint.url, broker = %endpoint.broker_name, %version, "connected to broker management");
        Ok(Arc::new(client))
    }
}

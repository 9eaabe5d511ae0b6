//! A small message-based service host, and the operations it answers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{Method, Response, StatusCode};
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use service_client::Operation;

use super::server::{self, Server};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCustomer {
    pub customer_id: i32,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct GetCustomerResponse {
    pub customer: Customer,
    pub created: u64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Customer {
    pub id: i32,
}

impl Operation for GetCustomer {
    type Response = GetCustomerResponse;
    const NAME: &'static str = "GetCustomer";
}

#[derive(Debug, Serialize)]
pub struct FindCustomers {
    pub ids: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FindCustomersResponse {
    pub customers: Vec<Customer>,
}

impl Operation for FindCustomers {
    type Response = FindCustomersResponse;
    const NAME: &'static str = "FindCustomers";
}

#[derive(Debug, Serialize)]
pub struct EchoRequestInfo {}

#[derive(Clone, Debug, Deserialize)]
pub struct EchoRequestInfoResponse {
    pub method: String,
    pub headers: BTreeMap<String, String>,
}

impl Operation for EchoRequestInfo {
    type Response = EchoRequestInfoResponse;
    const NAME: &'static str = "EchoRequestInfo";
}

#[derive(Debug, Serialize)]
pub struct ReturnsVoid {
    pub message: String,
}

impl Operation for ReturnsVoid {
    type Response = ();
    const NAME: &'static str = "ReturnsVoid";
}

#[derive(Debug, Serialize)]
pub struct Throws {}

impl Operation for Throws {
    type Response = Value;
    const NAME: &'static str = "Throws";
}

#[derive(Debug, Serialize)]
pub struct Garbled {}

impl Operation for Garbled {
    type Response = GetCustomerResponse;
    const NAME: &'static str = "Garbled";
}

#[derive(Debug, Serialize)]
pub struct Slow {
    pub millis: u64,
}

impl Operation for Slow {
    type Response = Value;
    const NAME: &'static str = "Slow";
}

/// What the host observed; shared with the test.
#[derive(Clone, Default)]
pub struct Host {
    created: Arc<AtomicU64>,
    hits: Arc<AtomicUsize>,
    messages: Arc<Mutex<Vec<String>>>,
}

impl Host {
    /// Calls that reached the host, of any operation.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Messages received by `ReturnsVoid`, in order.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

pub fn spawn() -> (Server, Host) {
    let host = Host::default();
    let state = host.clone();
    let server = server::http(move |req| handle(state.clone(), req));
    (server, host)
}

async fn handle(host: Host, req: http::Request<hyper::body::Incoming>) -> Response<String> {
    host.hits.fetch_add(1, Ordering::SeqCst);

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let query = req.uri().query().unwrap_or("").to_owned();
    let headers: BTreeMap<String, String> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_owned(), v.to_str().unwrap_or("").to_owned()))
        .collect();

    let body = req.into_body().collect().await.unwrap().to_bytes();
    let params: Map<String, Value> = if body.is_empty() {
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect()
    } else {
        serde_json::from_slice(&body).expect("json body")
    };

    let op = match path.strip_prefix("/json/reply/") {
        Some(op) => op,
        None => return reply(StatusCode::NOT_FOUND, "not found".into()),
    };

    match op {
        "GetCustomer" => {
            let id = int(&params["customerId"]);
            let created = host.created.fetch_add(1, Ordering::SeqCst) + 1;
            reply(
                StatusCode::OK,
                json!({ "customer": { "id": id }, "created": created }).to_string(),
            )
        }
        "FindCustomers" => {
            let ids: Vec<i64> = match &params["ids"] {
                Value::String(list) if list.is_empty() => Vec::new(),
                Value::String(list) => list.split(',').map(|id| id.parse().expect("id")).collect(),
                Value::Array(items) => items.iter().map(int).collect(),
                other => panic!("not a list: {other}"),
            };
            let customers: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
            reply(
                StatusCode::OK,
                json!({ "customers": customers }).to_string(),
            )
        }
        "EchoRequestInfo" => reply(
            StatusCode::OK,
            json!({ "method": method.as_str(), "headers": headers }).to_string(),
        ),
        "ReturnsVoid" => {
            let message = params["message"].as_str().unwrap_or("").to_owned();
            host.messages.lock().unwrap().push(message);
            reply(StatusCode::NO_CONTENT, String::new())
        }
        "Throws" => reply(
            StatusCode::BAD_REQUEST,
            json!({
                "responseStatus": {
                    "errorCode": "ArgumentException",
                    "message": "Throws always throws",
                    "errors": [{
                        "errorCode": "NotEmpty",
                        "fieldName": "Name",
                        "message": "'Name' must not be empty."
                    }]
                }
            })
            .to_string(),
        ),
        "Garbled" => reply(StatusCode::OK, "<html>not json</html>".into()),
        "Slow" => {
            let millis = int(&params["millis"]) as u64;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            reply(StatusCode::OK, json!({ "done": true }).to_string())
        }
        _ if method == Method::GET => reply(StatusCode::NOT_FOUND, String::new()),
        _ => reply(StatusCode::METHOD_NOT_ALLOWED, String::new()),
    }
}

fn int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().expect("integer"),
        Value::String(s) => s.parse().expect("integer"),
        other => panic!("not an integer: {other}"),
    }
}

fn reply(status: StatusCode, body: String) -> Response<String> {
    let mut res = Response::new(body);
    *res.status_mut() = status;
    if !res.body().is_empty() {
        res.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
    }
    res
}

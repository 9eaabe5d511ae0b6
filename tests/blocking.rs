mod support;
use support::canned::{canned, logged};
use support::services::*;
use support::DEFAULT_USER_AGENT;

use std::any::Any;
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use service_client::blocking::{Body, Client};
use service_client::filter::{Call, Entry};
use service_client::{BoxError, Method, Outgoing, ReplyHead, StatusCode};

#[test]
fn test_typed_calls() {
    let _ = env_logger::try_init();
    let (server, host) = spawn();
    let client = Client::new(server.base_url()).unwrap();
    let req = GetCustomer { customer_id: 5 };

    assert_eq!(client.get(&req).unwrap().customer, Customer { id: 5 });
    assert_eq!(client.post(&req).unwrap().customer.id, 5);
    assert_eq!(client.put(&req).unwrap().customer.id, 5);
    assert_eq!(client.patch(&req).unwrap().customer.id, 5);
    assert_eq!(client.delete(&req).unwrap().customer.id, 5);
    assert_eq!(client.send(&req).unwrap().created, 6);
    assert_eq!(host.hits(), 6);
}

#[test]
fn test_default_and_client_headers() {
    let (server, _host) = spawn();
    let mut client = Client::new(server.base_url()).unwrap();

    let echo = client.get(&EchoRequestInfo {}).unwrap();
    assert_eq!(echo.headers["accept"], "application/json");
    assert_eq!(echo.headers["user-agent"], DEFAULT_USER_AGENT);

    client.headers_mut().insert("foo", "Bar".parse().unwrap());
    let echo = client.post(&EchoRequestInfo {}).unwrap();
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.headers["foo"], "Bar");
}

#[test]
fn test_request_filter_headers() {
    let (server, _host) = spawn();
    let client = Client::builder()
        .base_url(server.base_url())
        .request_filter(|req: &mut Outgoing| -> Result<(), BoxError> {
            req.headers_mut().insert("foo", "Bar".parse()?);
            Ok(())
        })
        .build()
        .unwrap();

    let echo = client.get(&EchoRequestInfo {}).unwrap();
    assert_eq!(echo.headers["foo"], "Bar");
    assert!(client.headers().get("foo").is_none());
}

#[test]
fn test_raw_bodies_match_typed_post() {
    let (server, _host) = spawn();
    let client = Client::new(server.base_url()).unwrap();
    let req = GetCustomer { customer_id: 8 };
    let path = client.path_for(&req);
    let text = serde_json::to_string(&req).unwrap();

    let typed = client.post(&req).unwrap();
    let from_text: GetCustomerResponse = client.post_raw(&path, text.clone()).unwrap();
    let from_bytes: GetCustomerResponse =
        client.put_raw(&path, text.clone().into_bytes()).unwrap();
    let from_reader: GetCustomerResponse = client
        .patch_raw(&path, Body::new(std::io::Cursor::new(text.into_bytes())))
        .unwrap();

    assert_eq!(from_text.customer, typed.customer);
    assert_eq!(from_bytes.customer, typed.customer);
    assert_eq!(from_reader.customer, typed.customer);

    let from_query: GetCustomerResponse = client
        .get_raw("json/reply/GetCustomer?customerId=8")
        .unwrap();
    assert_eq!(from_query.customer, typed.customer);
}

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
    }
}

#[test]
fn test_unreadable_body_is_encode_error() {
    let (server, host) = spawn();
    let client = Client::new(server.base_url()).unwrap();

    let err = client
        .post_raw::<GetCustomerResponse, _>("json/reply/GetCustomer", Body::new(FailingReader))
        .unwrap_err();
    assert!(err.is_encode());
    assert_eq!(host.hits(), 0);
}

#[test]
fn test_void_operations() {
    let (server, host) = spawn();
    let client = Client::new(server.base_url()).unwrap();

    client
        .get(&ReturnsVoid {
            message: "get".into(),
        })
        .unwrap();
    client
        .delete(&ReturnsVoid {
            message: "delete".into(),
        })
        .unwrap();
    let reply = client
        .put_reply(&ReturnsVoid {
            message: "reply".into(),
        })
        .unwrap();
    assert_eq!(reply.status(), StatusCode::NO_CONTENT);

    assert_eq!(host.messages(), vec!["get", "delete", "reply"]);
}

#[test]
fn test_reply_is_readable() {
    let (server, _host) = spawn();
    let client = Client::new(server.base_url()).unwrap();

    let mut reply = client
        .reply(Method::GET, &GetCustomer { customer_id: 2 })
        .unwrap();
    assert_eq!(reply.status(), StatusCode::OK);

    let mut buf = String::new();
    reply.read_to_string(&mut buf).unwrap();
    let res: GetCustomerResponse = serde_json::from_str(&buf).unwrap();
    assert_eq!(res.customer.id, 2);

    let reply = client.get_reply(&GetCustomer { customer_id: 3 }).unwrap();
    let res: GetCustomerResponse = reply.json().unwrap();
    assert_eq!(res.customer.id, 3);
}

#[test]
fn test_error_status() {
    let (server, _host) = spawn();
    let client = Client::new(server.base_url()).unwrap();

    let err = client.get(&Throws {}).unwrap_err();
    assert!(err.is_status());
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    let status = err.response_status().unwrap();
    assert_eq!(status.error_code.as_deref(), Some("ArgumentException"));

    let err = client.get(&Garbled {}).unwrap_err();
    assert!(err.is_decode());
}

fn cached(client: &mut Client, entries: Arc<Mutex<HashMap<String, Entry>>>) {
    let lookup = entries.clone();
    client.set_results_filter(move |call: &Call<'_>| -> Result<Option<Entry>, BoxError> {
        Ok(lookup.lock().unwrap().get(&call.cache_key()).cloned())
    });
    client.set_results_filter_response(
        move |_: &ReplyHead, result: Option<Entry>, call: &Call<'_>| -> Result<(), BoxError> {
            if let Some(entry) = result {
                entries.lock().unwrap().insert(call.cache_key(), entry);
            }
            Ok(())
        },
    );
}

#[test]
fn test_cache_answers_repeat_calls() {
    let (server, host) = spawn();
    let mut client = Client::new(server.base_url()).unwrap();
    cached(&mut client, Default::default());

    let first = client.get(&GetCustomer { customer_id: 5 }).unwrap();
    let second = client.get(&GetCustomer { customer_id: 5 }).unwrap();
    assert_eq!(first, second);
    assert_eq!(host.hits(), 1);
}

#[test]
fn test_cache_keys_match_async_client() {
    let (server, _host) = spawn();
    let keys = Arc::new(Mutex::new(Vec::new()));

    let sync_keys = keys.clone();
    let blocking = Client::builder()
        .base_url(server.base_url())
        .results_filter(move |call: &Call<'_>| -> Result<Option<Entry>, BoxError> {
            sync_keys.lock().unwrap().push(call.cache_key());
            Ok(None)
        })
        .build()
        .unwrap();
    blocking.get(&GetCustomer { customer_id: 11 }).unwrap();

    let async_keys = keys.clone();
    let client = service_client::Client::builder()
        .base_url(server.base_url())
        .results_filter(move |call: &Call<'_>| -> Result<Option<Entry>, BoxError> {
            async_keys.lock().unwrap().push(call.cache_key());
            Ok(None)
        })
        .build()
        .unwrap();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(client.get(&GetCustomer { customer_id: 11 }))
        .unwrap();

    let keys = keys.lock().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], keys[1]);
    assert!(keys[0].starts_with("GET http://"));
    assert!(keys[0].ends_with("/json/reply/GetCustomer?customerId=11"));
}

#[test]
fn test_blocking_inside_runtime_is_rejected() {
    let (server, host) = spawn();
    let client = Client::new(server.base_url()).unwrap();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let err = rt.block_on(async { client.get(&GetCustomer { customer_id: 1 }) })
        .unwrap_err();
    assert!(err.is_transport());
    assert!(err.url().is_some());
    assert_eq!(host.hits(), 0);
}

#[test]
fn test_connect_failure() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let client = Client::new(format!("http://{addr}/")).unwrap();

    let err = client.get(&GetCustomer { customer_id: 1 }).unwrap_err();
    assert!(err.is_connect());
}

#[test]
fn test_filters_run_in_order() {
    let (transport, log, _) = canned();
    let (l1, l2, l3, l4) = (log.clone(), log.clone(), log.clone(), log.clone());

    let client = Client::builder()
        .base_url("http://service.test/")
        .transport(transport)
        .request_filter(move |_: &mut Outgoing| -> Result<(), BoxError> {
            l1.lock().unwrap().push("request");
            Ok(())
        })
        .results_filter(move |_: &Call<'_>| -> Result<Option<Entry>, BoxError> {
            l2.lock().unwrap().push("results");
            Ok(None)
        })
        .results_filter_response(
            move |_: &ReplyHead, _: Option<Entry>, _: &Call<'_>| -> Result<(), BoxError> {
                l3.lock().unwrap().push("results_response");
                Ok(())
            },
        )
        .response_filter(
            move |_: &ReplyHead, _: Option<&mut dyn Any>| -> Result<(), BoxError> {
                l4.lock().unwrap().push("response");
                Ok(())
            },
        )
        .build()
        .unwrap();

    let res = client.get(&GetCustomer { customer_id: 1 }).unwrap();
    assert_eq!(res.customer.id, 1);
    assert_eq!(
        logged(&log),
        vec!["request", "results", "transport", "results_response", "response"]
    );
}

#[test]
fn test_results_filter_short_circuits() {
    let (transport, log, sent) = canned();
    let (l1, l3, l4) = (log.clone(), log.clone(), log.clone());
    let hit = GetCustomerResponse {
        customer: Customer { id: 42 },
        created: 0,
    };

    let client = Client::builder()
        .base_url("http://service.test/")
        .transport(transport)
        .request_filter(move |_: &mut Outgoing| -> Result<(), BoxError> {
            l1.lock().unwrap().push("request");
            Ok(())
        })
        .results_filter(move |_: &Call<'_>| -> Result<Option<Entry>, BoxError> {
            Ok(Some(Arc::new(hit.clone())))
        })
        .results_filter_response(
            move |_: &ReplyHead, _: Option<Entry>, _: &Call<'_>| -> Result<(), BoxError> {
                l3.lock().unwrap().push("results_response");
                Ok(())
            },
        )
        .response_filter(
            move |_: &ReplyHead, _: Option<&mut dyn Any>| -> Result<(), BoxError> {
                l4.lock().unwrap().push("response");
                Ok(())
            },
        )
        .build()
        .unwrap();

    let res = client.get(&GetCustomer { customer_id: 1 }).unwrap();
    assert_eq!(res.customer.id, 42);
    assert_eq!(sent.load(Ordering::SeqCst), 0);
    assert_eq!(logged(&log), vec!["request"]);
}

#[test]
fn test_raw_reply() {
    let (server, _host) = spawn();
    let client = Client::new(server.base_url()).unwrap();

    let reply = client
        .raw_reply(Method::GET, "json/reply/GetCustomer?customerId=6", None)
        .unwrap();
    let res: GetCustomerResponse = reply.json().unwrap();
    assert_eq!(res.customer.id, 6);

    let mut reply = client
        .post_raw_reply(
            "json/reply/GetCustomer",
            Body::new(io::Cursor::new(br#"{"customerId":7}"#.to_vec())),
        )
        .unwrap();
    assert_eq!(reply.status(), StatusCode::OK);
    let mut buf = String::new();
    reply.read_to_string(&mut buf).unwrap();
    let res: GetCustomerResponse = serde_json::from_str(&buf).unwrap();
    assert_eq!(res.customer.id, 7);

    let err = client
        .raw_reply(Method::POST, "json/reply/GetCustomer", Some(Body::new(FailingReader)))
        .unwrap_err();
    assert!(err.is_encode());
}

#[test]
fn test_declared_body_length_is_a_hint() {
    let (server, host) = spawn();
    let client = Client::new(server.base_url()).unwrap();

    client
        .post_raw::<(), _>(
            "json/reply/ReturnsVoid?message=sized",
            Body::sized(io::empty(), u64::MAX),
        )
        .unwrap();
    assert_eq!(host.messages(), vec!["sized"]);
}

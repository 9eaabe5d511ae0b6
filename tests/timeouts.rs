mod support;
use support::services::*;

use std::time::Duration;

use service_client::{BoxError, Client, Outgoing};

#[tokio::test]
async fn client_timeout() {
    let _ = env_logger::try_init();
    let (server, _host) = spawn();

    let client = Client::builder()
        .base_url(server.base_url())
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let err = client.get(&Slow { millis: 300 }).await.unwrap_err();

    assert!(err.is_timeout());
    assert!(err.is_transport());
    assert_eq!(
        err.url().map(|u| u.as_str()),
        Some(format!("{}json/reply/Slow?millis=300", server.base_url()).as_str())
    );
}

#[tokio::test]
async fn call_timeout_overrides_client() {
    let _ = env_logger::try_init();
    let (server, _host) = spawn();

    let client = Client::builder()
        .base_url(server.base_url())
        .timeout(Duration::from_secs(5))
        .request_filter(|req: &mut Outgoing| -> Result<(), BoxError> {
            *req.timeout_mut() = Some(Duration::from_millis(100));
            Ok(())
        })
        .build()
        .unwrap();

    let err = client.post(&Slow { millis: 300 }).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn fast_reply_within_timeout() {
    let (server, _host) = spawn();

    let client = Client::builder()
        .base_url(server.base_url())
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap();

    let res = client.get(&Slow { millis: 10 }).await.unwrap();
    assert_eq!(res["done"], true);
}

#[cfg(feature = "blocking")]
#[test]
fn blocking_client_timeout() {
    let _ = env_logger::try_init();
    let (server, _host) = spawn();

    let client = service_client::blocking::Client::builder()
        .base_url(server.base_url())
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let err = client.get(&Slow { millis: 300 }).unwrap_err();
    assert!(err.is_timeout());
    assert!(err.url().is_some());
}

#[cfg(feature = "blocking")]
#[test]
fn blocking_reply_read_timeout() {
    let (server, _host) = spawn();

    let client = service_client::blocking::Client::builder()
        .base_url(server.base_url())
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let err = client.get_reply(&Slow { millis: 300 }).unwrap_err();
    assert!(err.is_timeout());
}

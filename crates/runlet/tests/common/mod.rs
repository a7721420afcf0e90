//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use runlet::api::{self, AppState};
use runlet::auth::{IdentityResolver, PeerCertificates};
use runlet::process::{Manager, ManagerConfig, UserId};
use rustls::pki_types::CertificateDer;
use serde_json::Value;
use tower::ServiceExt;

/// Router wired to a real manager, with one generated certificate per user.
pub struct TestApp {
    pub router: Router,
    pub manager: Arc<Manager>,
    certs: HashMap<UserId, CertificateDer<'static>>,
}

pub fn generate_cert(name: &str) -> CertificateDer<'static> {
    rcgen::generate_simple_self_signed(vec![name.to_string()])
        .expect("generate certificate")
        .cert
        .der()
        .clone()
}

pub fn test_app() -> TestApp {
    test_app_with_config(ManagerConfig::default())
}

pub fn test_app_with_config(config: ManagerConfig) -> TestApp {
    let mut identity = IdentityResolver::new();
    let mut certs = HashMap::new();
    for user in [1, 2] {
        let cert = generate_cert(&format!("client{user}"));
        identity.bind(user, cert.clone()).expect("bind certificate");
        certs.insert(user, cert);
    }

    let manager = Arc::new(Manager::new(config));
    for user in identity.users() {
        manager.add_user(user);
    }

    let state = AppState::new(Arc::clone(&manager), Arc::new(identity));
    TestApp {
        router: api::create_router(state),
        manager,
        certs,
    }
}

impl TestApp {
    pub fn peer(&self, user: UserId) -> PeerCertificates {
        let cert = self.certs.get(&user).expect("known test user");
        PeerCertificates::new(Some(std::slice::from_ref(cert)))
    }

    /// Send a request on behalf of `peer` and decode the JSON body.
    pub async fn send(
        &self,
        peer: Option<PeerCertificates>,
        method: Method,
        uri: &str,
        body: Option<String>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(peer) = peer {
            builder = builder.extension(peer);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body)),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn get(&self, user: UserId, uri: &str) -> (StatusCode, Value) {
        self.send(Some(self.peer(user)), Method::GET, uri, None).await
    }

    pub async fn post(&self, user: UserId, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Some(self.peer(user)), Method::POST, uri, Some(body.to_string()))
            .await
    }

    /// Start `command` as `user` and return the process id.
    pub async fn start(&self, user: UserId, command: &str) -> String {
        let (status, json) = self
            .post(user, "/start", serde_json::json!({ "command": command }))
            .await;
        assert_eq!(status, StatusCode::OK, "start failed: {json}");
        json["uuid"].as_str().expect("uuid in response").to_string()
    }

    /// Poll `/status` until the process has a terminal state.
    pub async fn wait_terminal(&self, user: UserId, id: &str) -> Value {
        let uri = format!("/status?id={id}");
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (status, json) = self.get(user, &uri).await;
                assert_eq!(status, StatusCode::OK, "status failed: {json}");
                if !json["status"].is_null() {
                    return json["status"].clone();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("process did not terminate in time")
    }
}

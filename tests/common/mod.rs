//! In-process stand-in for the daemon's membership HTTP API

#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct FakeDaemon {
    /// Number of `/readyz` calls answered with 503 before turning ready
    pub not_ready_for: u32,
    pub readyz_calls: AtomicU32,
    pub members: Mutex<Vec<u64>>,
    pub failing_removals: HashSet<u64>,
    /// Raw `DELETE /remove` bodies in arrival order
    pub remove_bodies: Mutex<Vec<Value>>,
}

impl FakeDaemon {
    pub fn with_members(members: &[u64]) -> Self {
        Self {
            members: Mutex::new(members.to_vec()),
            ..Default::default()
        }
    }

    pub fn removed(&self) -> Vec<String> {
        self.remove_bodies
            .lock()
            .unwrap()
            .iter()
            .filter_map(|b| b["id"].as_str().map(str::to_string))
            .collect()
    }
}

async fn readyz(State(daemon): State<Arc<FakeDaemon>>) -> StatusCode {
    let call = daemon.readyz_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call <= daemon.not_ready_for {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn nodes(State(daemon): State<Arc<FakeDaemon>>) -> Json<Value> {
    let members = daemon.members.lock().unwrap().clone();
    let mut listing = serde_json::Map::new();
    for ordinal in members {
        listing.insert(
            ordinal.to_string(),
            json!({
                "api_addr": format!("http://10.0.0.{}:4001", ordinal),
                "addr": format!("10.0.0.{}:4002", ordinal),
                "reachable": true,
                "leader": false,
            }),
        );
    }
    Json(Value::Object(listing))
}

async fn remove(State(daemon): State<Arc<FakeDaemon>>, Json(body): Json<Value>) -> StatusCode {
    daemon.remove_bodies.lock().unwrap().push(body.clone());
    let Some(ordinal) = body["id"].as_str().and_then(|id| id.parse::<u64>().ok()) else {
        return StatusCode::BAD_REQUEST;
    };
    if daemon.failing_removals.contains(&ordinal) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    daemon.members.lock().unwrap().retain(|o| *o != ordinal);
    StatusCode::OK
}

/// Serve `daemon` on an ephemeral localhost port.
pub async fn spawn_daemon(daemon: Arc<FakeDaemon>) -> SocketAddr {
    let app = Router::new()
        .route("/readyz", get(readyz))
        .route("/nodes", get(nodes))
        .route("/remove", delete(remove))
        .with_state(daemon);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

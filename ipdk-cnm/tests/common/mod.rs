//! Shared test utilities for ipdk-cnm integration tests.

use ipdk_cnm::provisioner::{self, ProvisionedPort, Provisioner};
use ipdk_cnm::rest::{AppState, create_router};
use ipdk_cnm::{Ledger, NetworkDriver, StateStore};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Provisioner that only records what it was asked to do.
#[derive(Default)]
pub struct FakeProvisioner {
    pub provisioned: Mutex<Vec<(IpAddr, u64)>>,
    pub deprovisioned: Mutex<Vec<String>>,
}

impl Provisioner for FakeProvisioner {
    fn provision_endpoint(
        &self,
        address: IpAddr,
        interface_index: u64,
    ) -> provisioner::Result<ProvisionedPort> {
        self.provisioned
            .lock()
            .unwrap()
            .push((address, interface_index));
        Ok(ProvisionedPort {
            port_name: address.to_string(),
            socket_path: PathBuf::from(format!("/nonexistent/vhostuser_{}/vhu.sock", address)),
        })
    }

    fn deprovision_endpoint(&self, port_name: &str) -> provisioner::Result<()> {
        self.deprovisioned
            .lock()
            .unwrap()
            .push(port_name.to_string());
        Ok(())
    }
}

/// Test server wrapper serving the plugin API backed by a ledger on disk.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub provisioner: Arc<FakeProvisioner>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server whose ledger lives in `dir`.
    pub async fn spawn(dir: &Path) -> Self {
        let ledger = Ledger::open(dir.join("ledger.redb")).expect("Failed to open ledger");
        let store = StateStore::load(Arc::new(ledger)).expect("Failed to load state");
        let provisioner = Arc::new(FakeProvisioner::default());
        let driver = NetworkDriver::new(Arc::new(store), provisioner.clone(), "br0");
        let router = create_router(Arc::new(AppState::new(Arc::new(driver))));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        // No idle connections, so graceful shutdown never waits on the client.
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .expect("Failed to build client");

        Self {
            addr,
            client,
            provisioner,
            shutdown_tx,
            handle,
        }
    }

    pub fn url(&self, method: &str) -> String {
        format!("http://{}/{}", self.addr, method)
    }

    /// POST a JSON body and decode the JSON reply. Every reply must be 200.
    pub async fn call<T: Serialize>(&self, method: &str, body: &T) -> Value {
        let resp = self
            .client
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .expect("Request failed");
        assert_eq!(resp.status(), reqwest::StatusCode::OK, "{}", method);
        resp.json().await.expect("Invalid JSON response")
    }

    /// POST a raw body.
    pub async fn call_raw(&self, method: &str, body: &'static str) -> Value {
        let resp = self
            .client
            .post(self.url(method))
            .body(body)
            .send()
            .await
            .expect("Request failed");
        assert_eq!(resp.status(), reqwest::StatusCode::OK, "{}", method);
        resp.json().await.expect("Invalid JSON response")
    }

    /// Stop the server and wait until the ledger is released.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("Server did not shut down")
            .expect("Server task panicked");
    }
}

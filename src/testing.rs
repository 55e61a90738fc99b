//! Doubles for the external collaborators, shared by tests.

use std::{
    io,
    path::Path,
    sync::{
        atomic::{AtomicU16, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use actix_web::{http::StatusCode, web, App, HttpRequest, HttpResponse, HttpServer};
use color_eyre::eyre;
use serde_json::{json, Value};

use crate::{
    executor::{
        Checkout, Executor, Exit, Invocation, ProcessOutput, ProcessRunner, Settings,
    },
    github::{ApiError, State},
    lock_manager::LockManager,
    logs::LogStore,
    reporter::{NewStatus, StatusReporter},
    resolver::{DeploymentCreator, NewDeployment},
};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
struct Shared {
    requests: Arc<Mutex<Vec<Recorded>>>,
    status: Arc<AtomicU16>,
}

pub struct FakeServer {
    base: String,
    shared: Shared,
}

async fn record(req: HttpRequest, body: web::Bytes, shared: web::Data<Shared>) -> HttpResponse {
    shared.requests.lock().unwrap().push(Recorded {
        method: req.method().to_string(),
        path: req.path().to_string(),
        authorization: req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .map(String::from),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    let status = StatusCode::from_u16(shared.status.load(Ordering::SeqCst)).unwrap();
    HttpResponse::build(status).json(json!([{ "state": "pending", "description": "Deploy started" }]))
}

impl FakeServer {
    /// Must be called from within a running actix system.
    pub fn start() -> Self {
        let shared = Shared::default();
        shared.status.store(201, Ordering::SeqCst);

        let data = shared.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(data.clone()))
                .default_service(web::to(record))
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .unwrap();
        let base = format!("http://{}", server.addrs()[0]);
        actix_rt::spawn(server.run());

        Self { base, shared }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn respond_with(&self, status: u16) {
        self.shared.status.store(status, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// Waits up to five seconds for at least `count` requests to arrive.
    pub async fn wait_for(&self, count: usize) -> Vec<Recorded> {
        for _ in 0..100 {
            if self.shared.requests.lock().unwrap().len() >= count {
                break;
            }
            actix_rt::time::sleep(Duration::from_millis(50)).await;
        }
        self.requests()
    }
}

/// Origin system double recording every call.
#[derive(Default)]
pub struct Recorder {
    pub deployments: Mutex<Vec<(String, NewDeployment)>>,
    pub statuses: Mutex<Vec<(String, NewStatus)>>,
}

impl Recorder {
    pub fn states(&self) -> Vec<State> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .map(|(_, status)| status.state)
            .collect()
    }
}

impl StatusReporter for Recorder {
    fn report(&self, statuses_url: &str, status: &NewStatus) -> Result<(), ApiError> {
        self.statuses
            .lock()
            .unwrap()
            .push((statuses_url.to_string(), status.clone()));
        Ok(())
    }
}

impl DeploymentCreator for Recorder {
    fn create_deployment(&self, url: &str, request: &NewDeployment) -> Result<(), ApiError> {
        self.deployments
            .lock()
            .unwrap()
            .push((url.to_string(), request.clone()));
        Ok(())
    }
}

pub struct NoopCheckout;

impl Checkout for NoopCheckout {
    fn sync(&self, _path: &Path) -> eyre::Result<()> {
        Ok(())
    }
}

/// Pretends every playbook run exits with `code` after printing `output`.
pub struct StaticRunner {
    pub code: i32,
    pub output: String,
    pub runs: AtomicUsize,
}

impl StaticRunner {
    pub fn new(code: i32, output: &str) -> Self {
        Self {
            code,
            output: output.to_string(),
            runs: AtomicUsize::new(0),
        }
    }
}

impl ProcessRunner for StaticRunner {
    fn run(&self, _invocation: &Invocation) -> io::Result<ProcessOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessOutput {
            exit: Exit::Code(self.code),
            output: self.output.clone(),
        })
    }
}

pub fn executor(
    runner: Arc<dyn ProcessRunner>,
    reporter: Arc<dyn StatusReporter>,
    logs: Arc<dyn LogStore>,
) -> Executor {
    Executor::new(
        Settings {
            playbook_path: "/srv/ansible".into(),
            inventory: "hosts/production".into(),
            playbook_args: vec![],
            extra_vars: vec![],
            timeout: Some(Duration::from_secs(60)),
            public_url: "https://deploy.example.org".into(),
        },
        Arc::new(NoopCheckout),
        runner,
        reporter,
        logs,
        Arc::new(LockManager::new()),
    )
}

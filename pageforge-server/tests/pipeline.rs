//! Webhook acceptance tests.
//!
//! Runs the real front door and a fake evaluator on loopback ports, with the
//! in-memory repository store and a scripted model behind the pipeline.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};

use pageforge_core::generator::ContentGenerator;
use pageforge_core::llm::ScriptedBackend;
use pageforge_core::notify::{
    NotificationDispatcher, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper,
};
use pageforge_core::orchestrator::{OrchestratorSettings, TaskOrchestrator};
use pageforge_core::publisher::memory::StoreOp;
use pageforge_core::publisher::{MemoryRepoStore, RepositoryPublisher};
use pageforge_server::web::{self, AppState};

const SECRET: &str = "s3cret";

#[derive(Default)]
struct Evaluator {
    bodies: Mutex<Vec<Value>>,
}

async fn record(State(ev): State<Arc<Evaluator>>, Json(body): Json<Value>) -> StatusCode {
    ev.bodies.lock().push(body);
    StatusCode::OK
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Fake evaluator that accepts every notification.
async fn start_evaluator() -> (String, Arc<Evaluator>) {
    let ev = Arc::new(Evaluator::default());
    let app = Router::new()
        .route("/cb", post(record))
        .with_state(ev.clone());
    (format!("{}/cb", serve(app).await), ev)
}

struct Fixture {
    base: String,
    store: Arc<MemoryRepoStore>,
    backend: Arc<ScriptedBackend>,
    sleeper: Arc<RecordingSleeper>,
    http: reqwest::Client,
}

fn pipeline(
    store: Arc<MemoryRepoStore>,
    backend: Arc<ScriptedBackend>,
    sleeper: Arc<dyn Sleeper>,
    propagation_delay: Duration,
) -> TaskOrchestrator {
    TaskOrchestrator::new(
        ContentGenerator::new(backend),
        RepositoryPublisher::new(store),
        NotificationDispatcher::new(RetryPolicy::default(), sleeper.clone()),
        sleeper,
        OrchestratorSettings {
            propagation_delay,
            license_holder: "octocat".into(),
        },
    )
}

async fn serve_front_door(orchestrator: TaskOrchestrator) -> String {
    let state = Arc::new(AppState {
        secret: SECRET.to_string(),
        orchestrator: Arc::new(orchestrator),
    });
    serve(web::router(state)).await
}

async fn start_front_door(responses: &[&str]) -> Fixture {
    let store = Arc::new(MemoryRepoStore::new("octocat"));
    let backend = Arc::new(ScriptedBackend::new(responses.iter().copied()));
    let sleeper = Arc::new(RecordingSleeper::new());
    let orchestrator = pipeline(
        store.clone(),
        backend.clone(),
        sleeper.clone(),
        Duration::from_secs(60),
    );
    Fixture {
        base: serve_front_door(orchestrator).await,
        store,
        backend,
        sleeper,
        http: reqwest::Client::new(),
    }
}

impl Fixture {
    async fn post(&self, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}/api/build", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    fn puts(&self) -> Vec<(String, Option<String>)> {
        self.store
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Put {
                    path,
                    version_token,
                    ..
                } => Some((path, version_token)),
                _ => None,
            })
            .collect()
    }
}

fn build_request(eval_url: &str) -> Value {
    json!({
        "secret": SECRET,
        "task": "demo-1",
        "brief": "a todo app",
        "round": 1,
        "checks": ["has a delete button"],
        "email": "a@b.com",
        "nonce": "n1",
        "evaluation_url": eval_url,
    })
}

fn revise_request(eval_url: &str) -> Value {
    json!({
        "secret": SECRET,
        "task": "demo-1",
        "brief": "also add a counter",
        "round": 2,
        "email": "a@b.com",
        "nonce": "n2",
        "evaluation_url": eval_url,
    })
}

// ── End-to-end ─────────────────────────────────────────────────────────

#[tokio::test]
async fn build_then_revise() {
    let (eval_url, evaluator) = start_evaluator().await;
    let f = start_front_door(&[
        "Sure!\n```html\n<button>delete</button>\n```",
        "# demo-1\n\nA todo app.",
        "```html\n<button>delete</button><span id=\"counter\">0</span>\n```",
        "# demo-1\n\nA todo app with a counter.",
    ])
    .await;

    // Round 1
    let (status, body) = f.post(build_request(&eval_url)).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "Process completed successfully.");

    assert_eq!(
        f.puts(),
        vec![
            ("index.html".to_string(), None),
            ("README.md".to_string(), None),
            ("LICENSE".to_string(), None),
        ]
    );
    let ops = f.store.ops();
    assert_eq!(ops[0], StoreOp::Create { repo: "demo-1".into() });
    assert!(ops.contains(&StoreOp::EnablePages { repo: "demo-1".into() }));
    assert_eq!(
        f.store.file("demo-1", "index.html").unwrap().content,
        "<button>delete</button>"
    );
    assert!(
        f.store
            .file("demo-1", "LICENSE")
            .unwrap()
            .content
            .contains("octocat")
    );
    assert!(f.backend.prompts()[0].1.contains("1. has a delete button"));
    assert_eq!(f.sleeper.durations(), vec![Duration::from_secs(60)]);

    let first = evaluator.bodies.lock()[0].clone();
    assert_eq!(first["round"], 1);
    assert_eq!(first["nonce"], "n1");
    assert_eq!(first["task"], "demo-1");
    assert_eq!(first["email"], "a@b.com");
    assert_eq!(first["repo_url"], "https://github.com/octocat/demo-1");
    assert_eq!(first["pages_url"], "https://octocat.github.io/demo-1/");
    assert_eq!(first["commit_sha"], f.store.head("demo-1").unwrap().as_str());
    assert!(first.get("evaluation_url").is_none());

    // Round 2
    let index_token = f.store.file("demo-1", "index.html").unwrap().version_token;
    let readme_token = f.store.file("demo-1", "README.md").unwrap().version_token;
    let round1_ops = f.store.ops().len();

    let (status, body) = f.post(revise_request(&eval_url)).await;
    assert_eq!(status, 200, "{body}");

    let revise_ops = f.store.ops()[round1_ops..].to_vec();
    assert_eq!(
        revise_ops[..4],
        [
            StoreOp::Get {
                repo: "demo-1".into(),
                path: "index.html".into()
            },
            StoreOp::Get {
                repo: "demo-1".into(),
                path: "README.md".into()
            },
            StoreOp::Put {
                repo: "demo-1".into(),
                path: "index.html".into(),
                version_token: Some(index_token),
                message: "feat: Apply revisions for round 2".into(),
            },
            StoreOp::Put {
                repo: "demo-1".into(),
                path: "README.md".into(),
                version_token: Some(readme_token),
                message: "feat: Apply revisions for round 2".into(),
            },
        ]
    );
    assert!(
        !revise_ops
            .iter()
            .any(|op| matches!(op, StoreOp::Create { .. }))
    );
    assert_eq!(
        f.store.file("demo-1", "index.html").unwrap().content,
        "<button>delete</button><span id=\"counter\">0</span>"
    );

    // The revise prompt edits the published page rather than starting over.
    let revise_prompt = &f.backend.prompts()[2].1;
    assert!(revise_prompt.contains("also add a counter"));
    assert!(revise_prompt.contains("<button>delete</button>"));

    let second = evaluator.bodies.lock()[1].clone();
    assert_eq!(second["round"], 2);
    assert_eq!(second["nonce"], "n2");
    assert_eq!(second["pages_url"], "https://octocat.github.io/demo-1/");
    assert_eq!(second["commit_sha"], f.store.head("demo-1").unwrap().as_str());
}

#[tokio::test]
async fn rebuild_of_existing_repo_is_conflict_not_overwrite() {
    let (eval_url, _evaluator) = start_evaluator().await;
    let f = start_front_door(&["<p>one</p>", "# one", "<p>two</p>", "# two"]).await;

    let (status, _) = f.post(build_request(&eval_url)).await;
    assert_eq!(status, 200);

    let mut again = build_request(&eval_url);
    again["nonce"] = json!("n1-again");
    let (status, body) = f.post(again).await;
    assert_eq!(status, 500);
    let msg = body["error"].as_str().unwrap();
    assert!(msg.starts_with("A critical error occurred:"), "{msg}");
    assert!(msg.contains("Version conflict"), "{msg}");
    assert_eq!(f.store.file("demo-1", "index.html").unwrap().content, "<p>one</p>");
}

#[tokio::test]
async fn caller_hang_up_does_not_cancel_the_run() {
    let (eval_url, evaluator) = start_evaluator().await;
    let store = Arc::new(MemoryRepoStore::new("octocat"));
    let backend = Arc::new(ScriptedBackend::new([
        "```html\n<p>app</p>\n```",
        "# demo-1",
    ]));
    let base = serve_front_door(pipeline(
        store.clone(),
        backend,
        Arc::new(TokioSleeper),
        Duration::from_millis(800),
    ))
    .await;

    // The caller gives up while the run sits in the propagation wait.
    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let sent = impatient
        .post(format!("{base}/api/build"))
        .json(&build_request(&eval_url))
        .send()
        .await;
    assert!(sent.is_err());

    for _ in 0..100 {
        if !evaluator.bodies.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(evaluator.bodies.lock().len(), 1);
    assert_eq!(
        store.file("demo-1", "index.html").unwrap().content,
        "<p>app</p>"
    );
}

// ── Front door errors ──────────────────────────────────────────────────

#[tokio::test]
async fn invalid_json_is_400() {
    let f = start_front_door(&[]).await;
    let resp = f
        .http
        .post(format!("{}/api/build", f.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid JSON");
}

#[tokio::test]
async fn bad_or_missing_secret_is_401() {
    let f = start_front_door(&[]).await;

    let mut req = build_request("https://eval.test/cb");
    req["secret"] = json!("wrong");
    let (status, body) = f.post(req).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = f.post(json!({ "task": "demo-1" })).await;
    assert_eq!(status, 401);
    assert!(f.store.ops().is_empty());
}

#[tokio::test]
async fn missing_field_is_400() {
    let f = start_front_door(&[]).await;
    let mut req = build_request("https://eval.test/cb");
    req.as_object_mut().unwrap().remove("brief");
    let (status, body) = f.post(req).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("brief"));
}

#[tokio::test]
async fn revise_without_published_files_is_500() {
    let f = start_front_door(&[]).await;
    let (status, body) = f.post(revise_request("https://eval.test/cb")).await;
    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("index.html not found"));
}

#[tokio::test]
async fn health_endpoint() {
    let f = start_front_door(&[]).await;
    let body: Value = f
        .http
        .get(format!("{}/api/health", f.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

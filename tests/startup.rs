//! Startup sequencing against scripted control-plane and session-service fakes.

use async_trait::async_trait;
use fleet_sync::error::{Error, Result};
use fleet_sync::model::{
    CreatedSandbox, PermissionRequest, QuestionRequest, RawSessionStatus, Sandbox, SandboxRuntime,
    SandboxStatus, SandboxUrls, Session,
};
use fleet_sync::startup::{
    ControlPlane, CreatedSession, SessionService, StartRequest, StartupOrchestrator,
};
use fleet_sync::Source;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SESSION_URL: &str = "http://10.0.0.9:3000";

fn sandbox(status: SandboxStatus, url: Option<&str>, error: Option<&str>) -> Sandbox {
    Sandbox {
        id: "sb-1".into(),
        workspace_id: Some("ws-1".into()),
        status,
        runtime: Some(SandboxRuntime {
            urls: SandboxUrls {
                session_service: url.map(str::to_string),
                ..SandboxUrls::default()
            },
            error: error.map(str::to_string),
        }),
    }
}

fn creating() -> Sandbox {
    sandbox(SandboxStatus::Creating, None, None)
}

fn running() -> Sandbox {
    sandbox(SandboxStatus::Running, Some(SESSION_URL), None)
}

/// Returns `script[n]` on the n-th status poll, repeating the last entry.
#[derive(Clone)]
struct ScriptedControl {
    created_id: Option<String>,
    script: Arc<Vec<Sandbox>>,
    gets: Arc<AtomicUsize>,
}

impl ScriptedControl {
    fn new(script: Vec<Sandbox>) -> Self {
        Self {
            created_id: Some("sb-1".into()),
            script: Arc::new(script),
            gets: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPlane for ScriptedControl {
    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>> {
        Ok(vec![])
    }

    async fn create_sandbox(&self, _workspace_id: &str) -> Result<CreatedSandbox> {
        Ok(CreatedSandbox {
            id: self.created_id.clone(),
        })
    }

    async fn get_sandbox(&self, _id: &str) -> Result<Sandbox> {
        let n = self.gets.fetch_add(1, Ordering::SeqCst);
        let index = n.min(self.script.len() - 1);
        Ok(self.script[index].clone())
    }
}

#[derive(Clone, Default)]
struct FakeSessions {
    healthy_after: usize,
    never_healthy: bool,
    create_error: Option<String>,
    send_error: Option<String>,
    health_calls: Arc<AtomicUsize>,
    creates: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeSessions {
    fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionService for FakeSessions {
    async fn health_check(&self, source: &Source) -> bool {
        assert_eq!(source.as_str(), SESSION_URL);
        let n = self.health_calls.fetch_add(1, Ordering::SeqCst);
        !self.never_healthy && n >= self.healthy_after
    }

    async fn list_sessions(&self, _source: &Source) -> Result<Vec<Session>> {
        Ok(vec![])
    }

    async fn session_statuses(&self, _source: &Source) -> Result<HashMap<String, RawSessionStatus>> {
        Ok(HashMap::new())
    }

    async fn permissions(&self, _source: &Source) -> Result<Vec<PermissionRequest>> {
        Ok(vec![])
    }

    async fn questions(&self, _source: &Source) -> Result<Vec<QuestionRequest>> {
        Ok(vec![])
    }

    async fn create_session(&self, _source: &Source, directory: Option<&str>) -> Result<CreatedSession> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.create_error {
            return Err(Error::Operation(message.clone()));
        }
        Ok(CreatedSession {
            id: "ses_1".into(),
            directory: directory.unwrap_or("/workspace").to_string(),
        })
    }

    async fn send_message(
        &self,
        _source: &Source,
        session_id: &str,
        _directory: Option<&str>,
        text: &str,
    ) -> Result<()> {
        if let Some(message) = &self.send_error {
            return Err(Error::Operation(message.clone()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((session_id.to_string(), text.to_string()));
        Ok(())
    }
}

fn request() -> StartRequest {
    StartRequest {
        workspace_id: "ws-1".into(),
        message: "Fix the flaky test".into(),
        directory: None,
    }
}

#[tokio::test(start_paused = true)]
async fn starts_session_after_readiness() {
    let control = ScriptedControl::new(vec![creating(), creating(), running()]);
    let sessions = FakeSessions {
        healthy_after: 2,
        ..FakeSessions::default()
    };
    let orchestrator = StartupOrchestrator::new(control.clone(), sessions.clone());

    let started = orchestrator.start_session(&request()).await.unwrap();

    assert_eq!(started.sandbox_id, "sb-1");
    assert_eq!(started.session_id, "ses_1");
    assert_eq!(
        started.session_url,
        "http://10.0.0.9:3000/L3dvcmtzcGFjZQ/session/ses_1"
    );
    assert_eq!(control.gets(), 3);
    assert_eq!(sessions.health_calls(), 3);
    assert_eq!(
        sessions.sent(),
        vec![("ses_1".to_string(), "Fix the flaky test".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn running_without_url_keeps_polling() {
    let control = ScriptedControl::new(vec![
        sandbox(SandboxStatus::Running, None, None),
        running(),
    ]);
    let orchestrator = StartupOrchestrator::new(control.clone(), FakeSessions::default());

    orchestrator.start_session(&request()).await.unwrap();
    assert_eq!(control.gets(), 2);
}

#[tokio::test(start_paused = true)]
async fn sandbox_error_fails_immediately() {
    let control = ScriptedControl::new(vec![
        creating(),
        creating(),
        sandbox(SandboxStatus::Error, None, Some("VM failed to boot")),
    ]);
    let sessions = FakeSessions::default();
    let orchestrator = StartupOrchestrator::new(control.clone(), sessions.clone());

    let started = tokio::time::Instant::now();
    let err = orchestrator.start_session(&request()).await.unwrap_err();

    assert!(matches!(err, Error::Remote(_)));
    assert_eq!(err.to_string(), "VM failed to boot");
    assert_eq!(control.gets(), 3);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(sessions.health_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn sandbox_error_without_message() {
    let control = ScriptedControl::new(vec![sandbox(SandboxStatus::Error, None, None)]);
    let orchestrator = StartupOrchestrator::new(control, FakeSessions::default());

    let err = orchestrator.start_session(&request()).await.unwrap_err();
    assert_eq!(err.to_string(), "Sandbox failed to start");
}

#[tokio::test(start_paused = true)]
async fn sandbox_never_ready_times_out() {
    let control = ScriptedControl::new(vec![creating()]);
    let orchestrator = StartupOrchestrator::new(control.clone(), FakeSessions::default());

    let started = tokio::time::Instant::now();
    let err = orchestrator.start_session(&request()).await.unwrap_err();

    assert!(matches!(err, Error::NotReady(_)));
    assert_eq!(err.to_string(), "Sandbox did not become ready in time");
    assert_eq!(control.gets(), 60);
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn session_service_never_healthy_times_out() {
    let control = ScriptedControl::new(vec![running()]);
    let sessions = FakeSessions {
        never_healthy: true,
        ..FakeSessions::default()
    };
    let orchestrator = StartupOrchestrator::new(control, sessions.clone());

    let err = orchestrator.start_session(&request()).await.unwrap_err();

    assert_eq!(err.to_string(), "Session service did not become ready in time");
    assert_eq!(sessions.health_calls(), 30);
    assert_eq!(sessions.creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_sandbox_id_fails() {
    let mut control = ScriptedControl::new(vec![running()]);
    control.created_id = None;
    let orchestrator = StartupOrchestrator::new(control.clone(), FakeSessions::default());

    let err = orchestrator.start_session(&request()).await.unwrap_err();

    assert_eq!(err.to_string(), "Failed to create sandbox");
    assert_eq!(control.gets(), 0);
}

#[tokio::test(start_paused = true)]
async fn create_session_error_is_verbatim() {
    let control = ScriptedControl::new(vec![running()]);
    let sessions = FakeSessions {
        create_error: Some("Failed to create session".into()),
        ..FakeSessions::default()
    };
    let orchestrator = StartupOrchestrator::new(control, sessions.clone());

    let err = orchestrator.start_session(&request()).await.unwrap_err();

    assert_eq!(err.to_string(), "Failed to create session");
    assert!(sessions.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_message_error_is_verbatim() {
    let control = ScriptedControl::new(vec![running()]);
    let sessions = FakeSessions {
        send_error: Some("Failed to send message".into()),
        ..FakeSessions::default()
    };
    let orchestrator = StartupOrchestrator::new(control, sessions.clone());

    let err = orchestrator.start_session(&request()).await.unwrap_err();

    assert!(matches!(err, Error::Operation(_)));
    assert_eq!(err.to_string(), "Failed to send message");
    assert_eq!(sessions.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn session_directory_flows_into_url() {
    let control = ScriptedControl::new(vec![running()]);
    let orchestrator = StartupOrchestrator::new(control, FakeSessions::default());
    let mut request = request();
    request.directory = Some("/home/dev/app".into());

    let started = orchestrator.start_session(&request).await.unwrap();
    assert_eq!(
        started.session_url,
        "http://10.0.0.9:3000/L2hvbWUvZGV2L2FwcA/session/ses_1"
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_polling() {
    let control = ScriptedControl::new(vec![creating()]);
    let orchestrator = StartupOrchestrator::new(control.clone(), FakeSessions::default());
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        canceller.cancel();
    });

    let err = orchestrator
        .start_session_until(&request(), &token)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(control.gets(), 3);
}

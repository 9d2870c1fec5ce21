//! A real homectl router on a loopback port, backed by in-memory fakes.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use homectl::address::BroadcastTarget;
use homectl::probe::{EchoSocket, Pinger};
use homectl::ssh::{PassphrasePrompt, RemoteExecutor, RemoteHost};
use homectl::wake::PacketSender;
use homectl::{ActionError, AppState, Config, Dispatcher};

pub const KEY: &str = "remote-test-key";

#[derive(Default)]
struct CountingSender {
    sent: AtomicUsize,
}

#[async_trait]
impl PacketSender for CountingSender {
    async fn send_to(&self, _payload: &[u8], _target: BroadcastTarget) -> io::Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FixedPinger {
    replies: bool,
}

struct FixedSocket {
    replies: bool,
}

impl EchoSocket for FixedSocket {
    fn send_request(&mut self, _sequence: u16) -> io::Result<()> {
        Ok(())
    }

    fn wait_reply(&mut self, timeout: Duration) -> io::Result<bool> {
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(self.replies)
    }
}

impl Pinger for FixedPinger {
    fn open(&self, _host: &str) -> Result<Box<dyn EchoSocket>, ActionError> {
        Ok(Box::new(FixedSocket {
            replies: self.replies,
        }))
    }
}

#[derive(Default)]
struct RecordingExecutor {
    runs: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn run(
        &self,
        remote: &RemoteHost,
        command: &str,
        _prompt: Option<Arc<PassphrasePrompt>>,
    ) -> Result<(), ActionError> {
        self.runs
            .lock()
            .unwrap()
            .push((remote.addr(), command.to_string()));
        Ok(())
    }
}

pub struct Served {
    pub base_url: String,
    sender: Arc<CountingSender>,
    executor: Arc<RecordingExecutor>,
}

impl Served {
    pub fn sent_packets(&self) -> usize {
        self.sender.sent.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.executor.runs.lock().unwrap().clone()
    }
}

/// Serve the full API on `127.0.0.1:0`. The probe answers `online`.
pub async fn serve(online: bool) -> Served {
    let mut config = Config::default();
    config.auth.api_key = KEY.to_string();
    config.probe.tick_ms = 20;
    config.probe.echo_interval_ms = 10;
    config.probe.staleness_ms = 200;
    config.probe.status_timeout_ms = 60;

    let sender = Arc::new(CountingSender::default());
    let executor = Arc::new(RecordingExecutor::default());
    let dispatcher = Dispatcher::new(
        sender.clone(),
        Arc::new(FixedPinger { replies: online }),
        executor.clone(),
        &config,
    );
    let app = homectl::routes::router(AppState::new(config, dispatcher));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Served {
        base_url: format!("http://{addr}"),
        sender,
        executor,
    }
}

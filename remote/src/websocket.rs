//! WebSocket client for `/api/status-stream`.
//!
//! The server sends one text frame per probe tick, either
//! `{"is_online": bool}` or, once before closing, `{"error", "code"}`.
//! [`follow`] hands each update to a callback until the callback breaks,
//! the shutdown future resolves, or the server closes the stream.

use std::future::Future;
use std::ops::ControlFlow;

use futures_util::StreamExt;
use homectl::routes::StatusData;
use reqwest::Url;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Build the status-stream URL from the HTTP base URL.
pub fn build_ws_url(base_url: &str, host: &str, token: Option<&str>) -> Result<String, String> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if base.starts_with("https://") {
        base.replacen("https://", "wss://", 1)
    } else if base.starts_with("http://") {
        base.replacen("http://", "ws://", 1)
    } else {
        return Err(format!("Invalid URL scheme: {base}"));
    };
    let mut url = Url::parse(&format!("{ws_base}/api/status-stream"))
        .map_err(|e| format!("Invalid URL {base}: {e}"))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("host", host);
        if let Some(token) = token {
            query.append_pair("token", token);
        }
    }
    Ok(url.into())
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Update(bool),
    Failed { message: String, code: String },
}

#[derive(Deserialize)]
struct ErrorFrame {
    error: String,
    #[serde(default)]
    code: String,
}

pub fn parse_frame(text: &str) -> Result<StreamEvent, String> {
    if let Ok(StatusData { is_online }) = serde_json::from_str(text) {
        return Ok(StreamEvent::Update(is_online));
    }
    serde_json::from_str::<ErrorFrame>(text)
        .map(|e| StreamEvent::Failed {
            message: e.error,
            code: e.code,
        })
        .map_err(|_| format!("Unexpected status frame: {text}"))
}

/// Connect to `url` and feed every update to `on_update`.
///
/// Returns `Ok(())` when `on_update` breaks, `shutdown` resolves, or the
/// server closes cleanly. An error frame from the server becomes `Err`.
pub async fn follow<F, S>(url: &str, mut on_update: F, shutdown: S) -> Result<(), String>
where
    F: FnMut(bool) -> ControlFlow<()>,
    S: Future<Output = ()>,
{
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| format!("WebSocket connect failed: {e}"))?;
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            () = &mut shutdown => break Ok(()),
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_frame(&text)? {
                    StreamEvent::Update(online) => {
                        if on_update(online).is_break() {
                            break Ok(());
                        }
                    }
                    StreamEvent::Failed { message, code } => {
                        break Err(format!("{message} ({code})"));
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Status stream closed by server");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(format!("WebSocket error: {e}")),
            },
        }
    };
    if let Err(e) = ws.close(None).await {
        debug!("WebSocket close: {e}");
    }
    result
}

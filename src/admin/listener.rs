//! JSON-lines management listener: one request object per line in, one
//! reply object per line out.

use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    select,
    sync::watch,
};
use tracing::{debug, error, info};

use super::{AdminError, ManagementService};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Longest request line accepted, newline included.
pub const MAX_REQUEST_LINE: usize = 4 * 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- Requests --------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminRequest {
    List,
    Status {
        account: String,
        node_id: String,
    },
    Disconnect {
        account: String,
        node_id: String,
    },
    Stats,
    Job {
        account: String,
        node_id: String,
        directive: String,
        #[serde(default)]
        payload: Value,
        timeout_ms: Option<u64>,
    },
    Publish {
        topic: String,
        #[serde(default)]
        key: String,
        record: Value,
    },
}

// -----------------------------------------------------------------------------
// ----- Listener --------------------------------------------------------------

pub async fn serve_management(
    listener: TcpListener,
    service: ManagementService,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("management listening on {}", listener.local_addr()?);

    loop {
        select! {
            biased;

            _ = shutdown.wait_for(|stop| *stop) => {
                info!("management listener stopped");
                break;
            }

            accept_res = listener.accept() => {
                let (stream, peer) = match accept_res {
                    Ok(v) => v,
                    Err(e) => { error!("management accept error: {e}"); continue; }
                };

                let service = service.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    if let Err(e) = serve_lines(reader, writer, &service).await {
                        debug!("management client {peer} error: {e}");
                    }
                });
            }
        }
    }

    Ok(())
}

/// Answer requests from `reader` until it closes. A line longer than
/// [`MAX_REQUEST_LINE`] gets one error reply and ends the conversation.
pub async fn serve_lines<R, W>(
    reader: R,
    writer: W,
    service: &ManagementService,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    serve_lines_with_limit(reader, writer, service, MAX_REQUEST_LINE).await
}

async fn serve_lines_with_limit<R, W>(
    reader: R,
    mut writer: W,
    service: &ManagementService,
    max_line: usize,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(max_line as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;

        if read == 0 {
            return Ok(());
        }

        if line.len() > max_line {
            let err = AdminError::BadRequest(format!("request line exceeds {max_line} bytes"));
            write_reply(&mut writer, &failure(&err)).await?;
            return Ok(());
        }

        let text = String::from_utf8_lossy(&line);
        if text.trim().is_empty() {
            continue;
        }

        let reply = handle_line(text.trim(), service).await;
        write_reply(&mut writer, &reply).await?;
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn handle_line(line: &str, service: &ManagementService) -> Value {
    let request: AdminRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return failure(&AdminError::BadRequest(e.to_string())),
    };

    let result = match request {
        AdminRequest::List => to_value(service.list_connections()),

        AdminRequest::Status { account, node_id } => service
            .connection_status(&account, &node_id)
            .and_then(to_value),

        AdminRequest::Disconnect { account, node_id } => {
            service.disconnect(&account, &node_id).and_then(to_value)
        }

        AdminRequest::Stats => to_value(service.stats()),

        AdminRequest::Job {
            account,
            node_id,
            directive,
            payload,
            timeout_ms,
        } => service
            .submit_job(
                &account,
                &node_id,
                &directive,
                &payload,
                timeout_ms.map(Duration::from_millis),
            )
            .await
            .and_then(to_value),

        AdminRequest::Publish { topic, key, record } => service
            .publish(&topic, &key, &record)
            .await
            .and_then(to_value),
    };

    match result {
        Ok(value) => json!({ "ok": true, "result": value }),
        Err(e) => failure(&e),
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Value) -> std::io::Result<()> {
    let mut out = reply.to_string();
    out.push('\n');
    writer.write_all(out.as_bytes()).await?;
    writer.flush().await
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, AdminError> {
    serde_json::to_value(value).map_err(|e| AdminError::BadRequest(e.to_string()))
}

fn failure(err: &AdminError) -> Value {
    json!({
        "ok": false,
        "error": { "kind": err.kind(), "message": err.to_string() },
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::gateway::Gateway;
    use crate::queue::LoggingPublisher;
    use std::sync::Arc;

    async fn ask(service: &ManagementService, lines: &str) -> Vec<Value> {
        let mut out = Vec::new();
        serve_lines(lines.as_bytes(), &mut out, service).await.unwrap();

        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn service() -> ManagementService {
        ManagementService::new(Gateway::new(&Settings::default(), Arc::new(LoggingPublisher)))
    }

    #[tokio::test]
    async fn one_reply_per_request() {
        let service = service();
        let replies = ask(
            &service,
            "{\"op\":\"list\"}\n\n{\"op\":\"status\",\"account\":\"1234\",\"node_id\":\"345\"}\n",
        )
        .await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], json!({"ok": true, "result": {"connections": {}}}));
        assert_eq!(replies[1]["result"]["status"], "disconnected");
    }

    #[tokio::test]
    async fn unknown_op_is_a_bad_request() {
        let service = service();
        let replies = ask(&service, "{\"op\":\"reboot\"}\nnot json\n").await;

        assert_eq!(replies[0]["ok"], false);
        assert_eq!(replies[0]["error"]["kind"], "bad_request");
        assert_eq!(replies[1]["error"]["kind"], "bad_request");
    }

    #[tokio::test]
    async fn job_errors_carry_the_gateway_kind() {
        let service = service();
        let replies = ask(
            &service,
            "{\"op\":\"job\",\"account\":\"1234\",\"node_id\":\"999\",\"directive\":\"ping\"}\n",
        )
        .await;

        assert_eq!(replies[0]["error"]["kind"], "target_not_connected");
    }

    #[tokio::test]
    async fn overlong_line_is_refused_and_ends_the_conversation() {
        let service = service();
        let input = format!("{}\n{{\"op\":\"list\"}}\n", "x".repeat(100));

        let mut out = Vec::new();
        serve_lines_with_limit(input.as_bytes(), &mut out, &service, 64)
            .await
            .unwrap();

        let replies: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["error"]["kind"], "bad_request");
    }

    #[tokio::test]
    async fn line_at_the_limit_is_served() {
        let service = service();
        let request = "{\"op\":\"list\"}";

        let mut out = Vec::new();
        serve_lines_with_limit(format!("{request}\n").as_bytes(), &mut out, &service, request.len() + 1)
            .await
            .unwrap();

        let reply: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(reply["ok"], true);
    }

    #[tokio::test]
    async fn publish_op_reaches_the_bus() {
        let bus = Arc::new(crate::queue::LocalBus::new());
        let mut jobs = bus.subscribe("jobs", 4);
        let service = ManagementService::new(Gateway::new(&Settings::default(), bus));

        let replies = ask(
            &service,
            "{\"op\":\"publish\",\"topic\":\"jobs\",\"key\":\"j-1\",\"record\":{\"a\":1}}\n",
        )
        .await;

        assert_eq!(replies[0]["result"]["topic"], "jobs");
        assert_eq!(&jobs.recv().await.unwrap().payload[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn stats_reply_is_the_counter_snapshot() {
        let service = service();
        let replies = ask(&service, "{\"op\":\"stats\"}\n").await;

        assert!(replies[0]["result"]["jobs_dispatched"].is_u64());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------

use bytes::{Bytes, BytesMut};
use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    path::Path,
    process::Command,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf},
    time::{sleep, timeout},
};

use receptor_gateway::{
    Gateway, ReceptorController,
    config::Settings,
    queue::{LoggingPublisher, QueuePublisher},
    shared_types::ResponseStatus,
    wire_protocol::{
        ControlCode, ControlFrame, HandshakeFrame, JobRequestFrame, ProtocolMessage,
        ResponseFrame, WireSerializable, peek_frame,
    },
};

const READ_DEADLINE: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------------
// ----- In-process gateway ----------------------------------------------------

#[allow(dead_code)]
pub struct TestGateway {
    pub gateway: Arc<Gateway>,
    pub addr: SocketAddr,
}

#[allow(dead_code)]
pub async fn start_gateway(settings: Settings) -> TestGateway {
    start_gateway_with(settings, Arc::new(LoggingPublisher)).await
}

#[allow(dead_code)]
pub async fn start_gateway_with(settings: Settings, publisher: Arc<dyn QueuePublisher>) -> TestGateway {
    let gateway = Gateway::new(&settings, publisher);
    gateway.start_sweeper();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind agent listener");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(ReceptorController::new(gateway.clone()).serve(listener));

    TestGateway { gateway, addr }
}

// -----------------------------------------------------------------------------
// ----- Fake agent ------------------------------------------------------------

/// Speaks the agent side of the wire protocol over TCP.
#[allow(dead_code)]
pub struct FakeAgent {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    inbox: BytesMut,
}

#[allow(dead_code)]
impl FakeAgent {
    /// Connect, handshake, and wait for HandshakeOk.
    pub async fn connect(addr: SocketAddr, account: &str, node_id: &str) -> FakeAgent {
        let mut agent = Self::connect_raw(addr).await;
        agent
            .send(&HandshakeFrame::new(account, node_id, "test-agent/1.0").to_bytes())
            .await;

        match agent.next_message().await {
            Some(ProtocolMessage::Control(frame)) if frame.code == ControlCode::HandshakeOk => {}
            other => panic!("expected HandshakeOk, got {other:?}"),
        }

        agent
    }

    pub async fn connect_raw(addr: SocketAddr) -> FakeAgent {
        let stream = TcpStream::connect(addr).await.expect("connect to gateway");
        let (reader, writer) = stream.into_split();

        FakeAgent {
            reader,
            writer,
            inbox: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, frame: &[u8]) {
        self.writer.write_all(frame).await.expect("write to gateway");
    }

    /// Next decoded frame, or None once the gateway closes the socket.
    pub async fn next_message(&mut self) -> Option<ProtocolMessage> {
        loop {
            if let Some(header) = peek_frame(&self.inbox, usize::MAX).expect("gateway sent garbage") {
                let frame = self.inbox.split_to(header.total_len).freeze();
                return Some(ProtocolMessage::decode(frame).expect("gateway sent a bad frame"));
            }

            let read = timeout(READ_DEADLINE, self.reader.read_buf(&mut self.inbox))
                .await
                .expect("gateway went quiet");

            match read {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Skip keepalives until a job request shows up.
    pub async fn next_job(&mut self) -> JobRequestFrame {
        loop {
            match self.next_message().await {
                Some(ProtocolMessage::JobRequest(job)) => return job,
                Some(ProtocolMessage::Control(frame)) if frame.code == ControlCode::Ping => {}
                other => panic!("expected a job request, got {other:?}"),
            }
        }
    }

    pub async fn respond(&mut self, job: &JobRequestFrame, payload: impl Into<Bytes>) {
        let frame = ResponseFrame::new(job.correlation_id, ResponseStatus::Ok, payload);
        self.send(&frame.to_bytes()).await;
    }

    /// Drain frames until the gateway closes the socket; returns whether a
    /// Disconnect notice was seen first.
    pub async fn wait_closed(&mut self) -> bool {
        let mut saw_disconnect = false;
        while let Some(message) = self.next_message().await {
            if let ProtocolMessage::Control(frame) = message {
                if frame == ControlFrame::new(ControlCode::Disconnect) {
                    saw_disconnect = true;
                }
            }
        }
        saw_disconnect
    }
}

// -----------------------------------------------------------------------------
// ----- Binary ----------------------------------------------------------------

#[allow(dead_code)]
pub fn reserve_port(host: &str) -> u16 {
    let addr = format!("{host}:0");
    let listener = StdTcpListener::bind(&addr).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

#[allow(dead_code)]
pub fn spawn_gateway(host: &str, port: u16, mgmt_port: u16, config: &Path) -> std::process::Child {
    let exe = env!("CARGO_BIN_EXE_receptor-gateway");

    Command::new(exe)
        .env("RECEPTOR_HOST", host)
        .env("RECEPTOR_PORT", port.to_string())
        .env("RECEPTOR_MGMT_HOST", host)
        .env("RECEPTOR_MGMT_PORT", mgmt_port.to_string())
        .env("RECEPTOR_CONFIG_FILE", config)
        .env_remove("RECEPTOR_TLS_CERT")
        .env_remove("RECEPTOR_TLS_KEY")
        .arg("--log")
        .arg("warn")
        .spawn()
        .expect("spawn receptor-gateway")
}

#[allow(dead_code)]
pub async fn wait_for_listen(host: &str, port: u16) {
    let addr = format!("{host}:{port}");
    for _ in 0..100 {
        if std::net::TcpStream::connect(&addr).is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("receptor-gateway did not start listening on {addr}");
}

// -----------------------------------------------------------------------------
// ----- Management client -----------------------------------------------------

#[allow(dead_code)]
pub struct MgmtClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

#[allow(dead_code)]
impl MgmtClient {
    pub async fn connect(host: &str, port: u16) -> MgmtClient {
        let stream = TcpStream::connect(format!("{host}:{port}"))
            .await
            .expect("connect to management listener");
        let (reader, writer) = stream.into_split();

        MgmtClient {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub async fn ask(&mut self, request: serde_json::Value) -> serde_json::Value {
        let mut line = request.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.expect("send request");

        let reply = timeout(Duration::from_secs(10), self.lines.next_line())
            .await
            .expect("management reply timed out")
            .expect("read reply")
            .expect("management closed the connection");

        serde_json::from_str(&reply).expect("reply is json")
    }
}

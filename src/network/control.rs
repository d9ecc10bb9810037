//! JSON control channel between the visualization side and the robot controller
//!
//! Requests are small JSON objects, one per datagram:
//!
//! ```json
//! {"command": "test_echo", "data": "hello"}
//! ```
//!
//! The server answers each request with one or more responses sent back to
//! the first peer address it accepted traffic from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{MAX_DATAGRAM, SHUTDOWN_JOIN_TIMEOUT};
use crate::error::NetworkError;
use crate::network::join_bounded;
use crate::network::udp::{create_socket, wake_receiver, SocketOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ControlRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Acknowledged,
    InProgress,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: ResponseStatus,
    pub command: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_ip: Option<String>,
}

impl ControlResponse {
    fn new(status: ResponseStatus, command: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            command: command.to_string(),
            message: message.into(),
            timestamp: None,
            echo_data: None,
            robot_status: None,
            connection: None,
            controller_ip: None,
            robot_ip: None,
        }
    }
}

/// Addresses the controller reports about itself.
#[derive(Debug, Clone, Default)]
pub struct ControllerIdentity {
    pub controller_ip: String,
    pub robot_ip: String,
}

/// Build the responses for one request, in send order.
pub fn handle_request(request: &ControlRequest, identity: &ControllerIdentity) -> Vec<ControlResponse> {
    let command = request.command.as_str();
    match command {
        "ping" => {
            let mut r = ControlResponse::new(
                ResponseStatus::Success,
                command,
                "pong from robot controller",
            );
            r.timestamp = Some(chrono::Local::now().to_rfc3339());
            r.controller_ip = Some(identity.controller_ip.clone());
            r.robot_ip = Some(identity.robot_ip.clone());
            vec![r]
        }
        "test_echo" => {
            let text = match &request.data {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let mut r = ControlResponse::new(
                ResponseStatus::Success,
                command,
                format!("Echoed from robot controller: {}", text),
            );
            r.echo_data = Some(request.data.clone());
            vec![r]
        }
        "get_status" => {
            let mut r =
                ControlResponse::new(ResponseStatus::Success, command, "Robot controller is ready");
            r.robot_status = Some("idle".to_string());
            r.connection = Some("active".to_string());
            r.controller_ip = Some(identity.controller_ip.clone());
            r.robot_ip = Some(identity.robot_ip.clone());
            vec![r]
        }
        "shake_hand" => vec![
            ControlResponse::new(
                ResponseStatus::Acknowledged,
                command,
                "Handshake command received, preparing robot",
            ),
            ControlResponse::new(
                ResponseStatus::InProgress,
                command,
                "Robot hand extended, waiting for player",
            ),
            ControlResponse::new(
                ResponseStatus::Completed,
                command,
                "Handshake completed, robot returning to idle",
            ),
        ],
        other => vec![ControlResponse::new(
            ResponseStatus::Error,
            other,
            format!("Unknown command: {}", other),
        )],
    }
}

/// Control server options.
#[derive(Debug, Clone)]
pub struct ControlServerConfig {
    pub bind: SocketAddr,
    /// Only datagrams from this address are answered.
    pub peer_ip: Option<IpAddr>,
    /// Pause between staged responses of a multi-step command.
    pub stage_interval: Duration,
    pub identity: ControllerIdentity,
}

/// Answers control requests on a dedicated thread.
pub struct ControlServer {
    local_addr: SocketAddr,
    close_requested: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ControlServer {
    pub fn start(config: ControlServerConfig) -> Result<Self, NetworkError> {
        let options = SocketOptions::default();
        let socket = Arc::new(create_socket(config.bind, &options)?);
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let close_requested = Arc::new(AtomicBool::new(false));

        let handle = {
            let socket = socket.clone();
            let close_requested = close_requested.clone();
            thread::Builder::new()
                .name("control-server".to_string())
                .spawn(move || serve(socket, close_requested, config))
                .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?
        };

        tracing::info!("Control server listening on {}", local_addr);

        Ok(Self {
            local_addr,
            close_requested,
            thread_handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server thread. Returns `true` once it has exited cleanly.
    pub fn stop(&mut self) -> bool {
        self.close_requested.store(true, Ordering::Release);
        match self.thread_handle.take() {
            Some(handle) => {
                // The loop needs a source address per datagram, so wake it
                // with traffic instead of shutting the socket down.
                wake_receiver(self.local_addr);
                join_bounded("control-server", handle, SHUTDOWN_JOIN_TIMEOUT)
            }
            None => true,
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(socket: Arc<UdpSocket>, close_requested: Arc<AtomicBool>, config: ControlServerConfig) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut peer: Option<SocketAddr> = None;

    while !close_requested.load(Ordering::Acquire) {
        let (len, source) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                if !close_requested.load(Ordering::Acquire) {
                    tracing::warn!("Control receive error: {}", e);
                    thread::sleep(Duration::from_millis(10));
                }
                continue;
            }
        };
        if close_requested.load(Ordering::Acquire) {
            break;
        }

        if let Some(expected) = config.peer_ip {
            if source.ip() != expected {
                tracing::warn!("Control message from unexpected address {}", source.ip());
                continue;
            }
        }
        let reply_to = *peer.get_or_insert_with(|| {
            tracing::info!("Control peer connected from {}", source);
            source
        });

        let request: ControlRequest = match serde_json::from_slice(&buf[..len]) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Control message decode error: {}", e);
                continue;
            }
        };
        tracing::debug!("Control request: {:?}", request);

        let responses = handle_request(&request, &config.identity);
        if responses.len() == 1 {
            send_response(&socket, reply_to, &responses[0]);
        } else {
            // Staged replies go out from their own thread so the loop keeps receiving.
            let socket = socket.clone();
            let interval = config.stage_interval;
            let spawned = thread::Builder::new()
                .name("control-stages".to_string())
                .spawn(move || {
                    for (i, response) in responses.iter().enumerate() {
                        if i > 0 {
                            thread::sleep(interval);
                        }
                        send_response(&socket, reply_to, response);
                    }
                });
            if let Err(e) = spawned {
                tracing::error!("Failed to spawn staged reply: {}", e);
            }
        }
    }

    tracing::debug!("Control server exited");
}

fn send_response(socket: &UdpSocket, to: SocketAddr, response: &ControlResponse) {
    match serde_json::to_vec(response) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, to) {
                tracing::warn!("Control send to {} failed: {}", to, e);
            }
        }
        Err(e) => tracing::error!("Control response encode error: {}", e),
    }
}

/// Client side of the control channel.
pub struct ControlClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl ControlClient {
    pub fn connect(server: SocketAddr) -> Result<Self, NetworkError> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket =
            UdpSocket::bind(local).map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        Ok(Self { socket, server })
    }

    pub fn send(&self, request: &ControlRequest) -> Result<(), NetworkError> {
        let bytes =
            serde_json::to_vec(request).map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        self.socket
            .send_to(&bytes, self.server)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Wait up to `timeout` for the next response. Non-JSON replies are skipped.
    pub fn recv(&self, timeout: Duration) -> Result<Option<ControlResponse>, NetworkError> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _)) => match serde_json::from_slice(&buf[..len]) {
                Ok(response) => Ok(Some(response)),
                Err(e) => {
                    tracing::warn!("Control response decode error: {}", e);
                    Ok(None)
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }

    pub fn request(
        &self,
        request: &ControlRequest,
        timeout: Duration,
    ) -> Result<Option<ControlResponse>, NetworkError> {
        self.send(request)?;
        self.recv(timeout)
    }
}

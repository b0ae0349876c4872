use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_derive::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout};

use crate::dispatch::{BulbClient, BulbTarget, ClientError};

/// Port every WiZ bulb listens on.
pub const WIZ_PORT: u16 = 38899;

const MAX_DATAGRAM: usize = 2048;

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    method: &'a str,
    params: P,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct SetPilotParams {
    state: bool,
}

#[derive(Serialize)]
struct RegistrationParams<'a> {
    #[serde(rename = "phoneMac")]
    phone_mac: &'a str,
    register: bool,
    #[serde(rename = "phoneIp")]
    phone_ip: &'a str,
    id: &'a str,
}

/// Bulb replies carry either `result` or `error`, never both. The result
/// keys depend on the method, so everything is optional here.
#[derive(Debug, Deserialize)]
struct RpcReply {
    result: Option<RpcResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    state: Option<bool>,
    success: Option<bool>,
    mac: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Datagram client for the bulbs' JSON-RPC dialect. One fresh socket per
/// call; the bulb's reply (or the lack of one) settles the call within
/// `call_timeout`.
pub struct WizClient {
    call_timeout: Duration,
}

impl WizClient {
    pub fn new(call_timeout: Duration) -> Self {
        WizClient { call_timeout }
    }

    async fn request<P: serde::Serialize>(
        &self,
        addr: SocketAddr,
        request: &RpcRequest<'_, P>,
    ) -> Result<RpcResult, ClientError> {
        let payload = serde_json::to_vec(request)?;
        let bind_addr: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        // Connected, so the kernel drops datagrams from anyone but the bulb.
        socket.connect(addr).await?;
        socket.send(&payload).await?;

        let mut buf = [0u8; MAX_DATAGRAM];
        let len = timeout(self.call_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ClientError::Timeout(self.call_timeout))??;

        let reply: RpcReply = serde_json::from_slice(&buf[..len])?;
        if let Some(error) = reply.error {
            return Err(ClientError::Transport(format!(
                "device error {}: {}",
                error.code, error.message
            )));
        }
        reply
            .result
            .ok_or_else(|| ClientError::Transport("reply carried no result".into()))
    }

    async fn set_pilot(&self, target: &BulbTarget, on: bool) -> Result<(), ClientError> {
        let request = RpcRequest {
            method: "setPilot",
            params: SetPilotParams { state: on },
        };
        let result = self.request(target.addr, &request).await?;
        if result.success == Some(true) {
            Ok(())
        } else {
            Err(ClientError::Transport(
                "device did not acknowledge the command".into(),
            ))
        }
    }
}

#[async_trait]
impl BulbClient for WizClient {
    async fn power_state(&self, target: &BulbTarget) -> Result<bool, ClientError> {
        let request = RpcRequest {
            method: "getPilot",
            params: Empty {},
        };
        let result = self.request(target.addr, &request).await?;
        result
            .state
            .ok_or_else(|| ClientError::Transport("reply carried no power state".into()))
    }

    async fn turn_on(&self, target: &BulbTarget) -> Result<(), ClientError> {
        self.set_pilot(target, true).await
    }

    async fn turn_off(&self, target: &BulbTarget) -> Result<(), ClientError> {
        self.set_pilot(target, false).await
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveredBulb {
    pub addr: SocketAddr,
    pub mac: Option<String>,
}

/// Broadcasts a registration probe and collects every bulb that answers
/// within `wait`. Replies are deduplicated by source address; a quiet
/// network yields an empty list, not an error.
pub async fn discover(
    broadcast: Ipv4Addr,
    port: u16,
    wait: Duration,
) -> Result<Vec<DiscoveredBulb>, ClientError> {
    let request = RpcRequest {
        method: "registration",
        params: RegistrationParams {
            phone_mac: "AAAAAAAAAAAA",
            register: false,
            phone_ip: "1.2.3.4",
            id: "1",
        },
    };
    let payload = serde_json::to_vec(&request)?;

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    socket.send_to(&payload, (broadcast, port)).await?;

    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let deadline = Instant::now() + wait;
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        let (len, peer) = match timeout(left, socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => break,
        };
        if !seen.insert(peer) {
            continue;
        }
        debug!("Registration reply from {peer}");
        let mac = serde_json::from_slice::<RpcReply>(&buf[..len])
            .ok()
            .and_then(|reply| reply.result)
            .and_then(|result| result.mac);
        found.push(DiscoveredBulb { addr: peer, mac });
    }
    Ok(found)
}

//! Socket.IO event handlers.
//!
//! Event names and payloads mirror the wire protocol: every request is
//! answered through its ack with a DTO whose `error` field is `""` on
//! success. Malformed payloads ack the operation's DTO with an
//! invalid-request phrase instead of dropping the event.

use std::sync::Arc;

use link_types::{
    BooleanStateResponse, DriveToDepthResponse, PositionalResponse, SetCanWriteRequest,
    SetDepthRequest, SetPositionRequest, ShankCountResponse,
};
use serde_json::Value;
use socketioxide::extract::{AckSender, Data, SocketRef};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::LinkError;
use crate::manipulator::ServerEvent;
use crate::platform::Platform;
use crate::session::SessionGate;

pub type SharedPlatform = Arc<Platform>;
pub type SharedGate = Arc<SessionGate>;
/// The one connected client socket, for server-emitted events.
pub type ClientSlot = Arc<RwLock<Option<SocketRef>>>;

/// Forward out-of-band platform events to the connected client.
pub fn spawn_event_pump(client: ClientSlot, mut events: UnboundedReceiver<ServerEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::WriteDisabled(manipulator_id) => {
                    if let Some(socket) = client.read().await.clone() {
                        info!("Emitting write_disabled for manipulator {manipulator_id}");
                        let _ = socket.emit("write_disabled", &manipulator_id);
                    }
                }
            }
        }
    });
}

/// Accept both a bare id string and an object payload naming the id.
fn manipulator_id_from(data: &Value) -> Option<String> {
    data.as_str()
        .map(str::to_string)
        .or_else(|| data["manipulator_id"].as_str().map(str::to_string))
}

fn missing_id() -> LinkError {
    LinkError::InvalidRequest("payload is missing the manipulator id".to_string())
}

// ── Main connection handler ───────────────────────────────────────────────────

pub async fn on_connect(
    socket: SocketRef,
    platform: SharedPlatform,
    gate: SharedGate,
    client: ClientSlot,
) {
    let socket_id = socket.id.to_string();

    if !gate.try_connect(&socket_id).await {
        warn!("Connection refused for {socket_id}: another client is already connected");
        let _ = socket.emit("error", "Another client is already connected");
        socket.disconnect().ok();
        return;
    }
    info!("Client connected: {socket_id}");
    *client.write().await = Some(socket.clone());

    // Cleanup on disconnect: release the session and reset the platform.
    socket.on_disconnect({
        let gate = gate.clone();
        let platform = platform.clone();
        let client = client.clone();
        let sid = socket_id.clone();
        move |_: SocketRef| async move {
            if gate.disconnect(&sid).await {
                info!("Client disconnected: {sid} — resetting platform");
                *client.write().await = None;
                platform.reset().await;
            } else {
                warn!("Client {sid} disconnected without being connected");
            }
        }
    });

    // ── get_version ───────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        socket.on("get_version", move |_: SocketRef, ack: AckSender| async move {
            let _ = ack.send(&env!("CARGO_PKG_VERSION"));
        });
    }

    // ── get_platform_info ─────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on("get_platform_info", move |_: SocketRef, ack: AckSender| {
            let platform = platform.clone();
            async move {
                let _ = ack.send(&platform.get_platform_info().await);
            }
        });
    }

    // ── get_manipulators ──────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on("get_manipulators", move |_: SocketRef, ack: AckSender| {
            let platform = platform.clone();
            async move {
                let _ = ack.send(&platform.get_manipulators().await);
            }
        });
    }

    // ── register_manipulator ──────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "register_manipulator",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let error = match manipulator_id_from(&data) {
                        Some(id) => platform.register_manipulator(&id).await,
                        None => missing_id().to_string(),
                    };
                    let _ = ack.send(&error);
                }
            },
        );
    }

    // ── unregister_manipulator ────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "unregister_manipulator",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let error = match manipulator_id_from(&data) {
                        Some(id) => platform.unregister_manipulator(&id).await,
                        None => missing_id().to_string(),
                    };
                    let _ = ack.send(&error);
                }
            },
        );
    }

    // ── get_position ──────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "get_position",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let response = match manipulator_id_from(&data) {
                        Some(id) => platform.get_position(&id).await,
                        None => PositionalResponse::err(missing_id()),
                    };
                    let _ = ack.send(&response);
                }
            },
        );
    }

    // ── get_angles ────────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "get_angles",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let response = match manipulator_id_from(&data) {
                        Some(id) => platform.get_angles(&id).await,
                        None => link_types::AngularResponse::err(missing_id()),
                    };
                    let _ = ack.send(&response);
                }
            },
        );
    }

    // ── get_shank_count ───────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "get_shank_count",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let response = match manipulator_id_from(&data) {
                        Some(id) => platform.get_shank_count(&id).await,
                        None => ShankCountResponse::err(missing_id()),
                    };
                    let _ = ack.send(&response);
                }
            },
        );
    }

    // ── set_position ──────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "set_position",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let response = match serde_json::from_value::<SetPositionRequest>(data) {
                        Ok(request) => platform.set_position(request).await,
                        Err(e) => {
                            PositionalResponse::err(LinkError::InvalidRequest(e.to_string()))
                        }
                    };
                    let _ = ack.send(&response);
                }
            },
        );
    }

    // ── set_depth ─────────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "set_depth",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let response = match serde_json::from_value::<SetDepthRequest>(data) {
                        Ok(request) => platform.set_depth(request).await,
                        Err(e) => {
                            DriveToDepthResponse::err(LinkError::InvalidRequest(e.to_string()))
                        }
                    };
                    let _ = ack.send(&response);
                }
            },
        );
    }

    // ── set_inside_brain ──────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "set_inside_brain",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let response =
                        match serde_json::from_value::<link_types::InsideBrainRequest>(data) {
                            Ok(request) => platform.set_inside_brain(request).await,
                            Err(e) => {
                                BooleanStateResponse::err(LinkError::InvalidRequest(e.to_string()))
                            }
                        };
                    let _ = ack.send(&response);
                }
            },
        );
    }

    // ── set_can_write ─────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "set_can_write",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let response = match serde_json::from_value::<SetCanWriteRequest>(data) {
                        Ok(request) => platform.set_can_write(request).await,
                        Err(e) => {
                            BooleanStateResponse::err(LinkError::InvalidRequest(e.to_string()))
                        }
                    };
                    let _ = ack.send(&response);
                }
            },
        );
    }

    // ── calibrate ─────────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "calibrate",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let error = match manipulator_id_from(&data) {
                        Some(id) => platform.calibrate(&id).await,
                        None => missing_id().to_string(),
                    };
                    let _ = ack.send(&error);
                }
            },
        );
    }

    // ── stop ──────────────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on(
            "stop",
            move |_: SocketRef, Data::<Value>(data), ack: AckSender| {
                let platform = platform.clone();
                async move {
                    let error = match manipulator_id_from(&data) {
                        Some(id) => platform.stop(&id).await,
                        None => missing_id().to_string(),
                    };
                    let _ = ack.send(&error);
                }
            },
        );
    }

    // ── stop_all ──────────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let platform = platform.clone();
        socket.on("stop_all", move |_: SocketRef, ack: AckSender| {
            let platform = platform.clone();
            async move {
                let _ = ack.send(&platform.stop_all().await);
            }
        });
    }

    info!("All handlers registered for socket {socket_id}");
}

use std::time::Duration;

use chrono::Utc;
use ocpp_overlay_core::{
    format::{
        envelope::ResponseEnvelope,
        error::ProtocolError,
        frame::{CallResult, Encode, OverlayHeader},
        message::{CallResponse, OcppMessage},
    },
    overlay::{Destination, NetworkPath, NetworkingMode},
    v21::{
        messages::{
            heartbeat::{HeartbeatRequest, HeartbeatResponse},
            reset::ResetRequest,
        },
        types::ResetType,
    },
};
use ocpp_overlay_node::{
    CallOptions, CallOutcomeExt, NodeBuilder, NodeError, NodeEvent, ResultCode, Verdict,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::harness::{
    channel::{connect, RawPeer},
    network::{expect_event, init_logger, settle, Network, CONTROLLER, CSMS, STATION},
};

fn csms_with_raw_controller() -> (ocpp_overlay_node::Node, RawPeer) {
    init_logger();
    let csms = NodeBuilder::csms(CSMS).call_timeout(2).build();
    let controller = RawPeer::attach(&csms, CONTROLLER, NetworkingMode::OverlayNetwork);
    (csms, controller)
}

async fn expect_call(peer: &RawPeer) -> String {
    match peer.recv().await {
        OcppMessage::Call(call) => {
            let header = call.header.expect("overlay call carries a header");
            assert_eq!(header.network_path.hops(), &[CSMS.into()]);
            call.unique_id
        }
        other => panic!("expected a call, got {other:?}"),
    }
}

fn heartbeat_result(unique_id: &str) -> String {
    CallResult {
        unique_id: unique_id.to_string(),
        payload: json!({ "currentTime": Utc::now() }),
        header: Some(OverlayHeader {
            destination: Destination::direct(CSMS),
            network_path: NetworkPath::from_source(CONTROLLER.into()),
        }),
    }
    .encode()
}

pub async fn timeout_clears_pending() {
    let (csms, _controller) = csms_with_raw_controller();
    let res = csms
        .call_with(
            Destination::direct(CONTROLLER),
            HeartbeatRequest {},
            CallOptions::timeout(Duration::from_millis(100)),
        )
        .await;
    assert_eq!(res.result_code(), ResultCode::Timeout);
    assert_eq!(csms.pending_requests(), 0);
}

pub async fn cancellation_clears_pending() {
    let (csms, _controller) = csms_with_raw_controller();
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let res = csms
        .call_with(
            Destination::direct(CONTROLLER),
            HeartbeatRequest {},
            CallOptions::cancellable(token),
        )
        .await;
    assert_eq!(res.result_code(), ResultCode::Cancelled);
    assert_eq!(csms.pending_requests(), 0);
}

pub async fn late_response_after_timeout_is_dropped() {
    let (csms, controller) = csms_with_raw_controller();
    let events = csms.subscribe();
    let caller = csms.clone();
    let call = tokio::spawn(async move {
        caller
            .call_with(
                Destination::direct(CONTROLLER),
                HeartbeatRequest {},
                CallOptions::timeout(Duration::from_millis(100)),
            )
            .await
    });
    let unique_id = expect_call(&controller).await;
    assert_eq!(call.await.unwrap().result_code(), ResultCode::Timeout);

    controller.send(heartbeat_result(&unique_id));
    let dropped = expect_event(&events, |e| matches!(e, NodeEvent::FrameDropped { .. })).await;
    assert!(matches!(
        dropped,
        NodeEvent::FrameDropped { request_id: Some(id), .. } if id.as_str() == unique_id
    ));
}

pub async fn duplicate_response_delivered_once() {
    let (csms, controller) = csms_with_raw_controller();
    let events = csms.subscribe();
    let caller = csms.clone();
    let call = tokio::spawn(async move {
        caller
            .call_as::<HeartbeatResponse>(Destination::direct(CONTROLLER), HeartbeatRequest {})
            .await
    });
    let unique_id = expect_call(&controller).await;
    controller.send(heartbeat_result(&unique_id));
    controller.send(heartbeat_result(&unique_id));

    assert!(call.await.unwrap().is_ok());
    settle().await;
    let seen: Vec<NodeEvent> = events.try_iter().collect();
    let delivered = seen
        .iter()
        .filter(|e| matches!(e, NodeEvent::ResponseReceived { .. }))
        .count();
    let dropped = seen
        .iter()
        .filter(|e| {
            matches!(e, NodeEvent::FrameDropped { request_id: Some(id), .. } if id.as_str() == unique_id)
        })
        .count();
    assert_eq!((delivered, dropped), (1, 1));
}

pub async fn response_from_wrong_hop_is_ignored() {
    init_logger();
    let csms = NodeBuilder::csms(CSMS).build();
    let controller = RawPeer::attach(&csms, CONTROLLER, NetworkingMode::OverlayNetwork);
    let intruder = RawPeer::attach(&csms, "lc-2", NetworkingMode::OverlayNetwork);
    let caller = csms.clone();
    let call = tokio::spawn(async move {
        caller
            .call_with(
                Destination::direct(CONTROLLER),
                HeartbeatRequest {},
                CallOptions::timeout(Duration::from_millis(500)),
            )
            .await
    });
    let unique_id = expect_call(&controller).await;
    let forged = CallResult {
        unique_id: unique_id.clone(),
        payload: json!({ "currentTime": Utc::now() }),
        header: Some(OverlayHeader {
            destination: Destination::direct(CSMS),
            network_path: NetworkPath::from_source("lc-2".into()),
        }),
    };
    intruder.send(forged.encode());
    settle().await;
    assert_eq!(csms.pending_requests(), 1);

    controller.send(heartbeat_result(&unique_id));
    assert_eq!(call.await.unwrap().result_code(), ResultCode::Ok);
}

pub async fn link_loss_fails_outstanding_call() {
    let (csms, controller) = csms_with_raw_controller();
    let caller = csms.clone();
    let call = tokio::spawn(async move {
        caller
            .call(Destination::direct(CONTROLLER), HeartbeatRequest {})
            .await
    });
    expect_call(&controller).await;
    drop(controller);

    let res = call.await.unwrap();
    assert_eq!(res.result_code(), ResultCode::NetworkError);
    assert_eq!(csms.pending_requests(), 0);
    assert!(!csms.routing().is_connected(&CONTROLLER.into()));
}

pub async fn relay_after_downlink_loss_reports_route_not_found() {
    let network = Network::new();
    let station_events = network.station.subscribe();
    network.downlink.close();
    settle().await;
    assert!(!network.controller.routing().is_connected(&STATION.into()));

    let res = network
        .csms
        .call(
            Destination::direct(STATION),
            ResetRequest {
                kind: ResetType::Immediate,
                evse_id: None,
            },
        )
        .await;
    assert_eq!(res.result_code(), ResultCode::RouteNotFound);
    assert_eq!(network.controller.pending_requests(), 0);
    assert!(station_events.try_recv().is_err());
}

pub async fn forged_path_is_formation_violation() {
    init_logger();
    let controller = NodeBuilder::networking_node(CONTROLLER).build();
    let csms = RawPeer::attach(&controller, CSMS, NetworkingMode::OverlayNetwork);
    let frame = json!([
        2,
        "forged-1",
        "Heartbeat",
        {},
        { "destination": CONTROLLER, "networkPath": ["mallory"] }
    ]);
    csms.send(frame.to_string());

    match csms.recv().await {
        OcppMessage::CallResponse(CallResponse::CallError(err)) => {
            assert_eq!(err.unique_id, "forged-1");
            assert_eq!(err.error_code, ProtocolError::FormationViolation);
        }
        other => panic!("expected FormationViolation, got {other:?}"),
    }
}

pub async fn malformed_call_is_formation_violation() {
    init_logger();
    let controller = NodeBuilder::networking_node(CONTROLLER).build();
    let csms = RawPeer::attach(&controller, CSMS, NetworkingMode::OverlayNetwork);
    let events = controller.subscribe();

    csms.send(r#"[2,"bad-1","Reset",{"type":"Sideways"},{"destination":"lc-1","networkPath":["csms-1"]}]"#);
    match csms.recv().await {
        OcppMessage::CallResponse(CallResponse::CallError(err)) => {
            assert_eq!(err.unique_id, "bad-1");
            assert_eq!(err.error_code, ProtocolError::FormationViolation);
        }
        other => panic!("expected FormationViolation, got {other:?}"),
    }

    csms.send("not json");
    expect_event(&events, |e| matches!(e, NodeEvent::FrameDropped { request_id: None, .. })).await;
    csms.assert_silent(Duration::from_millis(100)).await;
}

pub async fn caller_sees_remote_call_error() {
    let (csms, controller) = csms_with_raw_controller();
    let caller = csms.clone();
    let call = tokio::spawn(async move {
        caller
            .call(Destination::direct(CONTROLLER), HeartbeatRequest {})
            .await
    });
    let unique_id = expect_call(&controller).await;
    controller.send(
        json!([
            4,
            unique_id,
            "InternalError",
            "boom",
            {},
            { "destination": CSMS, "networkPath": [CONTROLLER] }
        ])
        .to_string(),
    );
    let res = call.await.unwrap();
    assert_eq!(res.result_code(), ResultCode::ProtocolError);
    assert_eq!(
        res.unwrap_err(),
        NodeError::Protocol {
            code: ProtocolError::InternalError,
            description: "boom".into()
        }
    );
}

pub async fn relay_expires_unanswered_requests() {
    init_logger();
    let csms = NodeBuilder::csms(CSMS).call_timeout(5).static_route(STATION, CONTROLLER).build();
    let controller = NodeBuilder::networking_node(CONTROLLER).call_timeout(1).build();
    controller.forwarding().on_request("Reset", |request, _| {
        Verdict::Transform(
            request.payload.clone(),
            std::sync::Arc::new(|response: &ResponseEnvelope| response.payload.clone()),
        )
    });
    let _uplink = connect(&csms, &controller, NetworkingMode::OverlayNetwork);
    let station = RawPeer::attach(&controller, STATION, NetworkingMode::Standard);
    let reset = || ResetRequest {
        kind: ResetType::Immediate,
        evse_id: None,
    };

    for _ in 0..3 {
        let res = csms
            .call_with(
                Destination::direct(STATION),
                reset(),
                CallOptions::timeout(Duration::from_millis(100)),
            )
            .await;
        assert_eq!(res.result_code(), ResultCode::Timeout);
        assert!(matches!(station.recv().await, OcppMessage::Call(_)));
    }
    assert_eq!(controller.pending_requests(), 3);
    assert_eq!(controller.forwarding().pending_transforms(), 3);

    let res = csms.call(Destination::direct(STATION), reset()).await;
    assert_eq!(res.unwrap_err(), NodeError::Timeout);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(controller.pending_requests(), 0);
    assert_eq!(controller.forwarding().pending_transforms(), 0);
    assert_eq!(csms.pending_requests(), 0);
}

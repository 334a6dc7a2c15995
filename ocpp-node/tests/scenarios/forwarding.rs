use std::{sync::Arc, time::Duration};

use ocpp_overlay_core::{
    format::{envelope::ResponseEnvelope, error::ProtocolError},
    overlay::Destination,
    v21::{
        messages::{
            data_transfer::{DataTransferRequest, DataTransferResponse},
            reset::{ResetRequest, ResetResponse},
        },
        types::{DataTransferStatus, ResetStatus, ResetType},
        Request, Response,
    },
};
use ocpp_overlay_node::{
    CallOutcomeExt, DefaultForwarding, ForwardingResult, ImmediateResponse, NodeError, NodeEvent, ResultCode, Verdict,
};
use serde_json::json;

use crate::harness::network::{expect_event, settle, Builders, Network, STATION};

fn reset() -> ResetRequest {
    ResetRequest {
        kind: ResetType::Immediate,
        evse_id: None,
    }
}

fn echo_data_transfer(network: &Network) {
    network.station.on_request("DataTransfer", |_, request| {
        let Request::DataTransfer(req) = &request.payload else {
            unreachable!()
        };
        Ok(Response::DataTransfer(DataTransferResponse {
            status: DataTransferStatus::Accepted,
            data: req.data.clone(),
            status_info: None,
        }))
    });
}

pub async fn drop_by_default_answers_security_error() {
    let network = Network::with(Builders {
        controller: Builders::default()
            .controller
            .default_forwarding(DefaultForwarding::Drop),
        ..Builders::default()
    });
    let controller_events = network.controller.subscribe();
    let station_events = network.station.subscribe();

    let res = network.csms.call(Destination::direct(STATION), reset()).await;
    assert_eq!(res.result_code(), ResultCode::SignatureError);
    assert!(matches!(
        res,
        Err(NodeError::Protocol {
            code: ProtocolError::SecurityError,
            ..
        })
    ));

    let decided = expect_event(&controller_events, |e| matches!(e, NodeEvent::ForwardingDecided { .. })).await;
    assert!(matches!(
        decided,
        NodeEvent::ForwardingDecided {
            result: ForwardingResult::Drop,
            ..
        }
    ));
    settle().await;
    assert!(station_events.try_recv().is_err());
}

pub async fn drop_with_immediate_response() {
    let network = Network::new();
    network.controller.forwarding().drop_action(
        "Reset",
        Some(ImmediateResponse::Response(Response::Reset(ResetResponse {
            status: ResetStatus::Rejected,
            status_info: None,
        }))),
    );
    let res = network
        .csms
        .call_as::<ResetResponse>(Destination::direct(STATION), reset())
        .await
        .unwrap();
    assert_eq!(res.status, ResetStatus::Rejected);
}

pub async fn silent_drop_times_out() {
    let network = Network::new();
    network.controller.forwarding().drop_action("Reset", None);
    let res = network
        .csms
        .call_with(
            Destination::direct(STATION),
            reset(),
            ocpp_overlay_node::CallOptions::timeout(Duration::from_millis(200)),
        )
        .await;
    assert_eq!(res.result_code(), ResultCode::Timeout);
    assert_eq!(network.csms.pending_requests(), 0);
}

pub async fn replace_keeps_request_id() {
    let network = Network::new();
    echo_data_transfer(&network);
    network.controller.forwarding().on_request("DataTransfer", |_, _| {
        Verdict::Replace(Request::DataTransfer(DataTransferRequest {
            vendor_id: "org.example".into(),
            message_id: None,
            data: Some(json!("replaced")),
        }))
    });
    let csms_events = network.csms.subscribe();
    let station_events = network.station.subscribe();

    let res = network
        .csms
        .call_as::<DataTransferResponse>(
            Destination::direct(STATION),
            DataTransferRequest {
                vendor_id: "org.example".into(),
                message_id: None,
                data: Some(json!("original")),
            },
        )
        .await
        .unwrap();
    assert_eq!(res.data, Some(json!("replaced")));

    let NodeEvent::RequestSent { request: sent, .. } =
        expect_event(&csms_events, |e| matches!(e, NodeEvent::RequestSent { .. })).await
    else {
        unreachable!()
    };
    let NodeEvent::RequestReceived { request: received, .. } =
        expect_event(&station_events, |e| matches!(e, NodeEvent::RequestReceived { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(sent.request_id, received.request_id);
}

pub async fn transform_rewrites_response() {
    let network = Network::new();
    echo_data_transfer(&network);
    network.controller.forwarding().on_request("DataTransfer", |request, _| {
        Verdict::Transform(
            request.payload.clone(),
            Arc::new(|response: &ResponseEnvelope| {
                let Response::DataTransfer(res) = &response.payload else {
                    return response.payload.clone();
                };
                Response::DataTransfer(DataTransferResponse {
                    status: res.status,
                    data: Some(json!("transformed")),
                    status_info: None,
                })
            }),
        )
    });

    let res = network
        .csms
        .call_as::<DataTransferResponse>(
            Destination::direct(STATION),
            DataTransferRequest {
                vendor_id: "org.example".into(),
                message_id: None,
                data: Some(json!("original")),
            },
        )
        .await
        .unwrap();
    assert_eq!(res.data, Some(json!("transformed")));
    assert_eq!(res.status, DataTransferStatus::Accepted);
}

pub async fn connection_rule_applies_to_its_link_only() {
    let network = Network::new();
    network.station.on_request("Reset", |_, _| {
        Ok(Response::Reset(ResetResponse {
            status: ResetStatus::Accepted,
            status_info: None,
        }))
    });
    network.controller.forwarding().drop_action(
        "Reset",
        Some(ImmediateResponse::Error {
            code: ProtocolError::SecurityError,
            description: "blocked".into(),
        }),
    );
    network
        .controller
        .forwarding()
        .on_request_from("Reset", crate::harness::network::CSMS.into(), |_, _| Verdict::Forward);

    let res = network
        .csms
        .call_as::<ResetResponse>(Destination::direct(STATION), reset())
        .await
        .unwrap();
    assert_eq!(res.status, ResetStatus::Accepted);
}

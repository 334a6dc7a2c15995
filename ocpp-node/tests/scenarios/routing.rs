use chrono::Utc;
use ocpp_overlay_core::{
    overlay::{Destination, NetworkingMode, NetworkingNodeId},
    v21::{
        messages::{
            boot_notification::{BootNotificationRequest, BootNotificationResponse},
            heartbeat::{HeartbeatRequest, HeartbeatResponse},
            reset::{ResetRequest, ResetResponse},
        },
        types::{BootReason, ChargingStation, RegistrationStatus, ResetStatus, ResetType},
        Response,
    },
};
use ocpp_overlay_node::{
    CallOutcomeExt, ForwardingResult, NodeBuilder, NodeConfig, NodeError, NodeEvent, ResultCode, RoutingError,
};

use crate::harness::{
    channel::{connect, Connection},
    network::{expect_event, init_logger, Builders, Network, CONTROLLER, CSMS, STATION},
};

fn accept_reset(network: &Network) {
    network.station.on_request("Reset", |_, _| {
        Ok(Response::Reset(ResetResponse {
            status: ResetStatus::Accepted,
            status_info: None,
        }))
    });
}

pub async fn reset_through_controller() {
    let network = Network::new();
    accept_reset(&network);
    let controller_events = network.controller.subscribe();
    let station_events = network.station.subscribe();

    let res = network
        .csms
        .call_as::<ResetResponse>(
            Destination::direct(STATION),
            ResetRequest {
                kind: ResetType::Immediate,
                evse_id: None,
            },
        )
        .await;
    assert_eq!(res.result_code(), ResultCode::Ok);
    assert_eq!(res.unwrap().status, ResetStatus::Accepted);

    let decided = expect_event(&controller_events, |e| matches!(e, NodeEvent::ForwardingDecided { .. })).await;
    let NodeEvent::ForwardingDecided { from, result, request } = decided else {
        unreachable!()
    };
    assert_eq!(from, CSMS.into());
    assert_eq!(result, ForwardingResult::Forward);
    assert_eq!(request.destination.final_node(), Some(&NetworkingNodeId::from(STATION)));
    assert_eq!(request.network_path.hops(), &[NetworkingNodeId::from(CSMS)]);

    let received = expect_event(&station_events, |e| matches!(e, NodeEvent::RequestReceived { .. })).await;
    let NodeEvent::RequestReceived { from, request } = received else {
        unreachable!()
    };
    assert_eq!(from, CONTROLLER.into());
    assert_eq!(request.network_path.len(), 0);
    assert_eq!(request.destination, Destination::direct(STATION));
    assert_eq!(network.csms.pending_requests(), 0);
    assert_eq!(network.controller.pending_requests(), 0);
}

pub async fn response_path_grows_on_the_way_back() {
    let network = Network::new();
    accept_reset(&network);
    let response = network
        .csms
        .call(
            Destination::direct(STATION),
            ResetRequest {
                kind: ResetType::OnIdle,
                evse_id: Some(1),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        response.network_path.hops(),
        &[NetworkingNodeId::from(STATION), NetworkingNodeId::from(CONTROLLER)]
    );
    assert_eq!(response.destination, Destination::direct(CSMS));
}

pub async fn leaf_request_relayed_to_csms() {
    let network = Network::new();
    let csms_events = network.csms.subscribe();
    network.csms.on_request("BootNotification", |ctx, _| {
        assert_eq!(ctx.source, &NetworkingNodeId::from(STATION));
        Ok(Response::BootNotification(BootNotificationResponse {
            current_time: Utc::now(),
            interval: 300,
            status: RegistrationStatus::Accepted,
            status_info: None,
        }))
    });

    let res = network
        .station
        .call_as::<BootNotificationResponse>(
            Destination::direct(NetworkingNodeId::csms()),
            BootNotificationRequest {
                reason: BootReason::PowerUp,
                charging_station: ChargingStation {
                    model: "AC-22".into(),
                    vendor_name: "Acme".into(),
                    serial_number: None,
                    firmware_version: None,
                },
            },
        )
        .await
        .unwrap();
    assert_eq!(res.status, RegistrationStatus::Accepted);
    assert_eq!(res.interval, 300);

    let received = expect_event(&csms_events, |e| matches!(e, NodeEvent::RequestReceived { .. })).await;
    let NodeEvent::RequestReceived { request, .. } = received else {
        unreachable!()
    };
    assert_eq!(
        request.network_path.hops(),
        &[NetworkingNodeId::from(STATION), NetworkingNodeId::from(CONTROLLER)]
    );
}

pub async fn unroutable_destination() {
    let network = Network::new();
    let res = network
        .csms
        .call(Destination::direct("nowhere"), HeartbeatRequest {})
        .await;
    assert_eq!(res.result_code(), ResultCode::RouteNotFound);
    assert_eq!(
        res.unwrap_err(),
        NodeError::Routing(RoutingError::RouteNotFound("nowhere".into()))
    );
    assert_eq!(network.csms.pending_requests(), 0);
}

pub async fn relay_without_route_reports_route_not_found() {
    let network = Network::new();
    network.csms.add_static_routing("ghost", CONTROLLER);
    let res = network
        .csms
        .call(Destination::direct("ghost"), HeartbeatRequest {})
        .await;
    assert_eq!(res.result_code(), ResultCode::RouteNotFound);
    assert_eq!(
        res.unwrap_err(),
        NodeError::Routing(RoutingError::RouteNotFound("ghost".into()))
    );
    assert_eq!(network.controller.pending_requests(), 0);
}

pub async fn source_route_is_followed() {
    let network = Network::with(Builders {
        csms: NodeBuilder::csms(CSMS).call_timeout(2),
        ..Builders::default()
    });
    accept_reset(&network);
    let res = network
        .csms
        .call_as::<ResetResponse>(
            Destination::routed([CONTROLLER, STATION]),
            ResetRequest {
                kind: ResetType::Immediate,
                evse_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(res.status, ResetStatus::Accepted);
}

pub async fn unhandled_action_is_not_supported() {
    let network = Network::new();
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
    assert_eq!(res.result_code(), ResultCode::ProtocolError);
    assert!(matches!(
        res,
        Err(NodeError::Protocol {
            code: ocpp_overlay_core::format::error::ProtocolError::NotSupported,
            ..
        })
    ));
}

pub async fn controller_answers_its_own_requests() {
    let network = Network::new();
    network.controller.on_request("Heartbeat", |_, _| {
        Ok(Response::Heartbeat(HeartbeatResponse {
            current_time: Utc::now(),
        }))
    });
    let res = network
        .station
        .call(Destination::direct(CONTROLLER), HeartbeatRequest {})
        .await;
    assert_eq!(res.result_code(), ResultCode::Ok);
}

pub async fn config_built_station_follows_default_route() {
    let config = NodeConfig::from_json(&format!(
        r#"{{"id":"{STATION}","role":"ChargingStation","call_timeout":2,"default_route":"{CONTROLLER}"}}"#
    ))
    .unwrap();
    let network = Network::with(Builders {
        station: NodeBuilder::from_config(config),
        ..Builders::default()
    });
    network.csms.on_request("Heartbeat", |_, _| {
        Ok(Response::Heartbeat(HeartbeatResponse {
            current_time: Utc::now(),
        }))
    });
    let res = network
        .station
        .call_as::<HeartbeatResponse>(Destination::direct(NetworkingNodeId::csms()), HeartbeatRequest {})
        .await;
    assert_eq!(res.result_code(), ResultCode::Ok);
}

const EDGE: &str = "lc-2";

/// CSMS <-overlay-> lc-1 <-overlay-> lc-2 <-standard-> cs-1.
struct Chain {
    csms: ocpp_overlay_node::Node,
    upper: ocpp_overlay_node::Node,
    edge: ocpp_overlay_node::Node,
    station: ocpp_overlay_node::Node,
    _links: [Connection; 3],
}

fn chain() -> Chain {
    init_logger();
    let csms = NodeBuilder::csms(CSMS).call_timeout(2).static_route(STATION, CONTROLLER).build();
    let upper = NodeBuilder::networking_node(CONTROLLER)
        .call_timeout(2)
        .static_route(STATION, EDGE)
        .static_route(NetworkingNodeId::csms(), CSMS)
        .build();
    let edge = NodeBuilder::networking_node(EDGE)
        .call_timeout(2)
        .default_route(CONTROLLER)
        .build();
    let station = NodeBuilder::charging_station(STATION)
        .call_timeout(2)
        .default_route(EDGE)
        .build();
    let links = [
        connect(&csms, &upper, NetworkingMode::OverlayNetwork),
        connect(&upper, &edge, NetworkingMode::OverlayNetwork),
        connect(&edge, &station, NetworkingMode::Standard),
    ];
    station.on_request("Reset", |_, _| {
        Ok(Response::Reset(ResetResponse {
            status: ResetStatus::Accepted,
            status_info: None,
        }))
    });
    Chain {
        csms,
        upper,
        edge,
        station,
        _links: links,
    }
}

fn hops(ids: &[&str]) -> Vec<NetworkingNodeId> {
    ids.iter().map(|id| NetworkingNodeId::from(*id)).collect()
}

pub async fn path_grows_one_hop_per_relay() {
    let chain = chain();
    let upper_events = chain.upper.subscribe();
    let edge_events = chain.edge.subscribe();
    let station_events = chain.station.subscribe();

    let response = chain
        .csms
        .call(
            Destination::direct(STATION),
            ResetRequest {
                kind: ResetType::Immediate,
                evse_id: None,
            },
        )
        .await
        .unwrap();

    let NodeEvent::ForwardingDecided { request, .. } =
        expect_event(&upper_events, |e| matches!(e, NodeEvent::ForwardingDecided { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(request.network_path.hops(), hops(&[CSMS]).as_slice());

    let NodeEvent::ForwardingDecided { request, .. } =
        expect_event(&edge_events, |e| matches!(e, NodeEvent::ForwardingDecided { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(request.network_path.hops(), hops(&[CSMS, CONTROLLER]).as_slice());
    assert_eq!(request.network_path.source(), Some(&NetworkingNodeId::from(CSMS)));

    let NodeEvent::RequestReceived { request, .. } =
        expect_event(&station_events, |e| matches!(e, NodeEvent::RequestReceived { .. })).await
    else {
        unreachable!()
    };
    assert!(request.network_path.is_empty());

    assert_eq!(response.network_path.hops(), hops(&[STATION, EDGE, CONTROLLER]).as_slice());
    assert_eq!(response.destination, Destination::direct(CSMS));
    for node in [&chain.csms, &chain.upper, &chain.edge] {
        assert_eq!(node.pending_requests(), 0);
    }
}

pub async fn leaf_request_crosses_two_relays() {
    let chain = chain();
    let csms_events = chain.csms.subscribe();
    chain.csms.on_request("Heartbeat", |ctx, _| {
        assert_eq!(ctx.source, &NetworkingNodeId::from(STATION));
        Ok(Response::Heartbeat(HeartbeatResponse {
            current_time: Utc::now(),
        }))
    });

    let res = chain
        .station
        .call(Destination::direct(NetworkingNodeId::csms()), HeartbeatRequest {})
        .await;
    assert_eq!(res.result_code(), ResultCode::Ok);

    let NodeEvent::RequestReceived { request, .. } =
        expect_event(&csms_events, |e| matches!(e, NodeEvent::RequestReceived { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(request.network_path.hops(), hops(&[STATION, EDGE, CONTROLLER]).as_slice());
}

pub async fn source_route_across_two_relays() {
    let chain = chain();
    chain.csms.remove_static_routing(&STATION.into());
    chain.upper.remove_static_routing(&STATION.into());
    let res = chain
        .csms
        .call_as::<ResetResponse>(
            Destination::routed([CONTROLLER, EDGE, STATION]),
            ResetRequest {
                kind: ResetType::OnIdle,
                evse_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(res.status, ResetStatus::Accepted);
}

use std::{sync::Once, time::Duration};

use log::LevelFilter;
use ocpp_overlay_core::overlay::{NetworkingMode, NetworkingNodeId};
use ocpp_overlay_node::{Node, NodeBuilder, NodeEvent};

use super::channel::{connect, Connection};

pub const CSMS: &str = "csms-1";
pub const CONTROLLER: &str = "lc-1";
pub const STATION: &str = "cs-1";

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(LevelFilter::Trace)
            .try_init()
            .ok();
    });
}

/// CSMS <-overlay-> local controller <-standard-> charging station.
pub struct Network {
    pub csms: Node,
    pub controller: Node,
    pub station: Node,
    pub uplink: Connection,
    pub downlink: Connection,
}

pub struct Builders {
    pub csms: NodeBuilder,
    pub controller: NodeBuilder,
    pub station: NodeBuilder,
}

impl Default for Builders {
    fn default() -> Self {
        Self {
            csms: NodeBuilder::csms(CSMS).call_timeout(2).static_route(STATION, CONTROLLER),
            controller: NodeBuilder::networking_node(CONTROLLER)
                .call_timeout(2)
                .static_route(NetworkingNodeId::csms(), CSMS),
            station: NodeBuilder::charging_station(STATION)
                .call_timeout(2)
                .default_route(CONTROLLER),
        }
    }
}

impl Network {
    pub fn new() -> Self {
        Self::with(Builders::default())
    }

    pub fn with(builders: Builders) -> Self {
        init_logger();
        let csms = builders.csms.build();
        let controller = builders.controller.build();
        let station = builders.station.build();
        let uplink = connect(&csms, &controller, NetworkingMode::OverlayNetwork);
        let downlink = connect(&controller, &station, NetworkingMode::Standard);
        Self {
            csms,
            controller,
            station,
            uplink,
            downlink,
        }
    }
}

/// Waits for the first event matching `pred`, skipping others.
pub async fn expect_event<F>(rx: &flume::Receiver<NodeEvent>, mut pred: F) -> NodeEvent
where
    F: FnMut(&NodeEvent) -> bool,
{
    let wait = async {
        loop {
            let event = rx.recv_async().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("expected event never arrived")
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

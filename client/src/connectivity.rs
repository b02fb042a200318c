//! Connectivity monitor.
//!
//! Tracks online/offline state from network-change signals pushed in by the
//! platform layer and broadcasts edge events. There is exactly one writer,
//! the [`ConnectivityMonitor`]; readers hold cheap [`ConnectivityHandle`]s.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Capacity of the edge event channel.
const EVENT_CAPACITY: usize = 16;

/// Effective connection class reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandwidthClass {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl BandwidthClass {
    /// Parse the platform's effective-type label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "slow-2g" => Some(BandwidthClass::Slow2g),
            "2g" => Some(BandwidthClass::TwoG),
            "3g" => Some(BandwidthClass::ThreeG),
            "4g" => Some(BandwidthClass::FourG),
            _ => None,
        }
    }
}

/// Current network state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub online: bool,
    pub bandwidth: Option<BandwidthClass>,
    pub downlink_mbps: Option<f64>,
}

impl ConnectivityState {
    fn new(online: bool) -> Self {
        Self {
            online,
            bandwidth: None,
            downlink_mbps: None,
        }
    }
}

/// Network-change signal from the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NetworkSignal {
    Online,
    Offline,
    QualityChanged {
        bandwidth: Option<BandwidthClass>,
        downlink_mbps: Option<f64>,
    },
}

/// Edge events, fired only on state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// offline -> online; triggers a drain
    CameOnline,
    /// online -> offline; informational
    WentOffline,
}

/// The single writer of connectivity state.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectivityState>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the runtime's current status.
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(ConnectivityState::new(initially_online));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    /// Create a monitor wrapped in Arc for sharing with a signal source.
    pub fn new_shared(initially_online: bool) -> Arc<Self> {
        Arc::new(Self::new(initially_online))
    }

    /// A read-only view of the state.
    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            state: self.state.subscribe(),
            events: self.events.clone(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    /// Apply a platform signal. Returns the edge event it produced, if any.
    pub fn signal(&self, signal: NetworkSignal) -> Option<ConnectivityEvent> {
        let mut edge = None;

        self.state.send_if_modified(|state| match signal {
            NetworkSignal::Online if !state.online => {
                state.online = true;
                edge = Some(ConnectivityEvent::CameOnline);
                true
            }
            NetworkSignal::Offline if state.online => {
                state.online = false;
                edge = Some(ConnectivityEvent::WentOffline);
                true
            }
            NetworkSignal::Online | NetworkSignal::Offline => false,
            NetworkSignal::QualityChanged {
                bandwidth,
                downlink_mbps,
            } => {
                let changed = state.bandwidth != bandwidth || state.downlink_mbps != downlink_mbps;
                state.bandwidth = bandwidth;
                state.downlink_mbps = downlink_mbps;
                changed
            }
        });

        if let Some(event) = edge {
            tracing::info!(event = ?event, "Connectivity changed");
            // No subscribers is fine; the state cell still reflects the change.
            let _ = self.events.send(event);
        }
        edge
    }
}

/// Read-only connectivity view, cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    state: watch::Receiver<ConnectivityState>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityHandle {
    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Wait for the next state change. Errors once the monitor is dropped.
    pub async fn changed(&mut self) -> Result<ConnectivityState, watch::error::RecvError> {
        self.state.changed().await?;
        Ok(*self.state.borrow_and_update())
    }

    /// Subscribe to edge events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

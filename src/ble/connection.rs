//! BLE connection state.
//!
//! Tracks the connection state machine shared by the supervisor and its
//! worker task, and broadcasts every transition as a [`ConnectionEvent`].

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Connection state for the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected to the sensor.
    #[default]
    Disconnected,
    /// Listening for advertisements.
    Scanning,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and subscribed to notifications.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// Check if a new connection attempt may start from this state.
    pub fn accepts_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Scanning)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// The device a session targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Platform peripheral identifier.
    pub address: String,
    /// Name shown to the user.
    pub name: String,
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    /// State before the transition.
    pub previous: ConnectionState,
    /// The new connection state.
    pub state: ConnectionState,
    /// The device involved, if any.
    pub device: Option<DeviceInfo>,
}

impl ConnectionEvent {
    /// Whether this transition ended a session, by link loss or on request.
    pub fn is_disconnect(&self) -> bool {
        self.state == ConnectionState::Disconnected
            && matches!(
                self.previous,
                ConnectionState::Connected | ConnectionState::Disconnecting
            )
    }
}

/// Snapshot of the tracker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionInfo {
    /// Current state.
    pub state: ConnectionState,
    /// Device of the current or last session.
    pub device: Option<DeviceInfo>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    state: ConnectionState,
    /// Incremented for every connect attempt and every forced disconnect so
    /// stale workers can tell they no longer own the session.
    generation: u64,
    device: Option<DeviceInfo>,
}

/// Connection state machine with generation-checked transitions.
#[derive(Debug)]
pub struct ConnectionTracker {
    inner: RwLock<TrackerInner>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    /// Create a tracker in the `Disconnected` state.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            inner: RwLock::new(TrackerInner::default()),
            event_tx,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    /// Get the current session generation.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Snapshot of state and device.
    pub fn info(&self) -> ConnectionInfo {
        let inner = self.inner.read();
        ConnectionInfo {
            state: inner.state,
            device: inner.device.clone(),
        }
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Enter `Scanning` if idle. Returns `true` if the state changed.
    pub fn begin_scan(&self) -> bool {
        self.transition(|inner| {
            (inner.state == ConnectionState::Disconnected).then_some(ConnectionState::Scanning)
        })
    }

    /// Leave `Scanning` if still scanning.
    pub fn end_scan(&self) -> bool {
        self.transition(|inner| {
            (inner.state == ConnectionState::Scanning).then_some(ConnectionState::Disconnected)
        })
    }

    /// Atomically claim a new connection attempt.
    ///
    /// Returns the generation of the new session, or `None` if another
    /// attempt or session is active.
    pub fn begin_connect(&self, device: DeviceInfo) -> Option<u64> {
        let mut generation = None;
        self.transition(|inner| {
            if !inner.state.accepts_connect() {
                return None;
            }
            inner.generation += 1;
            inner.device = Some(device.clone());
            generation = Some(inner.generation);
            Some(ConnectionState::Connecting)
        });
        generation
    }

    /// Move from one of `from` to `to`, but only while `generation` still owns
    /// the session. Returns `true` if the transition happened.
    pub fn advance(&self, generation: u64, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.transition(|inner| {
            (inner.generation == generation && from.contains(&inner.state)).then_some(to)
        })
    }

    /// Begin a caller-requested disconnect.
    ///
    /// Invalidates the current generation so any in-flight worker becomes a
    /// no-op, and moves `Connecting` or `Connected` to `Disconnecting`. New
    /// connects are refused until [`finish_disconnect`](Self::finish_disconnect).
    /// Returns the state observed before the call.
    pub fn begin_disconnect(&self) -> ConnectionState {
        let mut previous = ConnectionState::Disconnected;
        self.transition(|inner| {
            previous = inner.state;
            inner.generation += 1;
            match inner.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    Some(ConnectionState::Disconnecting)
                }
                _ => None,
            }
        });
        previous
    }

    /// Finish a caller-requested disconnect.
    pub fn finish_disconnect(&self) -> bool {
        self.transition(|inner| {
            (inner.state == ConnectionState::Disconnecting).then_some(ConnectionState::Disconnected)
        })
    }

    /// Apply `decide` under the write lock and emit an event if the state
    /// changed. The event is sent after the lock is released.
    fn transition(&self, decide: impl FnOnce(&mut TrackerInner) -> Option<ConnectionState>) -> bool {
        let event = {
            let mut inner = self.inner.write();
            let previous = inner.state;
            match decide(&mut inner) {
                Some(next) if next != previous => {
                    inner.state = next;
                    Some(ConnectionEvent {
                        previous,
                        state: next,
                        device: inner.device.clone(),
                    })
                }
                _ => None,
            }
        };

        match event {
            Some(event) => {
                debug!("Connection state changed: {} -> {}", event.previous, event.state);
                let _ = self.event_tx.send(event);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceInfo {
        DeviceInfo {
            address: "AA:BB".to_string(),
            name: "sensor-1".to_string(),
        }
    }

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());

        assert!(ConnectionState::Scanning.accepts_connect());
        assert!(!ConnectionState::Disconnecting.accepts_connect());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Scanning), "Scanning");
    }

    #[test]
    fn test_begin_connect_is_exclusive() {
        let tracker = ConnectionTracker::new();
        let first = tracker.begin_connect(device());
        assert_eq!(first, Some(1));
        assert_eq!(tracker.begin_connect(device()), None);
        assert_eq!(tracker.state(), ConnectionState::Connecting);
        assert_eq!(tracker.generation(), 1);
    }

    #[test]
    fn test_stale_generation_cannot_advance() {
        let tracker = ConnectionTracker::new();
        let generation = tracker.begin_connect(device()).unwrap();

        assert_eq!(tracker.begin_disconnect(), ConnectionState::Connecting);
        assert_eq!(tracker.state(), ConnectionState::Disconnecting);
        assert_eq!(tracker.begin_connect(device()), None);

        assert!(!tracker.advance(
            generation,
            &[ConnectionState::Connecting],
            ConnectionState::Connected
        ));
        assert!(!tracker.advance(
            generation,
            &[ConnectionState::Disconnecting],
            ConnectionState::Disconnected
        ));
        assert_eq!(tracker.state(), ConnectionState::Disconnecting);

        assert!(tracker.finish_disconnect());
        assert_eq!(tracker.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_scan_transitions() {
        let tracker = ConnectionTracker::new();
        assert!(tracker.begin_scan());
        assert_eq!(tracker.state(), ConnectionState::Scanning);
        assert!(tracker.end_scan());
        assert!(!tracker.end_scan());
    }

    #[test]
    fn test_events_emitted_once_per_change() {
        let tracker = ConnectionTracker::new();
        let mut rx = tracker.subscribe();

        let generation = tracker.begin_connect(device()).unwrap();
        assert!(tracker.advance(
            generation,
            &[ConnectionState::Connecting],
            ConnectionState::Connected
        ));
        assert!(tracker.advance(
            generation,
            &[ConnectionState::Connected],
            ConnectionState::Disconnected
        ));
        assert!(!tracker.advance(
            generation,
            &[ConnectionState::Connected],
            ConnectionState::Disconnected
        ));

        let states: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.state, e.is_disconnect()))
            .collect();
        assert_eq!(
            states,
            vec![
                (ConnectionState::Connecting, false),
                (ConnectionState::Connected, false),
                (ConnectionState::Disconnected, true),
            ]
        );
    }
}

// Events pushed to the consumer
//
// The engine produces unsolicited traffic (init handshake, stream output,
// status-bearing responses); the consumer sees it as a channel of tagged
// event variants.

use serde::{Deserialize, Serialize};

use crate::connection::EngineStatus;

/// Fields of the engine's init handshake packet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitPacket {
    pub appid: String,
    pub idekey: String,
    pub session: String,
    pub thread: String,
    pub parent: String,
    pub language: String,
    pub protocol_version: String,
    pub fileuri: String,
}

/// One event delivered to the consumer of a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConnectionEvent {
    /// The engine connected and completed its handshake.
    Connected(InitPacket),
    /// The engine's status changed.
    StatusChange {
        old: EngineStatus,
        new: EngineStatus,
    },
    /// Data the debuggee wrote to stdout.
    Stdout(String),
    /// Data the debuggee wrote to stderr.
    Stderr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize() {
        let event = ConnectionEvent::StatusChange {
            old: EngineStatus::Running,
            new: EngineStatus::Break,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("StatusChange"));

        let back: ConnectionEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            ConnectionEvent::StatusChange {
                old: EngineStatus::Running,
                new: EngineStatus::Break,
            }
        ));
    }
}

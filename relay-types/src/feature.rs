use serde::{Deserialize, Serialize};

/// Capabilities a `RelayClient` may advertise via `supports_feature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayFeature {
    BlockStreaming,
    TxPool,
    Historical,
    SmartContracts,
    StateQueries,
    EventLogs,
    WebSocket,
    Rest,
    CompactBlocks,
}

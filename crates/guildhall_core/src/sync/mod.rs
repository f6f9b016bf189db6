/// Synchronization protocol between this service and other nodes
mod frame;
mod gateway;
mod protocol;

pub use frame::{encode_frame, read_frame, read_payload, write_frame, MAX_FRAME_LEN};
pub use gateway::{GatewayStats, SyncGateway, DEFAULT_DEDUP_CAPACITY};
pub use protocol::{
    LevelHint, MemberGroups, SyncCommand, SyncEnvelope, SyncOutcome, SyncReply, PROTOCOL_VERSION,
};

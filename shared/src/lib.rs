pub mod control;
pub mod rcon;

pub use control::{
    ControlRequest, MatchConfig, MatchStatus, MatchStatusEntry, StatusReply, TeamInfo, TeamStatus,
};
pub use rcon::{FrameError, PacketBuffer, RconPacket};

pub mod packet;
pub mod parser;

pub use packet::{PacketRecord, TcpFlags, IP_PROTO_TCP, IP_PROTO_UDP};
pub use parser::{parse_frame, FrameKind};

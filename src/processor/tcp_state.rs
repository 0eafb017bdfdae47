use crate::capture::TcpFlags;
use super::flow::FlowDirection;

/// Connection state of one side (client or server) of a TCP flow.
///
/// Each side is fed every packet of the flow together with the direction the
/// packet travelled; `side` names which direction this endpoint sends in.
/// Only the client side tracks establishment: the server's own SYN+ACK moves it
/// to `SynSent` and it stays there until FIN or RST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TcpState {
    #[default]
    Start,
    /// This side sent a SYN (a SYN+ACK counts for the server).
    SynSent,
    /// Peer answered the SYN with SYN+ACK.
    SynAckReceived,
    /// This side acknowledged the SYN+ACK.
    Established,
    /// FIN sent by this side, waiting for the peer's ACK.
    FinWait,
    Closed,
}

impl TcpState {
    /// Pure transition function. `Closed` is absorbing.
    pub fn next(self, flags: TcpFlags, side: FlowDirection, pkt_dir: FlowDirection) -> TcpState {
        if self == TcpState::Closed {
            return self;
        }
        if flags.rst() {
            return TcpState::Closed;
        }
        let own = side == pkt_dir;
        if flags.fin() && own {
            return TcpState::FinWait;
        }
        match self {
            TcpState::Start if flags.syn() && own => TcpState::SynSent,
            TcpState::SynSent if flags.syn() && flags.ack() && !own => TcpState::SynAckReceived,
            TcpState::SynAckReceived if flags.ack() && own => TcpState::Established,
            TcpState::FinWait if flags.ack() && !own => TcpState::Closed,
            s => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FlowDirection::{Backward, Forward};

    const SYN: TcpFlags = TcpFlags(TcpFlags::SYN);
    const SYN_ACK: TcpFlags = TcpFlags(TcpFlags::SYN | TcpFlags::ACK);
    const ACK: TcpFlags = TcpFlags(TcpFlags::ACK);
    const FIN_ACK: TcpFlags = TcpFlags(TcpFlags::FIN | TcpFlags::ACK);
    const RST: TcpFlags = TcpFlags(TcpFlags::RST);

    fn run(side: FlowDirection, seq: &[(TcpFlags, FlowDirection)]) -> TcpState {
        seq.iter().fold(TcpState::Start, |s, &(f, d)| s.next(f, side, d))
    }

    #[test]
    fn test_client_handshake_reaches_established() {
        let seq = [(SYN, Forward), (SYN_ACK, Backward), (ACK, Forward)];
        assert_eq!(run(Forward, &seq), TcpState::Established);
    }

    #[test]
    fn test_handshake_in_wrong_direction_does_not_establish() {
        // SYN+ACK coming from the client side is not an answer to its own SYN
        let seq = [(SYN, Forward), (SYN_ACK, Forward), (ACK, Forward)];
        assert_eq!(run(Forward, &seq), TcpState::SynSent);
    }

    #[test]
    fn test_server_side_state_after_handshake() {
        let handshake = [(SYN, Forward), (SYN_ACK, Backward), (ACK, Forward)];
        assert_eq!(run(Backward, &handshake), TcpState::SynSent);
        assert_eq!(run(Forward, &handshake), TcpState::Established);
    }

    #[test]
    fn test_syn_only_stays_syn_sent() {
        assert_eq!(run(Forward, &[(SYN, Forward), (SYN, Forward)]), TcpState::SynSent);
    }

    #[test]
    fn test_fin_acknowledged_closes_side() {
        let seq = [
            (SYN, Forward), (SYN_ACK, Backward), (ACK, Forward),
            (FIN_ACK, Forward), (ACK, Backward),
        ];
        assert_eq!(run(Forward, &seq), TcpState::Closed);
        // Server side has not sent its own FIN yet
        assert_ne!(run(Backward, &seq), TcpState::Closed);
    }

    #[test]
    fn test_unacknowledged_fin_waits() {
        let seq = [(SYN, Forward), (SYN_ACK, Backward), (ACK, Forward), (FIN_ACK, Forward)];
        assert_eq!(run(Forward, &seq), TcpState::FinWait);
    }

    #[test]
    fn test_rst_closes_either_side_immediately() {
        assert_eq!(run(Forward, &[(SYN, Forward), (RST, Backward)]), TcpState::Closed);
        assert_eq!(run(Backward, &[(SYN, Forward), (RST, Backward)]), TcpState::Closed);
    }

    #[test]
    fn test_closed_is_absorbing() {
        let closed = TcpState::Closed;
        assert_eq!(closed.next(SYN, Forward, Forward), TcpState::Closed);
        assert_eq!(closed.next(FIN_ACK, Forward, Forward), TcpState::Closed);
    }
}

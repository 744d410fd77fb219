use containers::{Epoch, Status};
use libp2p_identity::PeerId;

/// View of connected peers and their last reported chain state.
pub trait PeerDirectory: Send + Sync {
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Last status handshake received from `peer`, if any.
    fn chain_state(&self, peer: &PeerId) -> Option<Status>;

    /// Up to `max_peers` peers whose finalized epoch is at least
    /// `min_epoch`, ordered best finalized epoch first.
    fn best_finalized(&self, max_peers: usize, min_epoch: Epoch) -> Vec<PeerId> {
        let mut ranked: Vec<(PeerId, Epoch)> = self
            .connected_peers()
            .into_iter()
            .filter_map(|peer| {
                let status = self.chain_state(&peer)?;
                (status.finalized.epoch >= min_epoch).then_some((peer, status.finalized.epoch))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(max_peers);
        ranked.into_iter().map(|(peer, _)| peer).collect()
    }
}

/// The highest finalized epoch any connected peer reports, or epoch zero
/// when no peer has completed the handshake yet.
pub fn highest_finalized_epoch<P: PeerDirectory + ?Sized>(peers: &P) -> Epoch {
    peers
        .connected_peers()
        .iter()
        .filter_map(|peer| peers.chain_state(peer))
        .map(|status| status.finalized.epoch)
        .max()
        .unwrap_or(Epoch(0))
}

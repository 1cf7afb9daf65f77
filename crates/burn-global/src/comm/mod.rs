//! Collective transport used to move local components between ranks.
//!
//! Every collective here is blocking. All ranks of the group must enter the same
//! collectives in the same relative order, otherwise the program hangs: mismatched
//! call orders are not detected.

mod local;

pub use local::*;

use burn_tensor::TensorData;

use crate::Result;

/// Point-to-point transport between the ranks of a world.
///
/// Messages between a given pair of ranks are delivered in the order they were
/// sent. Implementations must not block on [`send`](Communicator::send) for the
/// collectives built on top of this trait to be free of deadlocks.
pub trait Communicator: Send + Sync {
    /// Rank of the calling process.
    fn rank(&self) -> usize;

    /// Number of ranks in the world.
    fn world_size(&self) -> usize;

    /// Sends `data` to rank `dst`.
    fn send(&self, dst: usize, data: TensorData) -> Result<()>;

    /// Receives the next message sent by rank `src`, blocking until it arrives.
    fn recv(&self, src: usize) -> Result<TensorData>;

    /// Broadcasts the data of `root` to every rank of `group`.
    ///
    /// `data` is only read on the root. The calling rank must belong to `group`.
    fn broadcast(&self, group: &[usize], root: usize, data: Option<TensorData>) -> Result<TensorData> {
        let rank = self.rank();
        if rank != root {
            return self.recv(root);
        }

        let data = data.ok_or_else(|| {
            crate::GlobalError::InvalidArgument(format!("Broadcast root {root} has no data"))
        })?;
        for &peer in group.iter().filter(|&&peer| peer != root) {
            self.send(peer, data.clone())?;
        }
        Ok(data)
    }

    /// Gathers the data of every rank of `group`, ordered like `group`.
    ///
    /// The calling rank must belong to `group`.
    fn all_gather(&self, group: &[usize], data: TensorData) -> Result<Vec<TensorData>> {
        let rank = self.rank();
        for &peer in group.iter().filter(|&&peer| peer != rank) {
            self.send(peer, data.clone())?;
        }

        let mut gathered = Vec::with_capacity(group.len());
        for &peer in group {
            if peer == rank {
                gathered.push(data.clone());
            } else {
                gathered.push(self.recv(peer)?);
            }
        }
        Ok(gathered)
    }
}

use async_channel::{Receiver, Sender};
use burn_tensor::TensorData;

use super::Communicator;
use crate::{CommError, Result};

/// Builds the communicators of an in-process world, one per rank.
///
/// Each rank is expected to run on its own thread. Channels are unbounded, so
/// sends never block.
///
/// # Example
///
/// ```rust
/// use burn_global::comm::{Communicator, LocalCluster};
///
/// let comms = LocalCluster::new(2).into_communicators();
/// assert_eq!(comms[1].rank(), 1);
/// assert_eq!(comms[1].world_size(), 2);
/// ```
#[derive(Debug)]
pub struct LocalCluster {
    communicators: Vec<LocalCommunicator>,
}

impl LocalCluster {
    /// Creates a world of `world_size` ranks.
    pub fn new(world_size: usize) -> Self {
        let mut senders: Vec<Vec<Sender<TensorData>>> = vec![Vec::new(); world_size];
        let mut receivers: Vec<Vec<Receiver<TensorData>>> = vec![Vec::new(); world_size];

        // Pushing in `src` order makes `receivers[dst][src]` read what `src` sends to `dst`.
        for src_senders in senders.iter_mut() {
            for dst_receivers in receivers.iter_mut() {
                let (tx, rx) = async_channel::unbounded();
                src_senders.push(tx);
                dst_receivers.push(rx);
            }
        }

        let communicators = senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalCommunicator {
                rank,
                senders,
                receivers,
            })
            .collect();

        Self { communicators }
    }

    /// A world with a single rank.
    pub fn single() -> LocalCommunicator {
        let mut communicators = Self::new(1).into_communicators();
        communicators.remove(0)
    }

    /// Takes the communicators, indexed by rank.
    pub fn into_communicators(self) -> Vec<LocalCommunicator> {
        self.communicators
    }
}

/// The [`Communicator`] of one rank of a [`LocalCluster`].
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    /// `senders[dst]` delivers to rank `dst`.
    senders: Vec<Sender<TensorData>>,
    /// `receivers[src]` yields what rank `src` sent.
    receivers: Vec<Receiver<TensorData>>,
}

impl LocalCommunicator {
    fn check_peer(&self, peer: usize) -> Result<()> {
        if peer < self.senders.len() {
            Ok(())
        } else {
            Err(CommError::UnknownPeer {
                peer,
                world_size: self.senders.len(),
            }
            .into())
        }
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dst: usize, data: TensorData) -> Result<()> {
        self.check_peer(dst)?;
        log::trace!("rank {} sends {:?} to rank {}", self.rank, data.shape, dst);
        self.senders[dst]
            .send_blocking(data)
            .map_err(|_| CommError::Disconnected { peer: dst }.into())
    }

    fn recv(&self, src: usize) -> Result<TensorData> {
        self.check_peer(src)?;
        self.receivers[src]
            .recv_blocking()
            .map_err(|_| CommError::Disconnected { peer: src }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_to_point_keeps_order() {
        let comms = LocalCluster::new(2).into_communicators();

        comms[0].send(1, TensorData::new(vec![1i64], [1])).unwrap();
        comms[0].send(1, TensorData::new(vec![2i64], [1])).unwrap();

        assert_eq!(comms[1].recv(0).unwrap().to_vec::<i64>().unwrap(), vec![1]);
        assert_eq!(comms[1].recv(0).unwrap().to_vec::<i64>().unwrap(), vec![2]);
    }

    #[test]
    fn test_unknown_peer() {
        let comm = LocalCluster::single();

        let err = comm.send(3, TensorData::new(vec![0u8], [1])).unwrap_err();
        assert!(matches!(
            err,
            crate::GlobalError::Comm(CommError::UnknownPeer { peer: 3, world_size: 1 })
        ));
    }

    #[test]
    fn test_broadcast_and_all_gather() {
        let comms = LocalCluster::new(3).into_communicators();
        let group = [0, 1, 2];

        let results: Vec<(Vec<i32>, Vec<Vec<i32>>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let rank = comm.rank() as i32;
                        let root_data = (rank == 0).then(|| TensorData::new(vec![42i32], [1]));
                        let broadcast = comm.broadcast(&group, 0, root_data).unwrap();
                        let gathered = comm
                            .all_gather(&group, TensorData::new(vec![rank], [1]))
                            .unwrap();
                        (
                            broadcast.to_vec::<i32>().unwrap(),
                            gathered
                                .iter()
                                .map(|data| data.to_vec::<i32>().unwrap())
                                .collect(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (broadcast, gathered) in results {
            assert_eq!(broadcast, vec![42]);
            assert_eq!(gathered, vec![vec![0], vec![1], vec![2]]);
        }
    }
}

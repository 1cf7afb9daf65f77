#![allow(dead_code)]

use burn_global::comm::LocalCluster;
use burn_global::sharding::{DeviceKind, Placement};
use burn_global::{GlobalConfig, GlobalContext};

/// Runs `f` on `world_size` ranks, one thread each, and returns the results ordered by rank.
pub fn run_world<R, F>(world_size: usize, config: GlobalConfig, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(&mut GlobalContext) -> R + Sync,
{
    let comms = LocalCluster::new(world_size).into_communicators();

    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                let config = config.clone();
                scope.spawn(move || f(&mut GlobalContext::new(comm, config)))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().expect("rank panicked"))
            .collect()
    })
}

pub fn cpu(ranks: Vec<usize>) -> Placement {
    Placement::new(DeviceKind::Cpu, ranks).unwrap()
}

pub fn grid(ranks: Vec<usize>, hierarchy: [usize; 2]) -> Placement {
    Placement::builder(DeviceKind::Cpu, ranks)
        .with_hierarchy(hierarchy)
        .build()
        .unwrap()
}

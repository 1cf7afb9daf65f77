use alloc::sync::Arc;

use crate::comm::Communicator;
use crate::random::Generator;
use crate::GlobalConfig;

/// Per-rank state shared by global tensor operations.
///
/// A context owns the communicator of the calling rank, the configuration and the
/// default random stream. It is passed explicitly to every operation that may
/// compute or communicate; there is no process-wide session.
pub struct GlobalContext {
    comm: Arc<dyn Communicator>,
    config: GlobalConfig,
    generator: Generator,
}

impl GlobalContext {
    /// Creates a context whose default generator is seeded from entropy.
    pub fn new<C: Communicator + 'static>(comm: C, config: GlobalConfig) -> Self {
        Self::from_shared(Arc::new(comm), config)
    }

    /// Creates a context around a communicator that is also used elsewhere.
    pub fn from_shared(comm: Arc<dyn Communicator>, config: GlobalConfig) -> Self {
        Self {
            comm,
            config,
            generator: Generator::from_entropy(),
        }
    }

    /// Replaces the default generator.
    pub fn with_generator(mut self, generator: Generator) -> Self {
        self.generator = generator;
        self
    }

    /// Rank of the calling process.
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// The communicator of the calling rank.
    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    /// The configuration.
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// The default random stream.
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// The default random stream, mutably.
    pub fn generator_mut(&mut self) -> &mut Generator {
        &mut self.generator
    }

    pub(crate) fn comm_and_generator(&mut self) -> (&dyn Communicator, &mut Generator) {
        (self.comm.as_ref(), &mut self.generator)
    }
}

impl core::fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GlobalContext")
            .field("rank", &self.rank())
            .field("world_size", &self.comm.world_size())
            .field("config", &self.config)
            .finish()
    }
}

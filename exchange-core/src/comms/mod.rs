pub mod bus;
pub mod communicator;
pub mod pool;

pub use bus::{BusMessage, MemoryBus, PubSub, Subscription};
pub use communicator::{BlockingCommunicator, CommsError};
pub use pool::WorkerPool;

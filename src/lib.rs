//! villas_shmem - VILLAS shmem interface descriptor and transport
//!
//! A simulator exchanges signal samples with an external consumer through
//! two named POSIX shared memory queues:
//!
//! - **Read channel**: the simulator writes its exported signals, the consumer reads
//! - **Write channel**: the consumer writes, the simulator reads its imports
//!
//! [`describe_interface`] turns any [`ShmemInterface`] into the
//! [`InterfaceConfig`] a VILLAS node expects (`type = "shmem"`).
//! [`Interface`] is a ready-made implementation that also owns the signal
//! mapping and can open the shared memory queues.

pub mod error;
pub mod descriptor;
pub mod interface;
pub mod signal;
pub mod shm;
pub mod queue;
pub mod channel;
pub mod bindings;

pub use error::{ShmemError, Result};
pub use descriptor::{describe_interface, InterfaceConfig, ShmemInterface, Truthy};
pub use interface::{Interface, InterfaceOptions};
pub use signal::{AttributeMode, AttributeValue, Export, Import};
pub use queue::Sample;
pub use channel::{SampleReader, SampleWriter, ShmemTransport, SimulatorChannels};

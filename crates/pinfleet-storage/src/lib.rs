//! Storage backends for the fleet model.
//!
//! Currently ships a concurrent in-memory backend built on [`dashmap`],
//! used both in production for small fleets and as the test double for
//! every crate above it. Implementations live behind the repository ports
//! in `pinfleet-model`, so swapping in a durable backend is additive.

pub mod memory;

pub use memory::{
    MemoryActuatorAssignmentRepository, MemoryActuatorCommandRepository,
    MemoryActuatorDefinitionRepository, MemoryNodeRepository, MemoryReadingRepository,
    MemorySensorAssignmentRepository, MemorySensorDefinitionRepository, MemoryStore,
};

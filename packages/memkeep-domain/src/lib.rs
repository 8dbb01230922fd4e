pub mod operation;
pub mod policy;
pub mod redact;
pub mod retry;
pub mod table;

pub use operation::{OperationStatus, OperationType, UnknownVariant};
pub use policy::{MaintenancePolicy, PolicyError, PolicyKey};
pub use table::ManagedTable;

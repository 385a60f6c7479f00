//! Remote-call contract for the alder distributed filesystem.
//!
//! Four interfaces connect the three parties:
//!
//! - **Service** (client → naming): locking and directory operations
//! - **Registration** (storage → naming): storage-server announcement
//! - **Command** (naming → storage): create/delete/copy of file data
//! - **Storage** (client → storage): block reads and writes
//!
//! Each interface is one request enum and one response enum, serialized
//! with postcard inside length-prefixed frames. A request carries its
//! method as the enum tag and its arguments as the variant fields; the
//! receiving side dispatches with a typed `match`. Responses carry
//! failures as data ([`DfsError`]) so transport errors and domain errors
//! stay distinguishable.

pub mod messages;
pub mod stub;

pub use messages::CommandRequest;
pub use messages::CommandResponse;
pub use messages::RegistrationRequest;
pub use messages::RegistrationResponse;
pub use messages::ServiceRequest;
pub use messages::ServiceResponse;
pub use messages::StorageRequest;
pub use messages::StorageResponse;
pub use messages::MAX_MESSAGE_SIZE;
pub use messages::REGISTRATION_PORT;
pub use messages::SERVICE_PORT;
pub use stub::CommandStub;
pub use stub::StorageStub;

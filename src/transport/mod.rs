pub mod codec;
pub mod semaphore;

pub use codec::{InboundDocument, OutboundDocument};
pub use semaphore::{FilePair, ScanResult, SemaphoreProtocol};

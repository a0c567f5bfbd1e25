pub mod fetch;
pub mod ingest;
pub mod mailbox;
pub mod parser;
pub mod scheduler;

pub use fetch::FeedClient;
pub use ingest::{IngestStats, IngestStrategy, Ingestor};
pub use mailbox::{classify, HandleCache, MailboxPoller};
pub use scheduler::{ConfigWatcher, JobHandle, Scheduler};

pub mod config;
pub mod db;
pub mod mailbox;
pub mod mentions;
pub mod messages;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigStore, MIN_POLLING_INTERVAL};
pub use db::Database;
pub use mailbox::MailboxStore;
pub use mentions::MentionStore;
pub use messages::{AdmitStats, MessageStore};
pub use sweep::{ArchiveSweep, DedupSweep, DedupStats, ARCHIVE_BATCH_SIZE};

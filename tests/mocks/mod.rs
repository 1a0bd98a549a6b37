pub mod mock_collector;
pub mod mock_notifier;
pub mod mock_store;

pub use mock_collector::{ScriptedCollector, Step};
pub use mock_notifier::{Delivered, RecordingNotifier};
pub use mock_store::MemoryStore;

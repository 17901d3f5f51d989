mod in_memory;
mod log;
mod storage;
#[cfg(test)]
mod test_entry;

pub use in_memory::InMemoryLog;
pub use log::Entry;
pub use log::Index;
pub use log::Log;
pub use storage::DiskLog;

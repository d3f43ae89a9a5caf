pub mod filesystem;
pub mod symlink;

pub use filesystem::{DirEntryInfo, FileStorage, WriteOutcome};
pub use symlink::SymlinkManager;

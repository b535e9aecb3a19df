/// `storage/` - non-volatile home of the user script
pub mod flash;
pub mod script_store;

pub use flash::{Bank, FileFlash, Flash, MemFlash};
pub use script_store::{ScriptStore, HEADER_LEN};

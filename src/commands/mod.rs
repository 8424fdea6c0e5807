// VodCast Commands
// System-level operations invoked by the web layer

mod system;

pub use system::*;

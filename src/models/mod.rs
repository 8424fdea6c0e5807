// VodCast Models
// Data structures for the application

mod batch;
mod playback;
mod preview;
mod settings;
mod stream_stats;

pub use batch::*;
pub use playback::*;
pub use preview::*;
pub use settings::*;
pub use stream_stats::*;

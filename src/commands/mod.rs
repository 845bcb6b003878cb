pub mod channels;
pub mod downloads;
pub mod videos;

pub use channels::*;
pub use downloads::*;
pub use videos::*;

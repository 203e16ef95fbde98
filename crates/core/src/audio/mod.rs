pub mod blob;
pub mod media;
pub mod session;

pub use blob::*;
pub use media::*;
pub use session::*;

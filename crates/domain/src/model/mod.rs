mod annotation;
mod event;
mod session;
mod tenant;

pub use annotation::*;
pub use event::*;
pub use session::*;
pub use tenant::*;

mod attachment;
mod course;
mod course_session;
mod coursework;
mod message;
mod profile;
mod user;

pub use attachment::*;
pub use course::*;
pub use course_session::*;
pub use coursework::*;
pub use message::*;
pub use profile::*;
pub use user::*;

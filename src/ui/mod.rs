pub mod app;
pub mod display;
pub mod input;
pub mod keymap;
pub mod session;
pub mod theme;

pub use app::{run_app, InteractiveOptions};
pub use session::{Command, Focus, LoadState, Message, QueryStatus, Session, SessionOptions};

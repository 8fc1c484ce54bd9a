mod assets;
mod dispatch;
mod extract;
mod mainfile;
mod process;
mod workspace;

pub use dispatch::Dispatcher;
pub use process::process_job;
pub use workspace::WorkspaceGuard;

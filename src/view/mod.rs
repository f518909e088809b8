//! Read-only thread list: periodic refresh from the cache and the
//! contract it publishes through.

mod refresher;
mod sink;
mod state;

pub use refresher::ViewRefresher;
pub use sink::{LogSink, StdoutSink, format_row};
pub use state::{ViewState, ViewWindow};

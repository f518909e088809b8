mod db;

pub use db::{Cache, NewMessage, PageRow, WriteMode, WriteOutcome};

pub mod imap;
pub mod parser;
pub mod response;
pub mod session;
pub mod smtp;
pub mod types;
pub mod uid_range;

#[cfg(test)]
pub mod fake;

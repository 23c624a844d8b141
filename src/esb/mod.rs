//! Adapter for the ESB Networks customer portal.

pub mod client;
pub mod csv_parser;
pub mod fetcher;
pub mod html_parsing;
pub mod login;
pub mod session;

pub use fetcher::ReadingFetcher;
pub use login::EsbPortal;
pub use session::SessionClient;

pub mod config;
pub mod errors;
pub mod models;
pub mod notifier;
pub mod poller;
pub mod scheduler;
pub mod store;
pub mod teratail_api;

pub const TERATAIL_BASE_URL: &str = "https://teratail.com";
/// Page size the questions endpoint is asked for. Only the first page is read.
pub const QUESTIONS_PER_FETCH: u32 = 5;
pub const LATEST_IDS_KEY: &str = "latest_ids";
pub const POSTED_IDS_KEY: &str = "posted_ids";

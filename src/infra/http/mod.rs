mod admin;
mod middleware;
mod public;
mod upstream;

pub use admin::{ContentSaved, InvalidationReport, build_admin_router};
pub use public::build_router;
pub use upstream::UpstreamClient;

pub mod handlers;
pub mod resolver;
pub mod routes;

pub use handlers::RedirectState;
pub use resolver::{ContentResolver, NullContentResolver, RedirectOutcome, Resolution};
pub use routes::create_redirect_router;

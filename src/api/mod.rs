pub mod error;
pub mod response;
pub mod route;

pub use error::ApiError;
pub use response::{created, with_total_count, ApiResponse};
pub use route::create_router;

//! HTTP surface over the orchestrator
//!
//! | Method | Path                | Handler |
//! |--------|---------------------|---------|
//! | POST   | `/download`         | submit a URL |
//! | GET    | `/jobs`             | list jobs, `?state=&limit=` |
//! | GET    | `/jobs/{job_id}`    | job status |
//! | DELETE | `/jobs/{job_id}`    | cancel |
//! | GET    | `/active_downloads` | running jobs |
//! | GET    | `/health`           | backend health and counters |

mod error;
mod extract;
pub mod models;
mod server;
pub mod services;
pub mod state;
mod validation;

pub use error::ApiError;
pub use server::{router, run};
pub use state::AppState;

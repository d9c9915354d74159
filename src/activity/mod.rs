pub mod model;
pub mod repository;
pub mod repository_sqlx;

pub use model::{Activity, ActivityStatus};
pub use repository::ActivityRepository;
pub use repository_sqlx::SqlxActivityRepository;

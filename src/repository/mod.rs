// ==========================================
// 食品生产批次追溯系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

pub mod batch_repo;
pub mod catalog_repo;
pub mod corrective_action_repo;
pub mod error;

pub use batch_repo::{BatchFilter, BatchRepository};
pub use catalog_repo::CatalogRepository;
pub use corrective_action_repo::CorrectiveActionRepository;
pub use error::{RepositoryError, RepositoryResult};

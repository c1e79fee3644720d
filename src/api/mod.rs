// ==========================================
// 食品生产批次追溯系统 - API 层
// ==========================================

pub mod batch_api;
pub mod error;

pub use batch_api::{
    BatchApi, BatchDetail, BatchListFilter, BatchPage, CompleteBatchInput, CreateBatchInput,
    UpdateBatchInput,
};
pub use error::{ApiError, ApiResult};

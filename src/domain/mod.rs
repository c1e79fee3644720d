// ==========================================
// 食品生产批次追溯系统 - 领域层
// ==========================================

pub mod batch;
pub mod catalog;
pub mod corrective_action;
pub mod provenance;
pub mod types;

pub use batch::{ConsumptionSource, MaterialConsumptionEntry, ProductionBatch};
pub use catalog::{AuxiliaryReceipt, CuringBatch, ProductMaster, ReceptionRecord};
pub use corrective_action::CorrectiveActionRequest;
pub use provenance::{OriginMaterial, ProvenanceReport, TraceEvent, UNREGISTERED_SUPPLIER};

// ==========================================
// 食品生产批次追溯系统 - 引擎层
// ==========================================
// 红线: 引擎只做业务判定与编排，持久化细节在仓储层
// ==========================================

pub mod compliance;
pub mod ledger;
pub mod provenance;

pub use compliance::{CompletionOutcome, ComplianceEngine, CorrectiveActionDispatcher};
pub use ledger::{ConsumptionEntryInput, ConsumptionLedger};
pub use provenance::{ProvenanceReconstructor, MAX_TRACE_DEPTH};

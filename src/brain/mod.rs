// Decision cycle: context build, reasoning call, parse, dispatch
pub mod coordinator;
pub mod parser;

pub use coordinator::{CycleOutcome, DecisionCoordinator, SYSTEM_INSTRUCTIONS};
pub use parser::{extract_json, ActionSpec, ActionType, Consultation, LlmDecision, TriggerSpec};

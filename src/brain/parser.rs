use crate::models::{NewTrigger, TradeParams, TriggerKind, TriggerOp};
use serde::{Deserialize, Serialize};

/// The action types the coordinator knows how to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Trade,
    SetTrigger,
    Wait,
    Notify,
}

impl ActionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TRADE" => Some(Self::Trade),
            "SET_TRIGGER" => Some(Self::SetTrigger),
            "WAIT" | "HOLD" => Some(Self::Wait),
            "NOTIFY" | "NOTIFY_USER" => Some(Self::Notify),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "TRADE",
            Self::SetTrigger => "SET_TRIGGER",
            Self::Wait => "WAIT",
            Self::Notify => "NOTIFY",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ActionSpec {
    pub fn action_type(&self) -> Option<ActionType> {
        self.kind.as_deref().and_then(ActionType::parse)
    }

    /// Interpret params as trade parameters; unknown fields are ignored and
    /// missing ones surface later as a failed execution, not a parse error
    pub fn trade_params(&self) -> TradeParams {
        serde_json::from_value(self.params.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerCondition {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub condition: TriggerCondition,
    #[serde(default)]
    pub description: Option<String>,
}

impl TriggerSpec {
    /// Convert to an insertable trigger row, defaulting the way the wire
    /// format is usually incomplete: kind PRICE_LEVEL, operator GTE,
    /// symbol BTCUSDT.
    pub fn to_new_trigger(&self) -> NewTrigger {
        NewTrigger {
            description: self
                .description
                .clone()
                .unwrap_or_else(|| "Auto trigger".to_string()),
            symbol: self
                .condition
                .symbol
                .clone()
                .unwrap_or_else(|| "BTCUSDT".to_string()),
            operator: self
                .condition
                .operator
                .as_deref()
                .and_then(TriggerOp::parse)
                .unwrap_or(TriggerOp::GTE),
            target_value: self.condition.value.unwrap_or(0.0),
            kind: self
                .kind
                .as_deref()
                .and_then(TriggerKind::parse)
                .unwrap_or(TriggerKind::PriceLevel),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Consultation {
    #[serde(default)]
    pub consultant: String,
    #[serde(default)]
    pub query: String,
}

/// Structured output of one reasoning round trip
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmDecision {
    #[serde(default, alias = "thought_process")]
    pub thought: String,
    #[serde(default)]
    pub action: Option<ActionSpec>,
    #[serde(default)]
    pub next_triggers: Vec<TriggerSpec>,
    #[serde(default)]
    pub consultations: Vec<Consultation>,
}

/// Best-effort JSON extraction from free-form model output.
///
/// Strips optional markdown fences, then takes the substring from the first
/// `{` to the last `}` and parses it. This is a documented best-effort
/// contract: failure is a value, never a panic, and the caller keeps the
/// raw text for audit.
pub fn extract_json(text: &str) -> Result<LlmDecision, String> {
    let mut text = text.trim();

    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    let text = text.trim();

    let start = text
        .find('{')
        .ok_or_else(|| "no JSON object found in response".to_string())?;
    let end = text
        .rfind('}')
        .ok_or_else(|| "no JSON object found in response".to_string())?;
    if end < start {
        return Err("no JSON object found in response".to_string());
    }

    serde_json::from_str(&text[start..=end]).map_err(|e| format!("JSON parse error: {}", e))
}

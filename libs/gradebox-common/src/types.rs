use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Weighted bucket of test cases. Tiers 1-2 are visible to the candidate,
/// tiers 3-5 only ever leave the grader as aggregate counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tier(u8);

impl Tier {
    pub const ALL: [Tier; 5] = [Tier(1), Tier(2), Tier(3), Tier(4), Tier(5)];

    /// Highest tier whose results are shown in full.
    const LAST_VISIBLE: u8 = 2;

    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Tier(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_visible(self) -> bool {
        self.0 <= Self::LAST_VISIBLE
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Tier::new(value).ok_or_else(|| format!("tier must be between 1 and 5, got {}", value))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.0)
    }
}

/// Outcome of one test case as it leaves the grader.
///
/// `name` and `error` are only populated for visible tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub test_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tier: Tier,
    pub passed: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub visible: bool,
    #[serde(default)]
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierScores {
    pub tier1: f64,
    pub tier2: f64,
    pub tier3: f64,
    pub tier4: f64,
    pub tier5: f64,
}

impl TierScores {
    pub fn get(&self, tier: Tier) -> f64 {
        match tier.get() {
            1 => self.tier1,
            2 => self.tier2,
            3 => self.tier3,
            4 => self.tier4,
            _ => self.tier5,
        }
    }

    pub fn set(&mut self, tier: Tier, points: f64) {
        let slot = match tier.get() {
            1 => &mut self.tier1,
            2 => &mut self.tier2,
            3 => &mut self.tier3,
            4 => &mut self.tier4,
            _ => &mut self.tier5,
        };
        *slot = points;
    }

    pub fn sum(&self) -> f64 {
        Tier::ALL.iter().map(|tier| self.get(*tier)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunReport {
    pub results: Vec<RunResult>,
    pub score: f64,
    pub tier_scores: TierScores,
}

impl TestRunReport {
    /// Record handed to the persistence collaborator after a run.
    pub fn to_record(&self, timestamp: DateTime<Utc>) -> TestRunRecord {
        TestRunRecord {
            id: None,
            score: self.score,
            tier1_score: self.tier_scores.tier1,
            tier2_score: self.tier_scores.tier2,
            tier3_score: self.tier_scores.tier3,
            tier4_score: self.tier_scores.tier4,
            tier5_score: self.tier_scores.tier5,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenSummary {
    pub total: usize,
    pub passed: usize,
}

/// What the candidate-facing surface is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateView {
    pub visible_results: Vec<RunResult>,
    pub hidden_summary: HiddenSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResponse {
    #[serde(flatten)]
    pub report: TestRunReport,
    #[serde(flatten)]
    pub view: CandidateView,
}

// ---------------------------------------------------------------------------
// Session history (owned by the persistence collaborator, read-only here)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Keystroke,
    Change,
    Paste,
    Focus,
    Blur,
    ChatSend,
    TestRun,
    Snapshot,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Serialized JSON payload, opaque to scoring.
    #[serde(default)]
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub score: f64,
    #[serde(default)]
    pub tier1_score: f64,
    #[serde(default)]
    pub tier2_score: f64,
    #[serde(default)]
    pub tier3_score: f64,
    #[serde(default)]
    pub tier4_score: f64,
    #[serde(default)]
    pub tier5_score: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    #[serde(default)]
    pub events: Vec<SessionEvent>,
    #[serde(default)]
    pub chat_messages: Vec<ChatMessage>,
    #[serde(default)]
    pub test_runs: Vec<TestRunRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSignals {
    pub total_editor_changes: usize,
    pub test_run_count: usize,
    /// Milliseconds from the first session event to the first test run.
    pub time_to_first_test_run: Option<i64>,
    pub edit_test_cycles: usize,
    pub paste_events: usize,
    /// Mean gap in milliseconds between consecutive test runs.
    pub avg_time_between_test_runs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAdoptionSignals {
    pub total_messages: usize,
    pub avg_prompt_length: u64,
    pub questions_asked: usize,
    pub code_request_count: usize,
    pub total_tokens_used: u64,
    pub messages_before_first_test_run: usize,
    pub messages_after_first_test_run: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScore {
    pub correctness: f64,
    pub process_signals: ProcessSignals,
    pub ai_adoption_signals: AiAdoptionSignals,
}

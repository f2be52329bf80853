use serde::{Deserialize, Serialize};

use crate::sandbox::ExitReason;

/// Final classification of a test case or a whole run.
///
/// Serialized as the short codes the reporting side expects; sandbox limit
/// breaches map onto the dedicated limit-exceeded variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "CE")]
    CompileError,
    #[serde(rename = "SE")]
    SystemError,
    #[serde(rename = "IG")]
    Ignored,
    #[serde(rename = "NJ")]
    NotJudged,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "WTLE")]
    WallTimeExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "OLE")]
    OutputLimitExceeded,
}

impl Verdict {
    pub fn code(self) -> &'static str {
        match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::RuntimeError => "RE",
            Verdict::CompileError => "CE",
            Verdict::SystemError => "SE",
            Verdict::Ignored => "IG",
            Verdict::NotJudged => "NJ",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::WallTimeExceeded => "WTLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::OutputLimitExceeded => "OLE",
        }
    }

    pub fn is_accepted(self) -> bool {
        self == Verdict::Accepted
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl From<ExitReason> for Verdict {
    fn from(reason: ExitReason) -> Verdict {
        match reason {
            ExitReason::None => Verdict::Accepted,
            ExitReason::CpuTime => Verdict::TimeLimitExceeded,
            ExitReason::RealTime => Verdict::WallTimeExceeded,
            ExitReason::Memory => Verdict::MemoryLimitExceeded,
            ExitReason::Output => Verdict::OutputLimitExceeded,
        }
    }
}

/// Result of one test case (or the compile stage), written by exactly one
/// worker and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeDetail {
    pub name: String,
    /// First bytes of the case input, for diagnostics.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub input: String,
    /// First bytes of the produced output (or compiler output).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    /// First bytes of the expected answer.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub answer: String,
    /// Checker comment or failure description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
    pub verdict: Verdict,
    pub score: u32,
    /// CPU time, milliseconds.
    pub exe_time: u64,
    /// Peak resident memory, bytes.
    pub exe_memory: u64,
    pub exit_code: i32,
    pub exit_signal: i32,
}

impl JudgeDetail {
    pub fn new(name: String) -> JudgeDetail {
        JudgeDetail {
            name,
            input: String::new(),
            output: String::new(),
            answer: String::new(),
            comment: String::new(),
            verdict: Verdict::Accepted,
            score: 0,
            exe_time: 0,
            exe_memory: 0,
            exit_code: 0,
            exit_signal: 0,
        }
    }
}

/// Aggregated outcome of a judging run.
#[derive(Debug, Clone, Serialize)]
pub struct JudgeResult {
    pub success: bool,
    pub verdict: Verdict,
    /// Peak CPU time over non-ignored cases, milliseconds.
    pub exe_time: u64,
    /// Peak memory over non-ignored cases, bytes.
    pub exe_memory: u64,
    /// Total score awarded.
    pub score: u32,
    /// Sum of all declared case scores.
    pub full_score: u32,
    pub detail: Vec<JudgeDetail>,
}

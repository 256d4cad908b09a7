use serde::{Deserialize, Serialize};

/// Phase of the focus/break work cycle.
///
/// `Idle` is both the initial and terminal mode of a session attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Idle,
    Warmup,
    Focus,
    Break,
}

impl TimerMode {
    pub fn is_idle(self) -> bool {
        self == TimerMode::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimerMode::Idle => "idle",
            TimerMode::Warmup => "warmup",
            TimerMode::Focus => "focus",
            TimerMode::Break => "break",
        }
    }
}

impl Default for TimerMode {
    fn default() -> Self {
        TimerMode::Idle
    }
}

impl std::fmt::Display for TimerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

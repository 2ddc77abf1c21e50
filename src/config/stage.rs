use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The seven pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Split,
    Build,
    Fuse,
    Audit,
    EditPass1,
    GlobalCheck,
    EditPass2,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Split,
        Stage::Build,
        Stage::Fuse,
        Stage::Audit,
        Stage::EditPass1,
        Stage::GlobalCheck,
        Stage::EditPass2,
    ];

    /// Identifier used in cache keys, file names and override tables
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Split => "split",
            Stage::Build => "build",
            Stage::Fuse => "fuse",
            Stage::Audit => "audit",
            Stage::EditPass1 => "edit_pass1",
            Stage::GlobalCheck => "global_check",
            Stage::EditPass2 => "edit_pass2",
        }
    }

    /// Name shown in progress events
    pub fn display_name(self) -> &'static str {
        match self {
            Stage::Split => "Split",
            Stage::Build => "Build",
            Stage::Fuse => "Fuse",
            Stage::Audit => "Audit",
            Stage::EditPass1 => "EditPass1",
            Stage::GlobalCheck => "GlobalCheck",
            Stage::EditPass2 => "EditPass2",
        }
    }

    /// 1-based position in the pipeline
    pub fn step(self) -> usize {
        self as usize + 1
    }

    /// Stage that runs after this one; `None` after EditPass2
    pub fn next(self) -> Option<Stage> {
        Stage::ALL.get(self.step()).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s || stage.display_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

//! Output profiles controlling what kind of clips the analysis looks for.

use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output profile for generated clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputProfile {
    /// Short, punchy clips for social networks
    #[default]
    Social,
    /// Medium-length self-contained lessons
    Educational,
    /// Longer reference material for later lookup
    Reference,
}

impl OutputProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputProfile::Social => "social",
            OutputProfile::Educational => "educational",
            OutputProfile::Reference => "reference",
        }
    }

    /// Human-readable target duration used in analysis prompts.
    pub fn target_duration(&self) -> &'static str {
        match self {
            OutputProfile::Social => "15-60 seconds",
            OutputProfile::Educational => "2-5 minutes",
            OutputProfile::Reference => "1-10 minutes",
        }
    }

    /// Editorial style guidance.
    pub fn style(&self) -> &'static str {
        match self {
            OutputProfile::Social => "dynamic and engaging",
            OutputProfile::Educational => "educational and structured",
            OutputProfile::Reference => "informative and complete",
        }
    }

    /// What the analysis should focus on.
    pub fn focus(&self) -> &'static str {
        match self {
            OutputProfile::Social => "viral moments, striking quotes, visually compelling content",
            OutputProfile::Educational => "complete concepts, clear explanations, educational value",
            OutputProfile::Reference => "key information, important data, future reference",
        }
    }
}

impl std::fmt::Display for OutputProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "social" | "social_clips" => Ok(OutputProfile::Social),
            "educational" | "education" => Ok(OutputProfile::Educational),
            "reference" | "archive" => Ok(OutputProfile::Reference),
            other => Err(format!("Unknown output profile: {}", other)),
        }
    }
}

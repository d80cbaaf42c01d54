//! Direct bypass for hackathon searches.
//!
//! Small models regularly fumble this intent when given the full tool set.
//! When the prompt asks for a hackathon search and the search tool is
//! connected, the adapter calls the tool itself and skips the model.

use std::sync::LazyLock;

use autopilot_core::display::display_tool_output;
use autopilot_core::error::ToolError;
use autopilot_core::tool::ToolSet;
use regex_lite::Regex;
use serde_json::json;

pub const SEARCH_TOOL: &str = "hb_scout_search_hackathons";
const DEFAULT_QUERY: &str = "hackathons";

static QUERY_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:hackathon-buddy\s+)?(?:search\s+for\s+|find\s+)(.+)").ok()
});

/// A search the adapter can run without the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectSearch {
    pub query: String,
}

impl DirectSearch {
    /// Match `prompt` against the bypass intent.
    ///
    /// Requires the search tool in `tools` and either the `/hackathon-buddy`
    /// command or "hackathon" together with "search" or "find".
    pub fn detect(prompt: &str, tools: &ToolSet) -> Option<Self> {
        if !tools.contains(SEARCH_TOOL) {
            return None;
        }
        let lower = prompt.to_lowercase();
        let wants_search = lower.contains("/hackathon-buddy")
            || (lower.contains("hackathon") && (lower.contains("search") || lower.contains("find")));
        if !wants_search {
            return None;
        }
        Some(Self {
            query: extract_query(prompt),
        })
    }

    pub fn arguments(&self) -> serde_json::Value {
        json!({
            "query": self.query,
            "platform": "all",
            "response_format": "markdown",
        })
    }

    /// Call the search tool and return its display text.
    pub async fn run(&self, tools: &ToolSet) -> Result<String, ToolError> {
        let result = tools.call(SEARCH_TOOL, self.arguments()).await?;
        if !result.success {
            return Err(ToolError::ExecutionFailed {
                tool_name: SEARCH_TOOL.into(),
                reason: result.output,
            });
        }
        Ok(display_tool_output(&result.payload()))
    }
}

fn extract_query(prompt: &str) -> String {
    QUERY_PATTERN
        .as_ref()
        .and_then(|re| re.captures(prompt))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| DEFAULT_QUERY.to_string())
}

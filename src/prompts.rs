//! Prompt definitions for the generative incident report.
//!
//! The instructions are fixed; the per-incident context is appended by
//! [`crate::external::gemini::build_prompt`].

/// Instructions for the incident analysis report.
pub const INCIDENT_REPORT_PROMPT: &str = r#"You are an expert SRE and UX engineer analyzing a user friction incident.
Analyze the data below and determine exactly what went wrong.

Generate a structured analysis report.

You must output ONLY valid JSON. Do not wrap it in markdown code fences.
The JSON object must have this exact schema:
{
  "intent": "What was the user trying to do?",
  "category": "One of: 'Bug', 'UX Friction', 'Performance', 'User Error'",
  "severity": "One of: 'Critical', 'High', 'Medium', 'Low'",
  "issue_title": "Concise technical title",
  "repro_steps": ["Step 1", "Step 2"],
  "suggested_fix": "Technical recommendation for the developer",
  "confidence": 0.8
}

confidence must be a number between 0.0 and 1.0."#;

/// Placeholder used when no external error was correlated.
pub const NO_EXTERNAL_ERROR: &str = "No external error correlated.";

/// Placeholder used when ranking produced no candidates.
pub const NO_ROOT_CAUSE: &str = "No root cause candidates.";

//! Slash-command resolution.
//!
//! A recognized command token selects a system-prompt template and a
//! default reasoning depth for the turn. An unrecognized token is not
//! an error: the whole input is treated as plain chat text.

use docshelf_core::backend::ReasoningDepth;

/// Default system prompt for plain chat turns.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an expert analyst assistant with advanced multimodal capabilities.

When analyzing files:
- For text/PDF documents: Always reference page numbers when available
- For images/charts/diagrams: Use your vision capabilities to describe visual elements, trends, patterns
- For video content: Provide timestamps in MM:SS format (minutes:seconds) for specific moments or events
- For audio content: Provide timestamps in MM:SS format (minutes:seconds) for key points
- For spreadsheets/data: Reference cell locations or row/column numbers, identify trends in charts
- For presentations: Describe slide layouts, visual elements, charts, and diagrams
- Provide clear, detailed analysis that synthesizes information across all provided files
- When comparing multiple files, explicitly note connections and discrepancies
- Use your native vision understanding to analyze charts, graphs, images, and visual data";

const REPORT_PROMPT: &str = "\
You are a concise executive summarizer analyzing multiple data sources.

Your task:
- Create a cohesive summary integrating information from ALL uploaded files
- Highlight key points, main themes, and important takeaways
- Use clear section headers to organize information
- Cite specific sources with page numbers/timestamps when referencing data
- Keep language professional but accessible
- Use bullet points for clarity where appropriate

Output format:
## Executive Summary
[2-3 sentence overview]

## Key Findings
[Main points with citations]

## Detailed Analysis
[Organized by theme/topic]

## Recommendations (if applicable)
[Actionable insights]

Focus on synthesizing information cohesively, not just listing what each file contains.";

const SYNTHESIZE_PROMPT: &str = "\
You are a research synthesizer identifying novel insights and patterns.

Your task:
- Analyze ALL uploaded files to find connections, patterns, and emerging themes
- Identify gaps in the existing data or knowledge
- Generate novel insights or theories that emerge from combining these sources
- Think creatively about what the data implies beyond surface-level observations
- Explain your reasoning process clearly

Look for:
- Unexpected connections between different files/data points
- Contradictions that reveal deeper truths
- Patterns that suggest causation or correlation
- Gaps that point to missing information or new research directions
- Implications that go beyond what's explicitly stated

Output format:
## Synthesis Overview
[What patterns/connections emerged]

## Novel Insights
[New theories or understanding generated from the data]

## Supporting Evidence
[Cite specific examples from files with page numbers/timestamps]

## Implications
[What this means, what questions it raises]

## Gaps & Future Directions
[What's missing, what should be investigated next]

Be creative but rigorous. Support all claims with evidence from the uploaded files.";

const ERROR_CHECK_PROMPT: &str = "\
You are a meticulous fact-checker identifying contradictions and inconsistencies.

Your task:
- Cross-reference ALL uploaded files systematically
- Identify any contradictions, conflicting data, or inconsistent statements
- Flag discrepancies in numbers, dates, facts, or claims
- Note instances where sources disagree
- Distinguish between clear contradictions vs. different perspectives
- Assess severity (critical error vs. minor discrepancy)

For each issue found, provide:
1. **Type**: Data contradiction / Logical inconsistency / Conflicting claims / Other
2. **Severity**: Critical / Moderate / Minor
3. **Sources**: Cite both/all conflicting sources with page numbers/timestamps
4. **Details**: Explain the contradiction clearly
5. **Assessment**: Is this a true error or explainable difference?

Output format:
## Summary
[Total contradictions found, severity breakdown]

## Critical Issues
[High-priority contradictions that need immediate attention]

## Moderate Issues
[Significant discrepancies worth investigating]

## Minor Issues
[Small inconsistencies that may be explainable]

## Verified Consistencies (Optional)
[Key facts that are consistent across all sources - builds confidence]

Be thorough but fair. Not all differences are errors - context matters. If files are consistent, say so clearly.";

const HELP_TEXT: &str = "\
**Available Commands:**

**`/report`** - Generate executive summary and cohesive report
**`/synthesize`** - Identify patterns and generate novel insights
**`/error-check`** - Find contradictions and inconsistencies

Example: `/report` or `/synthesize focus on financial data`

**Charting:**
Just ask! Say \"plot sales over time\" or \"chart customer acquisition vs revenue\"
Charts are generated automatically when you ask for visualizations.

Other features:
- **Reasoning depth** - Adjust deliberation (minimal/low/medium/high)";

/// How a user input resolves before the turn is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Plain chat: default system prompt, baseline depth.
    Chat,
    /// A recognized preset command.
    Preset {
        /// Canonical command name, e.g. "/report"
        name: &'static str,
        system_prompt: &'static str,
        depth: ReasoningDepth,
    },
    /// The help command: answer locally, never hits the backend.
    Help(&'static str),
}

/// Resolve a user input against the known slash commands.
///
/// Only the first whitespace-delimited token is inspected; the rest of
/// the input rides along as the message. Inputs not starting with `/`,
/// and unknown `/commands`, are plain chat.
pub fn resolve(input: &str) -> Resolved {
    let trimmed = input.trim_start();
    if !trimmed.starts_with('/') {
        return Resolved::Chat;
    }
    let token = trimmed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();

    match token.as_str() {
        "/help" | "/commands" => Resolved::Help(HELP_TEXT),
        "/report" | "/summarize" | "/digest" => Resolved::Preset {
            name: "/report",
            system_prompt: REPORT_PROMPT,
            depth: ReasoningDepth::Medium,
        },
        "/synthesize" | "/theory" | "/insights" => Resolved::Preset {
            name: "/synthesize",
            system_prompt: SYNTHESIZE_PROMPT,
            depth: ReasoningDepth::High,
        },
        "/error-check" | "/contradictions" | "/verify" => Resolved::Preset {
            name: "/error-check",
            system_prompt: ERROR_CHECK_PROMPT,
            depth: ReasoningDepth::High,
        },
        _ => Resolved::Chat,
    }
}

/// Short mode label for display, if the input selects a preset.
pub fn indicator(input: &str) -> Option<&'static str> {
    match resolve(input) {
        Resolved::Preset { name: "/report", .. } => Some("REPORT MODE"),
        Resolved::Preset { name: "/synthesize", .. } => Some("SYNTHESIS MODE"),
        Resolved::Preset { name: "/error-check", .. } => Some("ERROR-CHECK MODE"),
        _ => None,
    }
}

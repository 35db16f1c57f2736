//! Suggestion generator: the phase that turns insights into candidate work.
//!
//! Four generators run in sequence over a [`WorkflowAnalysis`] and their
//! output is concatenated:
//!
//! - task suggestions (delegate, merge)
//! - schedule suggestions (focus block, meeting overload)
//! - automation suggestions (recurring patterns, email templates)
//! - generated suggestions from the text backend (best effort)
//!
//! [`prioritize`] then ranks, filters and caps the list.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use flowpilot_agent::TextGenerator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::action::{ActionType, WorkflowAction};
use crate::analysis::{InsightData, InsightType, SIMILAR_TASKS_TITLE, WorkflowAnalysis};
use crate::generated::{GeneratedParseError, extract_json_array};
use crate::trigger::TriggerType;

/// Default cap on the number of suggestions kept after ranking.
pub const MAX_SUGGESTIONS: usize = 5;

/// Suggestions below this confidence are dropped unless high priority.
pub const MIN_CONFIDENCE: f64 = 0.5;

/// Priority at or above which low confidence is tolerated.
pub const HIGH_PRIORITY: u8 = 8;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    Automate,
    Delegate,
    Schedule,
    Merge,
    Prioritize,
    Remind,
    Template,
    Optimize,
}

impl SuggestionType {
    fn from_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "automate" | "automation" => Self::Automate,
            "delegate" | "delegation" => Self::Delegate,
            "schedule" | "scheduling" => Self::Schedule,
            "merge" => Self::Merge,
            "prioritize" | "prioritise" => Self::Prioritize,
            "remind" | "reminder" => Self::Remind,
            "template" => Self::Template,
            _ => Self::Optimize,
        }
    }
}

/// Expected benefit of applying a suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatedImpact {
    /// Minutes saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_saved: Option<f64>,
    /// Relative effort reduction in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort_reduced: Option<f64>,
}

impl EstimatedImpact {
    fn minutes(time_saved: f64) -> Self {
        Self {
            time_saved: Some(time_saved),
            effort_reduced: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSuggestion {
    pub id: String,
    #[serde(rename = "type")]
    pub suggestion_type: SuggestionType,
    pub title: String,
    pub description: String,
    pub actions: Vec<WorkflowAction>,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    #[serde(default)]
    pub estimated_impact: EstimatedImpact,
    pub reasoning: String,
    pub confidence: f64,
}

impl WorkflowSuggestion {
    pub fn new(
        suggestion_type: SuggestionType,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: u8,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            suggestion_type,
            title: title.into(),
            description: description.into(),
            actions: Vec::new(),
            priority: priority.clamp(1, 10),
            estimated_impact: EstimatedImpact::default(),
            reasoning: String::new(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn with_action(mut self, action: WorkflowAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_impact(mut self, impact: EstimatedImpact) -> Self {
        self.estimated_impact = impact;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Ranking key: `priority * confidence`.
    pub fn score(&self) -> f64 {
        f64::from(self.priority) * self.confidence
    }

    pub fn time_saved(&self) -> f64 {
        self.estimated_impact.time_saved.unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SuggestionGenerator {
    generator: Arc<dyn TextGenerator>,
    limit: usize,
}

impl SuggestionGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            limit: MAX_SUGGESTIONS,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Generate, rank and cap suggestions for `analysis`.
    pub async fn generate(&self, analysis: &WorkflowAnalysis) -> Vec<WorkflowSuggestion> {
        self.generate_at(analysis, Utc::now()).await
    }

    pub async fn generate_at(&self, analysis: &WorkflowAnalysis, now: DateTime<Utc>) -> Vec<WorkflowSuggestion> {
        let mut suggestions = task_suggestions(analysis);
        suggestions.extend(schedule_suggestions(analysis, now));
        suggestions.extend(automation_suggestions(analysis));
        suggestions.extend(self.generated_suggestions(analysis).await);

        let candidates = suggestions.len();
        let ranked = prioritize(suggestions, analysis, self.limit);
        debug!(
            workflow_id = %analysis.workflow_id,
            candidates,
            kept = ranked.len(),
            "suggestions generated"
        );
        ranked
    }

    async fn generated_suggestions(&self, analysis: &WorkflowAnalysis) -> Vec<WorkflowSuggestion> {
        let prompt = suggestion_prompt(analysis);
        let text = match self.generator.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(generator = self.generator.name(), error = %e, "suggestion generation unavailable");
                return Vec::new();
            }
        };
        match parse_generated_suggestions(&text) {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!(error = %e, "could not parse generated suggestions");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rule-based generators
// ---------------------------------------------------------------------------

/// Delegation under heavy load and merging of similar tasks.
pub fn task_suggestions(analysis: &WorkflowAnalysis) -> Vec<WorkflowSuggestion> {
    let mut out = Vec::new();
    let open = analysis.context.user.open_tasks;

    if open > 10 {
        out.push(
            WorkflowSuggestion::new(
                SuggestionType::Delegate,
                "Delegate Tasks",
                format!("You have {open} open tasks. Hand some of them to teammates."),
                8,
                0.75,
            )
            .with_action(
                WorkflowAction::new(ActionType::AnalyzeData, "Find delegation candidates")
                    .param("data_type", "tasks")
                    .param("time_range_days", 7),
            )
            .with_action(
                WorkflowAction::new(ActionType::NotifyUser, "Share delegation candidates")
                    .param("title", "Tasks to delegate")
                    .param("message", format!("{open} open tasks; review the candidates for delegation."))
                    .param("notification_type", "suggestion"),
            )
            .with_impact(EstimatedImpact::minutes(30.0))
            .with_reasoning("Workload is well above a manageable level"),
        );
    }

    for insight in &analysis.insights {
        if insight.insight_type != InsightType::PatternDetected || insight.title != SIMILAR_TASKS_TITLE {
            continue;
        }
        let InsightData::Pattern { pattern, frequency } = &insight.data else {
            continue;
        };
        out.push(
            WorkflowSuggestion::new(
                SuggestionType::Merge,
                "Merge Similar Tasks",
                format!("{frequency} tasks start with \"{pattern}\"; track them as one."),
                6,
                0.7,
            )
            .with_action(
                WorkflowAction::new(ActionType::CreateTask, "Create combined task")
                    .param("title", format!("Batch: {pattern} tasks"))
                    .param("description", format!("Combined follow-up for {frequency} similar tasks"))
                    .param("priority", "medium"),
            )
            .with_impact(EstimatedImpact::minutes(f64::from(*frequency) * 5.0))
            .with_reasoning(insight.description.clone()),
        );
    }

    out
}

/// Morning focus block and meeting overload.
pub fn schedule_suggestions(analysis: &WorkflowAnalysis, now: DateTime<Utc>) -> Vec<WorkflowSuggestion> {
    let mut out = Vec::new();
    let user = &analysis.context.user;

    if user.open_tasks > 5 {
        let (start, end) = focus_window(now);
        out.push(
            WorkflowSuggestion::new(
                SuggestionType::Schedule,
                "Block Focus Time",
                "Reserve two uninterrupted morning hours for open work.",
                6,
                0.7,
            )
            .with_action(
                WorkflowAction::new(ActionType::ScheduleEvent, "Schedule focus block")
                    .param("title", "Focus time")
                    .param("start_time", start.to_rfc3339())
                    .param("end_time", end.to_rfc3339())
                    .param("description", "Reserved by flowpilot"),
            )
            .with_impact(EstimatedImpact {
                time_saved: Some(45.0),
                effort_reduced: Some(0.3),
            })
            .with_reasoning(format!("{} open tasks compete for attention", user.open_tasks)),
        );
    }

    if user.upcoming_events > 5 {
        out.push(
            WorkflowSuggestion::new(
                SuggestionType::Optimize,
                "Meeting Overload",
                format!("{} meetings in the next 7 days.", user.upcoming_events),
                7,
                0.65,
            )
            .with_action(
                WorkflowAction::new(ActionType::NotifyUser, "Flag meeting overload")
                    .param("title", "Meeting overload")
                    .param(
                        "message",
                        format!("{} meetings this week; consider declining or merging some.", user.upcoming_events),
                    )
                    .param("notification_type", "suggestion"),
            )
            .with_action(
                WorkflowAction::new(ActionType::AnalyzeData, "Summarise calendar load")
                    .param("data_type", "calendar")
                    .optional(),
            )
            .with_impact(EstimatedImpact::minutes(30.0))
            .with_reasoning("Calendar density leaves little time for task work"),
        );
    }

    out
}

/// Tomorrow 09:00 to 11:00 UTC.
fn focus_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = (now + Duration::days(1)).date_naive();
    let start = day.and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default()).and_utc();
    (start, start + Duration::hours(2))
}

/// Automating recurring patterns and templating email replies.
pub fn automation_suggestions(analysis: &WorkflowAnalysis) -> Vec<WorkflowSuggestion> {
    let mut out = Vec::new();

    for insight in &analysis.insights {
        if insight.title == SIMILAR_TASKS_TITLE {
            continue;
        }
        let InsightData::Pattern { pattern, frequency } = &insight.data else {
            continue;
        };
        if *frequency <= 3 {
            continue;
        }
        out.push(
            WorkflowSuggestion::new(
                SuggestionType::Automate,
                format!("Automate {pattern}"),
                format!("\"{pattern}\" happened {frequency} times recently and could run automatically."),
                7,
                0.65,
            )
            .with_action(
                WorkflowAction::new(ActionType::NotifyUser, "Propose automation")
                    .param("title", format!("Automate {pattern}?"))
                    .param("message", format!("\"{pattern}\" recurs {frequency} times; an automation is available."))
                    .param("notification_type", "suggestion"),
            )
            .with_impact(EstimatedImpact::minutes(f64::from(*frequency) * 2.0))
            .with_reasoning(insight.description.clone()),
        );
    }

    if analysis.trigger_type == TriggerType::EmailReceived {
        out.push(
            WorkflowSuggestion::new(
                SuggestionType::Template,
                "Email Response Template",
                "Draft a reusable reply for this kind of message.",
                5,
                0.6,
            )
            .with_action(
                WorkflowAction::new(ActionType::GenerateContent, "Draft reply template")
                    .param("content_type", "email_template")
                    .param("prompt", "Write a short, polite, reusable reply template for a routine incoming email."),
            )
            .with_impact(EstimatedImpact::minutes(20.0))
            .with_reasoning("Incoming mail of this kind recurs"),
        );
    }

    out
}

// ---------------------------------------------------------------------------
// Generated suggestions
// ---------------------------------------------------------------------------

fn suggestion_prompt(analysis: &WorkflowAnalysis) -> String {
    let insights: Vec<String> = analysis
        .insights
        .iter()
        .map(|i| format!("- [{:?}] {}: {}", i.importance, i.title, i.description))
        .collect();
    format!(
        "A `{trigger}` workflow fired. The user has {open} open tasks and {events} upcoming events.\n\
         Insights:\n{insights}\n\
         Return a JSON array of up to 3 suggestions, each an object with fields \"type\" \
         (automate|delegate|schedule|merge|prioritize|remind|template|optimize), \"title\", \
         \"description\", \"priority\" (1-10), \"confidence\" (0-1) and \"time_saved\" (minutes).",
        trigger = analysis.trigger_type,
        open = analysis.context.user.open_tasks,
        events = analysis.context.user.upcoming_events,
        insights = if insights.is_empty() { "- none".to_string() } else { insights.join("\n") },
    )
}

#[derive(Debug, Deserialize)]
struct GeneratedSuggestion {
    #[serde(rename = "type", default)]
    suggestion_type: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    time_saved: Option<f64>,
}

/// Parse generated text into suggestions, each carrying one `notify_user`
/// action built from its title and description.
pub fn parse_generated_suggestions(text: &str) -> Result<Vec<WorkflowSuggestion>, GeneratedParseError> {
    let raw: Vec<GeneratedSuggestion> = extract_json_array(text)?;
    Ok(raw
        .into_iter()
        .filter(|g| !g.title.trim().is_empty())
        .take(MAX_SUGGESTIONS)
        .map(|g| {
            let title = g.title.trim().to_string();
            let priority = g.priority.unwrap_or(5.0).round().clamp(1.0, 10.0) as u8;
            let action = WorkflowAction::new(ActionType::NotifyUser, format!("Share: {title}"))
                .param("title", title.clone())
                .param("message", g.description.clone())
                .param("notification_type", "suggestion")
                .param("metadata", json!({ "source": "generated" }));
            WorkflowSuggestion::new(
                SuggestionType::from_loose(&g.suggestion_type),
                title,
                g.description,
                priority,
                g.confidence.unwrap_or(0.6),
            )
            .with_action(action)
            .with_impact(EstimatedImpact {
                time_saved: g.time_saved.filter(|t| t.is_finite() && *t >= 0.0),
                effort_reduced: None,
            })
            .with_reasoning("Generated from the analysis insights")
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Prioritization
// ---------------------------------------------------------------------------

/// Whether a suggestion still makes sense in the analysed context.
fn is_relevant(suggestion: &WorkflowSuggestion, analysis: &WorkflowAnalysis) -> bool {
    let open = analysis.context.user.open_tasks;
    match suggestion.suggestion_type {
        SuggestionType::Delegate => open > 5,
        SuggestionType::Merge => open > 1,
        SuggestionType::Template => analysis.trigger_type == TriggerType::EmailReceived,
        _ => true,
    }
}

/// Rank by `priority * confidence`, drop low-confidence (unless priority is
/// at least [`HIGH_PRIORITY`]) and irrelevant suggestions, keep `limit`.
pub fn prioritize(
    mut suggestions: Vec<WorkflowSuggestion>,
    analysis: &WorkflowAnalysis,
    limit: usize,
) -> Vec<WorkflowSuggestion> {
    suggestions.sort_by(|a, b| b.score().total_cmp(&a.score()));
    suggestions.retain(|s| (s.confidence >= MIN_CONFIDENCE || s.priority >= HIGH_PRIORITY) && is_relevant(s, analysis));
    suggestions.truncate(limit);
    suggestions
}

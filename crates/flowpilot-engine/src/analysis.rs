//! Analysis engine: the first phase after a trigger fires.
//!
//! [`AnalysisEngine::analyze`] runs five steps in order, each able to read
//! the output of the ones before it:
//!
//! 1. context assembly (workload, calendar, activity, environment)
//! 2. historical statistics over the workflow's last 30 days
//! 3. generated insights from the text backend (best effort)
//! 4. deterministic anomaly and risk rules
//! 5. deterministic optimization rules
//!
//! The result is a [`WorkflowAnalysis`] carrying a confidence score.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use flowpilot_agent::TextGenerator;
use flowpilot_store::{StoredExecution, StoredTask, Stores};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{ContextProvider, ContextSnapshot, EnvironmentContext, TimeOfDay};
use crate::error::Result;
use crate::generated::{GeneratedParseError, extract_json_array};
use crate::suggestion::WorkflowSuggestion;
use crate::trigger::TriggerType;

/// Lookback for historical statistics.
pub const HISTORY_WINDOW_DAYS: i64 = 30;

/// Open-task count above which a backlog anomaly is raised.
pub const TASK_BACKLOG_THRESHOLD: i64 = 20;

const MAX_GENERATED_INSIGHTS: usize = 5;

// ---------------------------------------------------------------------------
// Insight types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    PatternDetected,
    AnomalyDetected,
    OptimizationOpportunity,
    RiskIdentified,
    Recommendation,
}

impl InsightType {
    /// Lenient mapping for generated text (`"pattern"`, `"risk"`, ...).
    fn from_loose(s: &str) -> Self {
        let s = s.to_ascii_lowercase();
        if s.contains("pattern") {
            Self::PatternDetected
        } else if s.contains("anomal") {
            Self::AnomalyDetected
        } else if s.contains("optim") {
            Self::OptimizationOpportunity
        } else if s.contains("risk") {
            Self::RiskIdentified
        } else {
            Self::Recommendation
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Medium,
    High,
    Critical,
}

impl Importance {
    fn from_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

/// Payload of an insight; the variant follows the insight type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightData {
    Pattern {
        pattern: String,
        frequency: u32,
    },
    Anomaly {
        metric: String,
        value: f64,
        threshold: f64,
    },
    Optimization {
        opportunity: String,
        affected_items: u32,
        estimated_minutes_saved: f64,
    },
    Risk {
        risk: String,
        affected_items: u32,
    },
    Recommendation {
        suggestion: String,
    },
}

impl InsightData {
    fn generated(insight_type: InsightType, title: &str) -> Self {
        match insight_type {
            InsightType::PatternDetected => Self::Pattern {
                pattern: title.to_string(),
                frequency: 0,
            },
            InsightType::AnomalyDetected => Self::Anomaly {
                metric: title.to_string(),
                value: 0.0,
                threshold: 0.0,
            },
            InsightType::OptimizationOpportunity => Self::Optimization {
                opportunity: title.to_string(),
                affected_items: 0,
                estimated_minutes_saved: 0.0,
            },
            InsightType::RiskIdentified => Self::Risk {
                risk: title.to_string(),
                affected_items: 0,
            },
            InsightType::Recommendation => Self::Recommendation {
                suggestion: title.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInsight {
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub title: String,
    pub description: String,
    pub data: InsightData,
    pub importance: Importance,
}

impl AnalysisInsight {
    pub fn new(
        insight_type: InsightType,
        title: impl Into<String>,
        description: impl Into<String>,
        data: InsightData,
        importance: Importance,
    ) -> Self {
        Self {
            insight_type,
            title: title.into(),
            description: description.into(),
            data,
            importance,
        }
    }
}

// ---------------------------------------------------------------------------
// Context and statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCount {
    pub action_type: String,
    pub count: u32,
}

/// Statistics over a workflow's recent executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStats {
    pub execution_count: u32,
    /// Executions per day across the lookback window.
    pub frequency_per_day: f64,
    pub success_rate: f64,
    /// Top five executed action types by count.
    pub common_actions: Vec<ActionCount>,
    /// Top three start hours (UTC).
    pub peak_hours: Vec<u32>,
    pub avg_duration_ms: f64,
}

/// Completed with no failed action, the same rule workflow metrics use.
fn succeeded(execution: &StoredExecution) -> bool {
    execution.status == "completed"
        && !execution
            .executed_actions
            .as_array()
            .is_some_and(|actions| actions.iter().any(|a| a.get("status").and_then(Value::as_str) == Some("failed")))
}

impl HistoricalStats {
    pub fn from_executions(executions: &[StoredExecution]) -> Self {
        if executions.is_empty() {
            return Self::default();
        }
        let count = executions.len();

        let succeeded = executions.iter().filter(|e| succeeded(e)).count();

        let mut action_counts: HashMap<String, u32> = HashMap::new();
        for execution in executions {
            let Some(actions) = execution.executed_actions.as_array() else {
                continue;
            };
            for action in actions {
                if let Some(action_type) = action.get("action_type").and_then(Value::as_str) {
                    *action_counts.entry(action_type.to_string()).or_default() += 1;
                }
            }
        }
        let mut common_actions: Vec<ActionCount> = action_counts
            .into_iter()
            .map(|(action_type, count)| ActionCount { action_type, count })
            .collect();
        common_actions.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.action_type.cmp(&b.action_type)));
        common_actions.truncate(5);

        let mut hour_counts = [0u32; 24];
        for execution in executions {
            hour_counts[execution.started_at.hour() as usize] += 1;
        }
        let mut hours: Vec<u32> = (0..24).filter(|h| hour_counts[*h as usize] > 0).collect();
        hours.sort_by(|a, b| hour_counts[*b as usize].cmp(&hour_counts[*a as usize]).then(a.cmp(b)));
        hours.truncate(3);

        let durations: Vec<f64> = executions
            .iter()
            .filter_map(|e| e.completed_at.map(|done| (done - e.started_at).num_milliseconds() as f64))
            .collect();
        let avg_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        Self {
            execution_count: count as u32,
            frequency_per_day: count as f64 / HISTORY_WINDOW_DAYS as f64,
            success_rate: succeeded as f64 / count as f64,
            common_actions,
            peak_hours: hours,
            avg_duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub open_tasks: i64,
    pub overdue_tasks: i64,
    pub upcoming_events: usize,
    /// Kinds of the most recent activity entries, newest first.
    pub recent_activity: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub user: UserContext,
    pub environment: EnvironmentContext,
    pub history: HistoricalStats,
}

/// Output of the analysis phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAnalysis {
    pub id: String,
    pub workflow_id: String,
    pub trigger_id: String,
    pub trigger_type: TriggerType,
    pub context: AnalysisContext,
    pub insights: Vec<AnalysisInsight>,
    /// Filled in by the suggestion phase.
    #[serde(default)]
    pub suggestions: Vec<WorkflowSuggestion>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowAnalysis {
    pub fn has_insight(&self, insight_type: InsightType, title: &str) -> bool {
        self.insights
            .iter()
            .any(|i| i.insight_type == insight_type && i.title == title)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Identifies the trigger an analysis runs for.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub owner_id: &'a str,
    pub trigger_id: &'a str,
    pub trigger_type: TriggerType,
    pub data: &'a Value,
}

#[derive(Clone)]
pub struct AnalysisEngine {
    stores: Stores,
    context: ContextProvider,
    generator: Arc<dyn TextGenerator>,
}

impl AnalysisEngine {
    pub fn new(stores: Stores, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            context: ContextProvider::new(stores.clone()),
            stores,
            generator,
        }
    }

    pub async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<WorkflowAnalysis> {
        self.analyze_at(request, Utc::now()).await
    }

    pub async fn analyze_at(&self, request: AnalysisRequest<'_>, now: DateTime<Utc>) -> Result<WorkflowAnalysis> {
        // 1. context
        let snapshot = self.context.snapshot_at(request.owner_id, request.data, now).await?;

        // 2. history
        let executions = self
            .stores
            .executions
            .list_for_workflow_since(request.trigger_id, now - Duration::days(HISTORY_WINDOW_DAYS))
            .await?;
        let history = HistoricalStats::from_executions(&executions);

        let context = AnalysisContext {
            user: UserContext {
                open_tasks: snapshot.open_tasks,
                overdue_tasks: snapshot.overdue_tasks,
                upcoming_events: snapshot.upcoming_events.len(),
                recent_activity: snapshot.recent_activity.iter().map(|a| a.kind.clone()).collect(),
            },
            environment: snapshot.environment.clone(),
            history,
        };

        let mut insights = pattern_insights(&context.history);

        // 3. generated
        insights.extend(self.generated_insights(&request, &context).await);

        // 4. anomalies and risks
        insights.extend(detect_anomalies(&snapshot));

        // 5. optimizations
        insights.extend(detect_optimizations(&snapshot));

        let confidence = score_confidence(&context.history, &insights);
        debug!(
            trigger_id = %request.trigger_id,
            insights = insights.len(),
            confidence,
            "analysis complete"
        );

        Ok(WorkflowAnalysis {
            id: Uuid::now_v7().to_string(),
            workflow_id: request.trigger_id.to_string(),
            trigger_id: request.trigger_id.to_string(),
            trigger_type: request.trigger_type,
            context,
            insights,
            suggestions: Vec::new(),
            confidence,
            timestamp: now,
        })
    }

    async fn generated_insights(&self, request: &AnalysisRequest<'_>, context: &AnalysisContext) -> Vec<AnalysisInsight> {
        let prompt = insight_prompt(request, context);
        let text = match self.generator.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(generator = self.generator.name(), error = %e, "insight generation unavailable");
                return Vec::new();
            }
        };
        match parse_generated_insights(&text) {
            Ok(insights) => insights,
            Err(e) => {
                warn!(error = %e, "could not parse generated insights");
                Vec::new()
            }
        }
    }
}

fn insight_prompt(request: &AnalysisRequest<'_>, context: &AnalysisContext) -> String {
    let history = &context.history;
    let actions: Vec<String> = history
        .common_actions
        .iter()
        .map(|a| format!("{} ({}x)", a.action_type, a.count))
        .collect();
    format!(
        "A `{trigger}` workflow trigger fired for a user.\n\
         Current context: {open} open tasks ({overdue} overdue), {events} calendar events in the next 7 days, \
         it is {tod:?} on {day}.\n\
         Last 30 days: {count} executions ({freq:.2}/day), success rate {rate:.0}%, \
         common actions: {actions}.\n\
         Return a JSON array of up to 3 insights, each an object with fields \
         \"type\" (pattern|anomaly|optimization|risk|recommendation), \"title\", \"description\" and \
         \"importance\" (low|medium|high|critical).",
        trigger = request.trigger_type,
        open = context.user.open_tasks,
        overdue = context.user.overdue_tasks,
        events = context.user.upcoming_events,
        tod = context.environment.time_of_day,
        day = context.environment.day_of_week,
        count = history.execution_count,
        freq = history.frequency_per_day,
        rate = history.success_rate * 100.0,
        actions = if actions.is_empty() { "none".to_string() } else { actions.join(", ") },
    )
}

#[derive(Debug, Deserialize)]
struct GeneratedInsight {
    #[serde(rename = "type", default)]
    insight_type: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    importance: String,
}

/// Parse generated text into insights.
pub fn parse_generated_insights(text: &str) -> std::result::Result<Vec<AnalysisInsight>, GeneratedParseError> {
    let raw: Vec<GeneratedInsight> = extract_json_array(text)?;
    Ok(raw
        .into_iter()
        .filter(|g| !g.title.trim().is_empty())
        .take(MAX_GENERATED_INSIGHTS)
        .map(|g| {
            let insight_type = InsightType::from_loose(&g.insight_type);
            AnalysisInsight::new(
                insight_type,
                g.title.trim(),
                g.description,
                InsightData::generated(insight_type, g.title.trim()),
                Importance::from_loose(&g.importance),
            )
        })
        .collect())
}

/// One pattern insight per action type that ran more than three times.
fn pattern_insights(history: &HistoricalStats) -> Vec<AnalysisInsight> {
    history
        .common_actions
        .iter()
        .filter(|a| a.count > 3)
        .map(|a| {
            AnalysisInsight::new(
                InsightType::PatternDetected,
                format!("Recurring {}", a.action_type),
                format!("`{}` ran {} times in the last {HISTORY_WINDOW_DAYS} days", a.action_type, a.count),
                InsightData::Pattern {
                    pattern: a.action_type.clone(),
                    frequency: a.count,
                },
                Importance::Medium,
            )
        })
        .collect()
}

/// Backlog anomaly, schedule conflicts and overdue work.
pub fn detect_anomalies(snapshot: &ContextSnapshot) -> Vec<AnalysisInsight> {
    let mut insights = Vec::new();

    if snapshot.open_tasks > TASK_BACKLOG_THRESHOLD {
        insights.push(AnalysisInsight::new(
            InsightType::AnomalyDetected,
            "High Task Load",
            format!(
                "{} open tasks, above the usual ceiling of {TASK_BACKLOG_THRESHOLD}",
                snapshot.open_tasks
            ),
            InsightData::Anomaly {
                metric: "open_tasks".into(),
                value: snapshot.open_tasks as f64,
                threshold: TASK_BACKLOG_THRESHOLD as f64,
            },
            Importance::High,
        ));
    }

    let overlaps = count_overlaps(snapshot);
    if overlaps > 0 {
        insights.push(AnalysisInsight::new(
            InsightType::RiskIdentified,
            "Schedule Conflict",
            format!("{overlaps} calendar events overlap in the next week"),
            InsightData::Risk {
                risk: "overlapping_events".into(),
                affected_items: overlaps,
            },
            Importance::Critical,
        ));
    }

    if snapshot.overdue_tasks > 0 {
        insights.push(AnalysisInsight::new(
            InsightType::RiskIdentified,
            "Overdue Tasks",
            format!("{} tasks are past their due date", snapshot.overdue_tasks),
            InsightData::Risk {
                risk: "overdue_tasks".into(),
                affected_items: snapshot.overdue_tasks as u32,
            },
            Importance::High,
        ));
    }

    insights
}

/// Events whose window starts before an earlier event has ended.
fn count_overlaps(snapshot: &ContextSnapshot) -> u32 {
    let mut events: Vec<_> = snapshot.upcoming_events.iter().collect();
    events.sort_by_key(|e| e.start_time);

    let mut overlaps = 0;
    let mut latest_end: Option<DateTime<Utc>> = None;
    for event in events {
        if latest_end.is_some_and(|end| event.start_time < end) {
            overlaps += 1;
        }
        latest_end = Some(latest_end.map_or(event.end_time, |end| end.max(event.end_time)));
    }
    overlaps
}

/// Batching, meeting consolidation and evening planning.
pub fn detect_optimizations(snapshot: &ContextSnapshot) -> Vec<AnalysisInsight> {
    let mut insights = Vec::new();

    if snapshot.open_tasks > 5
        && let Some((keyword, count)) = largest_similar_group(&snapshot.recent_tasks)
        && count >= 3
    {
        insights.push(AnalysisInsight::new(
            InsightType::PatternDetected,
            SIMILAR_TASKS_TITLE,
            format!("{count} recent tasks start with \"{keyword}\""),
            InsightData::Pattern {
                pattern: keyword.clone(),
                frequency: count,
            },
            Importance::Medium,
        ));
        insights.push(AnalysisInsight::new(
            InsightType::OptimizationOpportunity,
            "Batch Similar Tasks",
            format!("Handling the {count} \"{keyword}\" tasks together saves context switches"),
            InsightData::Optimization {
                opportunity: "task_batching".into(),
                affected_items: count,
                estimated_minutes_saved: f64::from(count) * 5.0,
            },
            Importance::Medium,
        ));
    }

    let events = snapshot.upcoming_events.len();
    if events > 3 {
        insights.push(AnalysisInsight::new(
            InsightType::OptimizationOpportunity,
            "Consolidate Meetings",
            format!("{events} meetings this week; some could be merged or shortened"),
            InsightData::Optimization {
                opportunity: "meeting_consolidation".into(),
                affected_items: events as u32,
                estimated_minutes_saved: 15.0 * (events - 3) as f64,
            },
            Importance::Medium,
        ));
    }

    if snapshot.environment.time_of_day == TimeOfDay::Evening {
        insights.push(AnalysisInsight::new(
            InsightType::Recommendation,
            "Plan Tomorrow",
            "Evening is a good moment to line up tomorrow's priorities",
            InsightData::Recommendation {
                suggestion: "plan_next_day".into(),
            },
            Importance::Low,
        ));
    }

    insights
}

/// Title of the pattern insight that signals mergeable tasks.
pub const SIMILAR_TASKS_TITLE: &str = "Similar Tasks Detected";

/// First alphabetic word of a title, lower-cased.
fn leading_keyword(title: &str) -> Option<String> {
    title
        .split(|c: char| !c.is_alphabetic())
        .find(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// The biggest group of tasks sharing a leading keyword (ties: alphabetical).
fn largest_similar_group(tasks: &[StoredTask]) -> Option<(String, u32)> {
    let mut groups: HashMap<String, u32> = HashMap::new();
    for task in tasks {
        if let Some(keyword) = leading_keyword(&task.title) {
            *groups.entry(keyword).or_default() += 1;
        }
    }
    groups
        .into_iter()
        .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then_with(|| kb.cmp(ka)))
}

/// Base 0.5, adjusted by history and insight mix, clamped to [0.1, 0.95].
pub fn score_confidence(history: &HistoricalStats, insights: &[AnalysisInsight]) -> f64 {
    let mut confidence = 0.5;
    if history.frequency_per_day > 10.0 {
        confidence += 0.1;
    }
    if history.success_rate > 0.8 {
        confidence += 0.1;
    }
    confidence += 0.02 * insights.len() as f64;
    for insight in insights {
        match insight.importance {
            Importance::Critical => confidence -= 0.05,
            Importance::High => confidence += 0.03,
            _ => {}
        }
    }
    confidence.clamp(0.1, 0.95)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

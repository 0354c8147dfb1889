use crate::limits::{acquire, StageLimits};
use crate::report::GroupReport;
use insight_analyzers::{
    execute, run_tools, selection_ratio, Agent, AgentContext, AnalysisTarget, EventEnvelope,
    L2Filter, L2Reducer, Tool,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Tools, filter, agents and reducer for one slice of the repository.
///
/// Shared read-only by every group task of a run.
pub(crate) struct GroupRunner {
    pub root: PathBuf,
    pub tools: Arc<Vec<Arc<Tool>>>,
    pub agents: Vec<Arc<Agent>>,
    /// Without a context the agent tier is skipped
    pub agent_context: Option<AgentContext>,
    pub filter: L2Filter,
    pub reducer: L2Reducer,
    pub limits: StageLimits,
    pub cancel: CancellationToken,
    pub tool_timeout: Duration,
    pub agent_timeout: Duration,
}

pub(crate) fn group_id(index: usize) -> String {
    format!("group-{index:04}")
}

fn sort_envelopes(envelopes: &mut [EventEnvelope]) {
    envelopes.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then_with(|| a.tool_name.cmp(&b.tool_name))
    });
}

impl GroupRunner {
    /// Splits `files` into groups of `group_size` and runs them concurrently
    /// under the group limit. Reports come back ordered by group id.
    pub async fn run_all(self: Arc<Self>, files: Vec<String>, group_size: usize) -> Vec<GroupReport> {
        let mut pending: BTreeMap<String, usize> = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for (index, slice) in files.chunks(group_size.max(1)).enumerate() {
            let id = group_id(index);
            pending.insert(id.clone(), slice.len());
            let runner = Arc::clone(&self);
            let slice = slice.to_vec();
            tasks.spawn(async move {
                let _permit = acquire(&runner.limits.groups).await;
                runner.run_group(id, slice).await
            });
        }

        let mut reports = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    pending.remove(&report.group_id);
                    reports.push(report);
                }
                Err(err) => log::error!("Group task failed: {err}"),
            }
        }
        for (id, files) in pending {
            reports.push(GroupReport {
                group_id: id,
                files,
                error: Some("group task failed".to_string()),
                ..GroupReport::default()
            });
        }
        reports.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        reports
    }

    async fn run_group(&self, group_id: String, files: Vec<String>) -> GroupReport {
        let mut report = GroupReport {
            group_id: group_id.clone(),
            files: files.len(),
            ..GroupReport::default()
        };
        if self.cancel.is_cancelled() {
            report.error = Some("cancelled before start".to_string());
            return report;
        }

        let tool_envelopes = self.run_tools(&files).await;
        report.tool_runs = tool_envelopes.len();
        report.tool_failures = tool_envelopes.iter().filter(|e| !e.is_success()).count();

        let selected = self.filter.select_significant_files(&tool_envelopes);
        report.selection_ratio = selection_ratio(files.len(), selected.len());
        if !self.filter.validate(files.len(), selected.len()) {
            report.threshold_exceeded = true;
            log::warn!(
                "{group_id}: {} of {} files selected ({:.1}%), above the {:.1}% ceiling",
                selected.len(),
                files.len(),
                report.selection_ratio * 100.0,
                self.filter.config().max_selection_ratio * 100.0
            );
        }

        let agent_envelopes = self.run_agents(&selected, &tool_envelopes).await;
        report.agent_runs = agent_envelopes.len();
        report.agent_failures = agent_envelopes.iter().filter(|e| !e.is_success()).count();
        report.selected = selected.into_iter().collect();

        if self.cancel.is_cancelled() {
            report.error = Some("cancelled before the summary was saved".to_string());
            return report;
        }

        let summary = self
            .reducer
            .aggregate(&group_id, &tool_envelopes, &agent_envelopes);
        match self.reducer.save(&summary).await {
            Ok(path) => {
                log::info!(
                    "{group_id}: {} files, {} selected, summary at {}",
                    report.files,
                    report.selected.len(),
                    path.display()
                );
                report.summary_path = Some(path);
            }
            Err(err) => {
                log::warn!("{group_id}: failed to save summary: {err}");
                report.error = Some(format!("save summary: {err}"));
            }
        }
        report
    }

    async fn run_tools(&self, files: &[String]) -> Vec<EventEnvelope> {
        let mut tasks = JoinSet::new();
        for file in files {
            let tools = Arc::clone(&self.tools);
            let target = AnalysisTarget::new(&self.root, file.as_str());
            let semaphore = Arc::clone(&self.limits.tools);
            let cancel = self.cancel.clone();
            let timeout = self.tool_timeout;
            tasks.spawn(async move {
                let _permit = acquire(&semaphore).await;
                run_tools(&tools, &target, timeout, &cancel).await
            });
        }

        let mut envelopes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch) => envelopes.extend(batch),
                Err(err) => log::error!("Tool task failed: {err}"),
            }
        }
        sort_envelopes(&mut envelopes);
        envelopes
    }

    async fn run_agents(
        &self,
        selected: &BTreeSet<String>,
        tool_envelopes: &[EventEnvelope],
    ) -> Vec<EventEnvelope> {
        let Some(base) = &self.agent_context else {
            return Vec::new();
        };

        let mut tasks = JoinSet::new();
        for file in selected {
            let mut ctx = base.clone();
            ctx.tool_results = tool_envelopes
                .iter()
                .filter(|e| e.file_path.as_deref() == Some(file.as_str()) && e.is_success())
                .map(|e| (e.tool_name.clone(), e.clone()))
                .collect();
            let ctx = Arc::new(ctx);

            for agent in &self.agents {
                if !agent.is_applicable(file) {
                    continue;
                }
                let agent = Arc::clone(agent);
                let ctx = Arc::clone(&ctx);
                let target = AnalysisTarget::new(&self.root, file.as_str());
                let semaphore = Arc::clone(&self.limits.agents);
                let cancel = self.cancel.clone();
                let timeout = self.agent_timeout;
                tasks.spawn(async move {
                    let _permit = acquire(&semaphore).await;
                    execute(agent, target, ctx, timeout, &cancel).await
                });
            }
        }

        let mut envelopes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(envelope) => envelopes.push(envelope),
                Err(err) => log::error!("Agent task failed: {err}"),
            }
        }
        sort_envelopes(&mut envelopes);
        envelopes
    }
}

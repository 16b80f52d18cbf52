//! Switch reconciler: compare expected rules against what a switch reports.
//!
//! Expected state for a switch is rebuilt from the store on every call:
//!
//! - one rule per flow direction whose segments touch the switch (keyed by
//!   the segment group's parent cookie);
//! - one rule per one-switch flow on the switch.
//!
//! Reported cookies are partitioned against that into missing, proper and
//! excess sets. Repair regenerates install commands for the missing cookies
//! from stored flow data.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::rules::{choose_output_action, egress_command, ingress_command, intermediate_command, one_switch_command};
use crate::store::{GraphStore, GraphTransaction, TxScope};
use crate::types::{Cookie, CookieParseError, Flow, FlowCommand, FlowSegment, SwitchId};

/// Cookies of controller system rules, never reported as excess.
pub const DEFAULT_IGNORED_COOKIES: [u64; 3] = [
    0x8000_0000_0000_0001,
    0x8000_0000_0000_0002,
    0x8000_0000_0000_0003,
];

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Reported cookies that are never excess.
    pub ignored_cookies: BTreeSet<Cookie>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            ignored_cookies: DEFAULT_IGNORED_COOKIES.iter().copied().map(Cookie::new).collect(),
        }
    }
}

impl ReconcilerConfig {
    /// Load from `RECONCILE_IGNORED_COOKIES` (comma-separated display
    /// cookies). Falls back to the system cookies when unset.
    pub fn from_env() -> Result<Self, CookieParseError> {
        match std::env::var("RECONCILE_IGNORED_COOKIES") {
            Ok(raw) => Self::parse_ignored(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Parse a comma-separated ignore-list. An empty list ignores nothing.
    pub fn parse_ignored(raw: &str) -> Result<Self, CookieParseError> {
        let ignored_cookies = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Cookie::parse_display)
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { ignored_cookies })
    }
}

/// Drift report for one switch. Cookies are in display form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRulesDiff {
    /// Expected but not reported.
    pub missing_rules: BTreeSet<String>,
    /// Reported but not expected (ignore-list excluded).
    pub excess_rules: BTreeSet<String>,
    /// Expected and reported.
    pub proper_rules: BTreeSet<String>,
}

/// A rule that could not be regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRule {
    /// Cookie of the rule, in display form.
    pub cookie: String,
    /// Flow the rule belongs to.
    pub flowid: String,
    /// Why no command was built.
    pub reason: String,
}

/// Repair commands for one switch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommands {
    /// Install commands, ordered by cookie.
    pub commands: Vec<FlowCommand>,
    /// Cookies a command was built for, in display form.
    pub installed_rules: BTreeSet<String>,
    /// Rules that were requested but could not be rebuilt.
    pub skipped: Vec<SkippedRule>,
}

/// Result of a switch sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchSync {
    /// Drift found.
    pub diff: SwitchRulesDiff,
    /// Commands repairing the missing rules.
    pub repair: SyncCommands,
}

/// Rules the store says the switch should hold.
struct ExpectedRules {
    segment_groups: BTreeMap<Cookie, Vec<FlowSegment>>,
    one_switch_flows: Vec<Flow>,
}

impl ExpectedRules {
    fn cookies(&self) -> BTreeSet<Cookie> {
        self.segment_groups
            .keys()
            .copied()
            .chain(self.one_switch_flows.iter().map(|f| f.cookie))
            .collect()
    }
}

/// Per-switch drift detection and repair.
pub struct SwitchReconciler<S: GraphStore> {
    store: Arc<S>,
    config: ReconcilerConfig,
}

impl<S: GraphStore> Clone for SwitchReconciler<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), config: self.config.clone() }
    }
}

impl<S: GraphStore> SwitchReconciler<S> {
    /// Create a reconciler with the default ignore-list.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, ReconcilerConfig::default())
    }

    /// Create a reconciler with explicit configuration.
    pub fn with_config(store: Arc<S>, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Partition the switch's reported cookies against expected state.
    pub async fn diff(
        &self,
        switch_id: &SwitchId,
        reported: &[Cookie],
        tx: Option<&mut S::Tx>,
    ) -> Result<SwitchRulesDiff, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = load_expected(scope.tx(), switch_id).await;
        let expected = scope.finish(result).await?;
        Ok(self.partition(switch_id, &expected, reported))
    }

    /// Rebuild install commands for the given cookies on the switch.
    pub async fn build_repair_commands(
        &self,
        switch_id: &SwitchId,
        cookies: &BTreeSet<Cookie>,
        tx: Option<&mut S::Tx>,
    ) -> Result<SyncCommands, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = async {
            let tx = scope.tx();
            let expected = load_expected(tx, switch_id).await?;
            repair(tx, switch_id, &expected, cookies).await
        }
        .await;
        scope.finish(result).await
    }

    /// Diff the switch and build commands for every missing rule, from one
    /// snapshot of the store.
    pub async fn sync(
        &self,
        switch_id: &SwitchId,
        reported: &[Cookie],
        tx: Option<&mut S::Tx>,
    ) -> Result<SwitchSync, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = async {
            let tx = scope.tx();
            let expected = load_expected(tx, switch_id).await?;
            let diff = self.partition(switch_id, &expected, reported);

            let reported: BTreeSet<Cookie> = reported.iter().copied().collect();
            let missing: BTreeSet<Cookie> = expected.cookies().difference(&reported).copied().collect();
            let repair = repair(tx, switch_id, &expected, &missing).await?;
            Ok(SwitchSync { diff, repair })
        }
        .await;
        scope.finish(result).await
    }

    fn partition(&self, switch_id: &SwitchId, expected: &ExpectedRules, reported: &[Cookie]) -> SwitchRulesDiff {
        let reported: BTreeSet<Cookie> = reported.iter().copied().collect();
        let expected_cookies = expected.cookies();

        let mut diff = SwitchRulesDiff::default();
        for cookie in &expected_cookies {
            if reported.contains(cookie) {
                diff.proper_rules.insert(cookie.to_string());
            } else {
                diff.missing_rules.insert(cookie.to_string());
            }
        }
        for cookie in reported.difference(&expected_cookies) {
            if !self.config.ignored_cookies.contains(cookie) {
                diff.excess_rules.insert(cookie.to_string());
            }
        }

        if !diff.missing_rules.is_empty() || !diff.excess_rules.is_empty() {
            tracing::warn!(
                switch_id = %switch_id,
                missing = diff.missing_rules.len(),
                excess = diff.excess_rules.len(),
                proper = diff.proper_rules.len(),
                "Switch rules drifted"
            );
        } else {
            tracing::debug!(switch_id = %switch_id, proper = diff.proper_rules.len(), "Switch rules in sync");
        }
        diff
    }
}

async fn load_expected<T: GraphTransaction>(tx: &mut T, switch_id: &SwitchId) -> Result<ExpectedRules, FlowError> {
    let segments = tx.get_switch_segments(switch_id).await.map_err(FlowError::from_store)?;
    let one_switch_flows = tx.get_one_switch_flows(switch_id).await.map_err(FlowError::from_store)?;
    Ok(ExpectedRules {
        segment_groups: crate::lookup::group_segments(segments),
        one_switch_flows,
    })
}

async fn repair<T: GraphTransaction>(
    tx: &mut T,
    switch_id: &SwitchId,
    expected: &ExpectedRules,
    cookies: &BTreeSet<Cookie>,
) -> Result<SyncCommands, FlowError> {
    let mut out = SyncCommands::default();

    for (cookie, group) in &expected.segment_groups {
        if !cookies.contains(cookie) {
            continue;
        }
        // groups are never empty
        let flowid = match group.first() {
            Some(segment) => segment.flowid.clone(),
            None => continue,
        };
        let built = match tx.get_flow(&flowid, *cookie).await.map_err(FlowError::from_store)? {
            Some(flow) => transit_or_edge_command(switch_id, &flow, group),
            None => Err(FlowError::flow_not_found(flowid.clone(), *cookie)),
        };
        record(&mut out, switch_id, *cookie, &flowid, built)?;
    }

    for flow in &expected.one_switch_flows {
        if !cookies.contains(&flow.cookie) {
            continue;
        }
        let command = one_switch_command(flow, choose_output_action(flow.src_vlan, flow.dst_vlan));
        record(&mut out, switch_id, flow.cookie, &flow.flowid, Ok(command))?;
    }

    tracing::info!(
        switch_id = %switch_id,
        commands = out.commands.len(),
        skipped = out.skipped.len(),
        "Built switch repair commands"
    );
    Ok(out)
}

/// The command for the switch's role in a multi-switch flow.
fn transit_or_edge_command(
    switch_id: &SwitchId,
    flow: &Flow,
    group: &[FlowSegment],
) -> Result<FlowCommand, FlowError> {
    let output_action = choose_output_action(flow.src_vlan, flow.dst_vlan);
    if &flow.src_switch == switch_id {
        return ingress_command(flow, output_action);
    }
    if &flow.dst_switch == switch_id {
        return egress_command(flow, output_action);
    }

    let inbound = group.iter().find(|s| &s.dst_switch == switch_id);
    let outbound = group.iter().find(|s| &s.src_switch == switch_id);
    match (inbound, outbound) {
        (Some(inbound), Some(outbound)) => Ok(intermediate_command(
            switch_id,
            inbound.dst_port,
            outbound.src_port,
            flow.transit_vlan,
            &flow.flowid,
            flow.cookie,
        )),
        _ => Err(FlowError::PathInconsistency(format!(
            "transit switch {} of flow {} lacks an inbound or outbound segment",
            switch_id, flow.flowid
        ))),
    }
}

/// Add a built command, or a skip entry for data problems. Store errors
/// propagate.
fn record(
    out: &mut SyncCommands,
    switch_id: &SwitchId,
    cookie: Cookie,
    flowid: &str,
    built: Result<FlowCommand, FlowError>,
) -> Result<(), FlowError> {
    match built {
        Ok(command) => {
            out.installed_rules.insert(cookie.to_string());
            out.commands.push(command);
            Ok(())
        }
        Err(e @ (FlowError::PathInconsistency(_) | FlowError::NotFound { .. })) => {
            tracing::warn!(
                switch_id = %switch_id,
                flowid,
                cookie = %cookie,
                error = %e,
                "Skipping rule that cannot be rebuilt"
            );
            out.skipped.push(SkippedRule {
                cookie: cookie.to_string(),
                flowid: flowid.to_string(),
                reason: e.to_string(),
            });
            Ok(())
        }
        Err(e) => Err(e),
    }
}

//! AlertActor — evaluates every rule against every incoming Sample, drives
//! the fire/resolve state machine with cooldown and maintenance-window
//! suppression, and dispatches to notification channels.
//!
//! Structurally grounded on `actors/alert.rs`'s `AlertActor`/`AlertHandle`
//! pair, but the state machine itself is new: the teacher's
//! `ResourceEvaluation` grace-period counter doesn't fit a cooldown-timer +
//! Store-backed dedup design, so `SPEC_FULL.md` §4.5.3 is its own pure
//! `CooldownGate`, matching the teacher's "pure evaluate fn behind a
//! stateful wrapper" idiom with different inputs/outputs.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::messages::{AlertCommand, SampleEvent};
use super::storage::StoreHandle;
use crate::alerts::channel::{build_channels, dispatch_fired, dispatch_resolved, select_channels, Channel};
use crate::alerts::condition::Condition;
use crate::alerts::template;
use crate::config::ChannelsConfig;
use crate::model::{Alert, AlertRule, AlertStats, AlertStatus, Severity};

const RULE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

type CooldownKey = (String, String, String);

/// Whether a triggering sample may fire a new alert, or is still within
/// the cooldown window for its `(target, instance, rule)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownOutcome {
    Reserved,
    StillCooling,
}

/// Pure cooldown-timer logic, unit-testable without any actor/async
/// plumbing. The caller owns the table and supplies `now`, so tests don't
/// need to fake the clock.
pub struct CooldownGate {
    cooldown: chrono::Duration,
}

impl CooldownGate {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown: chrono::Duration::seconds(cooldown_secs as i64),
        }
    }

    /// Check-and-reserve as a single operation: if the key is outside its
    /// cooldown window (or has never fired), the slot is reserved for
    /// `now` and `Reserved` is returned. This closes the race between two
    /// near-concurrent samples described in `SPEC_FULL.md` §4.5.3 step 4b.
    pub fn check_and_reserve(
        &self,
        table: &mut HashMap<CooldownKey, DateTime<Utc>>,
        key: CooldownKey,
        now: DateTime<Utc>,
    ) -> CooldownOutcome {
        match table.get(&key) {
            Some(last_fired) if now - *last_fired < self.cooldown => CooldownOutcome::StillCooling,
            _ => {
                table.insert(key, now);
                CooldownOutcome::Reserved
            }
        }
    }
}

pub struct AlertActor {
    file_rules: Vec<AlertRule>,
    store_rules: Vec<AlertRule>,
    channels: Vec<Box<dyn Channel>>,
    cooldown_gate: CooldownGate,
    cooldown_table: RwLock<HashMap<CooldownKey, DateTime<Utc>>>,
    store: StoreHandle,
    sample_rx: broadcast::Receiver<SampleEvent>,
    command_rx: mpsc::Receiver<AlertCommand>,
}

impl AlertActor {
    pub fn new(
        file_rules: Vec<AlertRule>,
        channels_config: &ChannelsConfig,
        cooldown_secs: u64,
        store: StoreHandle,
        sample_rx: broadcast::Receiver<SampleEvent>,
        command_rx: mpsc::Receiver<AlertCommand>,
    ) -> Self {
        Self {
            file_rules,
            store_rules: Vec::new(),
            channels: build_channels(channels_config),
            cooldown_gate: CooldownGate::new(cooldown_secs),
            cooldown_table: RwLock::new(HashMap::new()),
            store,
            sample_rx,
            command_rx,
        }
    }

    pub async fn run(mut self) {
        debug!("starting alert actor");
        self.refresh_store_rules().await;

        let mut refresh_interval = time::interval(RULE_REFRESH_INTERVAL);

        loop {
            tokio::select! {
                result = self.sample_rx.recv() => {
                    match result {
                        Ok(event) => self.evaluate(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("alert actor lagged, skipped {skipped} samples");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("sample channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = refresh_interval.tick() => {
                    self.refresh_store_rules().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("alert actor stopped");
    }

    async fn refresh_store_rules(&mut self) {
        match self.store.list_rules().await {
            Ok(rules) => self.store_rules = rules,
            Err(e) => error!("failed to refresh store-defined rules: {e}"),
        }
    }

    /// File rules ∪ store rules, file wins on name collision.
    fn merged_rules(&self) -> Vec<&AlertRule> {
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut merged: Vec<&AlertRule> = Vec::new();
        for rule in &self.file_rules {
            seen.insert(rule.name.as_str());
            merged.push(rule);
        }
        for rule in &self.store_rules {
            if seen.insert(rule.name.as_str()) {
                merged.push(rule);
            }
        }
        merged
    }

    async fn evaluate(&self, event: SampleEvent) {
        let now = Utc::now();
        let rules: Vec<AlertRule> = self.merged_rules().into_iter().cloned().collect();

        for rule in rules {
            if !rule.enabled {
                continue;
            }

            match self.store.is_in_maintenance_window(&event.target_name, now).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    error!("maintenance window check failed for '{}': {e}", event.target_name);
                    continue;
                }
            }

            let condition = match Condition::parse(&rule.condition) {
                Ok(c) => c,
                Err(e) => {
                    error!("rule '{}' has an invalid condition: {e}", rule.name);
                    continue;
                }
            };

            let triggered = condition.evaluate(&event.sample);
            if triggered {
                self.handle_triggered(&rule, &event, now).await;
            } else {
                self.handle_resolved(&rule, &event, now).await;
            }
        }
    }

    async fn handle_triggered(&self, rule: &AlertRule, event: &SampleEvent, now: DateTime<Utc>) {
        let key = (event.target_name.clone(), event.instance_name.clone(), rule.name.clone());

        {
            let mut table = self.cooldown_table.write().await;
            if self.cooldown_gate.check_and_reserve(&mut table, key, now) == CooldownOutcome::StillCooling {
                return;
            }
        }

        match self
            .store
            .get_active_alert_by_rule(&event.target_name, &event.instance_name, &rule.name)
            .await
        {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                error!("failed to check active alert for rule '{}': {e}", rule.name);
                return;
            }
        }

        let message = template::render(&rule.message_template, &event.target_name, &event.instance_name, &event.sample);
        let mut alert = Alert {
            id: Uuid::new_v4(),
            target_name: event.target_name.clone(),
            instance_name: event.instance_name.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            message,
            status: AlertStatus::Fired,
            fired_at: now,
            resolved_at: None,
            notified_at: None,
            channels_notified: Vec::new(),
        };

        if let Err(e) = self.store.save_alert(alert.clone()).await {
            error!("failed to save fired alert for rule '{}': {e}", rule.name);
            return;
        }

        let notified = dispatch_fired(&self.channels, &alert).await;
        alert.notified_at = Some(Utc::now());
        alert.channels_notified = notified;

        if let Err(e) = self.store.update_alert(alert).await {
            error!("failed to update notified alert for rule '{}': {e}", rule.name);
        }
    }

    async fn handle_resolved(&self, rule: &AlertRule, event: &SampleEvent, now: DateTime<Utc>) {
        let existing = match self
            .store
            .get_active_alert_by_rule(&event.target_name, &event.instance_name, &rule.name)
            .await
        {
            Ok(Some(alert)) => alert,
            Ok(None) => return,
            Err(e) => {
                error!("failed to check active alert for rule '{}': {e}", rule.name);
                return;
            }
        };

        let mut resolved = existing;
        resolved.status = AlertStatus::Resolved;
        resolved.resolved_at = Some(now);

        if let Err(e) = self.store.update_alert(resolved.clone()).await {
            error!("failed to update resolved alert for rule '{}': {e}", rule.name);
            return;
        }

        dispatch_resolved(&self.channels, &resolved).await;
    }

    /// Returns `true` if the actor should stop.
    async fn handle_command(&mut self, cmd: AlertCommand) -> bool {
        match cmd {
            AlertCommand::TestAlert {
                target_name,
                rule_name,
                channels,
                respond_to,
            } => {
                let alert = Alert {
                    id: Uuid::new_v4(),
                    target_name,
                    instance_name: "test".to_string(),
                    rule_name: rule_name.clone(),
                    severity: Severity::Info,
                    message: format!("Test alert for rule '{rule_name}'"),
                    status: AlertStatus::Fired,
                    fired_at: Utc::now(),
                    resolved_at: None,
                    notified_at: None,
                    channels_notified: Vec::new(),
                };

                let selected = select_channels(&self.channels, &channels);
                for channel in selected {
                    if !channel.is_enabled() {
                        continue;
                    }
                    if let Err(e) = channel.send(&alert).await {
                        error!(channel = channel.name(), error = %e, "test alert dispatch failed");
                    }
                }

                let _ = respond_to.send(Ok(()));
                false
            }
            AlertCommand::GetStats { respond_to } => {
                let stats = self.store.get_alert_stats().await.unwrap_or_else(|e| {
                    error!("failed to fetch alert stats: {e}");
                    AlertStats::default()
                });
                let _ = respond_to.send(stats);
                false
            }
            AlertCommand::Shutdown => true,
        }
    }
}

/// A cloneable handle for sending commands to a running `AlertActor`.
#[derive(Clone)]
pub struct AlertHandle {
    command_tx: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    pub fn new(command_tx: mpsc::Sender<AlertCommand>) -> Self {
        Self { command_tx }
    }

    pub async fn test_alert(&self, target_name: String, rule_name: String, channels: Vec<String>) -> anyhow::Result<()> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx
            .send(AlertCommand::TestAlert {
                target_name,
                rule_name,
                channels,
                respond_to,
            })
            .await?;
        rx.await?
    }

    pub async fn stats(&self) -> anyhow::Result<AlertStats> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(AlertCommand::GetStats { respond_to }).await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(AlertCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: &str) -> CooldownKey {
        ("t".to_string(), "i".to_string(), n.to_string())
    }

    #[test]
    fn reserves_when_key_never_fired() {
        let gate = CooldownGate::new(300);
        let mut table = HashMap::new();
        let outcome = gate.check_and_reserve(&mut table, key("r"), Utc::now());
        assert_eq!(outcome, CooldownOutcome::Reserved);
        assert!(table.contains_key(&key("r")));
    }

    #[test]
    fn still_cooling_within_window() {
        let gate = CooldownGate::new(300);
        let mut table = HashMap::new();
        let now = Utc::now();
        assert_eq!(gate.check_and_reserve(&mut table, key("r"), now), CooldownOutcome::Reserved);
        let later = now + chrono::Duration::seconds(60);
        assert_eq!(gate.check_and_reserve(&mut table, key("r"), later), CooldownOutcome::StillCooling);
    }

    #[test]
    fn reserves_again_after_cooldown_elapses() {
        let gate = CooldownGate::new(300);
        let mut table = HashMap::new();
        let now = Utc::now();
        gate.check_and_reserve(&mut table, key("r"), now);
        let later = now + chrono::Duration::seconds(301);
        assert_eq!(gate.check_and_reserve(&mut table, key("r"), later), CooldownOutcome::Reserved);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let gate = CooldownGate::new(300);
        let mut table = HashMap::new();
        let now = Utc::now();
        assert_eq!(gate.check_and_reserve(&mut table, key("a"), now), CooldownOutcome::Reserved);
        assert_eq!(gate.check_and_reserve(&mut table, key("b"), now), CooldownOutcome::Reserved);
    }
}

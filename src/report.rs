//! Provisioning receipt
//!
//! Every step appends ordered action records here; the CLI renders the
//! receipt as human-readable lines or JSON. Warnings collect the outcomes
//! of best-effort operations, which never abort the run.

use std::collections::BTreeMap;

use serde::Serialize;

/// A planned or completed provisioning action.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    /// Which step produced the action
    pub step: &'static str,
    /// Human-readable description
    pub description: String,
    /// Whether the action was a no-op (item already in the desired state)
    pub skipped: bool,
}

/// Result of a provisioning run (or plan).
#[derive(Debug, Serialize)]
pub struct ProvisionReceipt {
    schema: &'static str,
    /// True when produced by `plan`: nothing was mutated
    pub dry_run: bool,
    pub actions: Vec<Action>,
    pub dirs_created: usize,
    pub dirs_existing: usize,
    /// Best-effort failures; present on the receipt, never fatal
    pub warnings: Vec<String>,
    /// Environment exported for the handed-off process
    pub env: BTreeMap<String, String>,
    /// Port reserved for the application listener
    pub listen_port: Option<u16>,
}

impl ProvisionReceipt {
    pub fn new(dry_run: bool) -> Self {
        Self {
            schema: "hyp.provision.receipt.v1",
            dry_run,
            actions: Vec::new(),
            dirs_created: 0,
            dirs_existing: 0,
            warnings: Vec::new(),
            env: BTreeMap::new(),
            listen_port: None,
        }
    }

    /// Record a completed action.
    pub fn record(&mut self, step: &'static str, description: impl Into<String>) {
        self.actions.push(Action {
            step,
            description: description.into(),
            skipped: false,
        });
    }

    /// Record an action that was a no-op because the item already existed.
    pub fn record_skipped(&mut self, step: &'static str, description: impl Into<String>) {
        self.actions.push(Action {
            step,
            description: description.into(),
            skipped: true,
        });
    }

    /// Record a best-effort failure.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn skipped_count(&self) -> usize {
        self.actions.iter().filter(|a| a.skipped).count()
    }

    /// JSON rendering for `--json` consumers.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Human-readable rendering.
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let header = if self.dry_run {
            "Provisioning plan (dry run)"
        } else {
            "Provisioning receipt"
        };
        out.push_str(header);
        out.push('\n');

        for action in &self.actions {
            let marker = if action.skipped { '-' } else { '+' };
            let prefix = if self.dry_run { "[plan] " } else { "" };
            out.push_str(&format!(
                "  {marker} [{}] {prefix}{}\n",
                action.step, action.description
            ));
        }

        if !self.warnings.is_empty() {
            out.push_str("warnings:\n");
            for warning in &self.warnings {
                out.push_str(&format!("  ! {warning}\n"));
            }
        }

        if let Some(port) = self.listen_port {
            out.push_str(&format!("listener port reserved: {port}\n"));
        }

        out.push_str(&format!(
            "{} actions, {} skipped, {} warnings\n",
            self.actions.len(),
            self.skipped_count(),
            self.warnings.len()
        ));
        out
    }
}

use serde::{Deserialize, Serialize};

/// Ingest filtering and the accounts the bank feed is queried for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub accounts: Vec<String>,
    /// Case-insensitive substrings; a hit in reference or remittance drops
    /// the entry before it is ever persisted.
    #[serde(default)]
    pub exclusion_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Token that prefixes a customer number in free text, e.g. "CID 4821".
    pub marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateConfig {
    /// Look-back used when clustering historical ledger payments.
    pub cluster_window_days: i64,
    /// Look-back used immediately before posting a single payment.
    pub post_window_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingConfig {
    pub currency:      String,
    pub provider_name: String,
    #[serde(default)]
    pub method_id:     Option<String>,
    /// Records with a value date older than this are never auto-posted.
    pub post_cutoff_days: i64,
    /// Actor recorded on audit entries written by the pipeline.
    pub actor: String,
    #[serde(default = "default_true")]
    pub apply_to_invoices: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// History window for payment-pattern analysis. Deliberately distinct
    /// from `DuplicateConfig::post_window_days`.
    pub analysis_lookback_days: i64,
    pub missed_threshold:       u32,
    pub late_threshold:         u32,
    pub avg_days_late_threshold: f64,
    /// Window for the "recent suspensions" dashboard counter.
    #[serde(default = "default_recent_days")]
    pub recent_suspension_days: i64,
}

fn default_true() -> bool {
    true
}

fn default_recent_days() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconConfig {
    pub ingest:     IngestConfig,
    pub identity:   IdentityConfig,
    pub duplicates: DuplicateConfig,
    pub posting:    PostingConfig,
    pub risk:       RiskConfig,
}

impl ReconConfig {
    /// Load from `{data_dir}/recon_config.json`.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/recon_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: ReconConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would silently disable a safety check.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity.marker.trim().is_empty() {
            anyhow::bail!("identity.marker must not be empty");
        }
        if self.duplicates.post_window_days <= 0 || self.duplicates.cluster_window_days <= 0 {
            anyhow::bail!("duplicate windows must be positive");
        }
        if self.risk.analysis_lookback_days <= 0 {
            anyhow::bail!("risk.analysis_lookback_days must be positive");
        }
        if self.posting.post_cutoff_days < 0 {
            anyhow::bail!("posting.post_cutoff_days must not be negative");
        }
        Ok(())
    }

    /// Hardcoded defaults for tests. Does not touch the filesystem.
    pub fn default_test() -> Self {
        ReconConfig {
            ingest: IngestConfig {
                accounts: vec!["62000000001".into()],
                exclusion_terms: vec![
                    "APP TRANSFER FROM SUBSCRIPTIONS".into(),
                    "SUBSCRIPTIONS".into(),
                    "SUBSCRIPTION".into(),
                ],
            },
            identity: IdentityConfig { marker: "CID".into() },
            duplicates: DuplicateConfig {
                cluster_window_days: 6,
                post_window_days:    15,
            },
            posting: PostingConfig {
                currency:          "ZAR".into(),
                provider_name:     "FNB-EFT".into(),
                method_id:         None,
                post_cutoff_days:  6,
                actor:             "system".into(),
                apply_to_invoices: true,
            },
            risk: RiskConfig {
                analysis_lookback_days:  180,
                missed_threshold:        2,
                late_threshold:          3,
                avg_days_late_threshold: 30.0,
                recent_suspension_days:  30,
            },
        }
    }
}

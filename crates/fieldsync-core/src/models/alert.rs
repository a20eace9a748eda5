use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub severity: AlertSeverity,
    pub status: String,
    #[serde(default)]
    pub asset_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// One page of an offset-paginated alert listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertPage {
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub page_size: u64,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub next_offset: Option<u64>,
}

impl AlertPage {
    pub fn critical(&self) -> impl Iterator<Item = &Alert> {
        self.alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
    }
}

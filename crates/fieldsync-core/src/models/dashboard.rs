use serde::{Deserialize, Serialize};

/// A KPI tile, e.g. "Active Alerts: 7 (-2 since 24h)".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub label: String,
    pub value: String,
    pub change: String,
    /// positive, warning or neutral
    pub tone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCard {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardAlert {
    pub title: String,
    pub severity: String,
    pub time: String,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    #[serde(default)]
    pub kpis: Vec<Kpi>,
    #[serde(default)]
    pub modules: Vec<ModuleCard>,
    #[serde(default)]
    pub alerts: Vec<DashboardAlert>,
}

impl Dashboard {
    pub fn kpi(&self, label: &str) -> Option<&Kpi> {
        self.kpis.iter().find(|k| k.label.eq_ignore_ascii_case(label))
    }
}

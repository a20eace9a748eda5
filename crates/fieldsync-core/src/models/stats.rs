use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetCounts {
    pub total: u64,
    pub active: u64,
    pub maintenance: u64,
    pub inactive: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertCounts {
    pub total: u64,
    pub open: u64,
    pub critical: u64,
    pub high: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserCounts {
    pub total: u64,
    pub active: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    #[serde(default)]
    pub assets: AssetCounts,
    #[serde(default)]
    pub alerts: AlertCounts,
    #[serde(default)]
    pub users: UserCounts,
}

//! Response models for the views fieldsync keeps fresh.
//!
//! Only the shapes the client reads are modelled; everything else in the
//! server's payloads is ignored on deserialization.
//!
//! - `Dashboard`: KPI tiles, module cards and the latest alerts
//! - `AlertPage`, `Alert`: paginated alert listings
//! - `SystemStats`: asset/alert/user counters
//! - `Identity`: the logged-in user

pub mod alert;
pub mod dashboard;
pub mod identity;
pub mod stats;

pub use alert::{Alert, AlertPage, AlertSeverity};
pub use dashboard::{Dashboard, DashboardAlert, Kpi, ModuleCard};
pub use identity::Identity;
pub use stats::{AlertCounts, AssetCounts, SystemStats, UserCounts};

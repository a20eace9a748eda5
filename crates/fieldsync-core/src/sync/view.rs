use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::RequestSpec;
use crate::cache::CachedData;

#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewStatus {
    #[default]
    Idle,
    Loading,
    Error,
}

/// What the presentation layer sees of one view.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ViewSnapshot {
    pub data: Option<Value>,
    pub status: ViewStatus,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ViewSnapshot {
    pub(crate) fn from_cache(cached: CachedData<Value>) -> Self {
        Self {
            data: Some(cached.data),
            status: ViewStatus::Idle,
            last_updated: Some(cached.cached_at),
            error: None,
        }
    }

    /// Decode the payload into a model type; `None` if absent or shaped differently.
    pub fn data_as<D: DeserializeOwned>(&self) -> Option<D> {
        self.data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A named view: the request that produces it and the topics that invalidate it.
#[derive(Debug, Clone)]
pub struct ViewSpec {
    pub name: String,
    pub request: RequestSpec,
    pub topics: Vec<String>,
}

impl ViewSpec {
    pub fn new<I>(name: &str, request: RequestSpec, topics: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self {
            name: name.to_string(),
            request,
            topics: topics.into_iter().map(|t| t.as_ref().to_string()).collect(),
        }
    }

    pub fn watches(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }
}

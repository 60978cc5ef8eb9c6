use std::fmt;

use serde::{Deserialize, Serialize};

/// Health of a module as reported by check/watch.
///
/// `Unknown` is a registered module that has not reported yet;
/// `ServiceUnknown` is reserved for names the registry has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    #[default]
    Unknown,
    Serving,
    NotServing,
    ServiceUnknown,
}

impl ServingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ServingStatus::Unknown => "UNKNOWN",
            ServingStatus::Serving => "SERVING",
            ServingStatus::NotServing => "NOT_SERVING",
            ServingStatus::ServiceUnknown => "SERVICE_UNKNOWN",
        }
    }

    #[must_use]
    pub fn is_serving(self) -> bool {
        self == ServingStatus::Serving
    }

    /// Folds instance statuses into a module status: serving if any instance
    /// serves, unknown if every instance is unknown (or there are none),
    /// otherwise not serving.
    pub fn aggregate<I>(statuses: I) -> ServingStatus
    where
        I: IntoIterator<Item = ServingStatus>,
    {
        let mut result = ServingStatus::Unknown;
        for status in statuses {
            match status {
                ServingStatus::Serving => return ServingStatus::Serving,
                ServingStatus::NotServing | ServingStatus::ServiceUnknown => {
                    result = ServingStatus::NotServing;
                }
                ServingStatus::Unknown => {}
            }
        }
        result
    }
}

impl fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

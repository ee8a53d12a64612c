use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::testkeys::TestKeys;

pub const TEST_NAME: &str = "web_connectivity";
pub const TEST_VERSION: &str = "0.4.0";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The submittable record of one run against one input URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub input: String,
    #[serde(with = "start_time")]
    pub measurement_start_time: DateTime<Utc>,
    /// Seconds the run took.
    pub test_runtime: f64,
    pub test_name: String,
    pub test_version: String,
    /// The control backend that answered, if any.
    pub test_helpers: Option<String>,
    pub test_keys: TestKeys,
}

impl Measurement {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            measurement_start_time: Utc::now(),
            test_runtime: 0.0,
            test_name: TEST_NAME.to_string(),
            test_version: TEST_VERSION.to_string(),
            test_helpers: None,
            test_keys: TestKeys::new(),
        }
    }

    /// Condensed verdict shown to users.
    pub fn summary_keys(&self) -> SummaryKeys {
        SummaryKeys::from(&self.test_keys)
    }
}

mod start_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIME_FORMAT;

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIME_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryKeys {
    pub accessible: bool,
    pub blocking: String,
    #[serde(skip)]
    pub is_anomaly: bool,
}

impl From<&TestKeys> for SummaryKeys {
    fn from(tk: &TestKeys) -> Self {
        let reason = tk.summary.blocking_reason;
        Self {
            accessible: tk.summary.accessible == Some(true),
            blocking: reason.map(|r| r.as_str().to_string()).unwrap_or_default(),
            is_anomaly: reason.is_some(),
        }
    }
}

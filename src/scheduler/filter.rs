use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::job::{Job, JobStatus, JobType};

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Contains,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Gt => "gt",
            FilterOperator::Lt => "lt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lte => "lte",
            FilterOperator::In => "in",
            FilterOperator::Contains => "contains",
        }
    }
}

impl std::str::FromStr for FilterOperator {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use FilterOperator::*;
        [Eq, Ne, Gt, Lt, Gte, Lte, In, Contains]
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| JobError::validation(format!("unknown filter operator: {}", s)))
    }
}

/// Operand of a filter, and the value a job field resolves to.
///
/// Deserialized untagged: JSON integers become `Int`, RFC 3339 strings become
/// `Timestamp`, other strings `Text`, arrays `List`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Int(i64),
    Timestamp(DateTime<Utc>),
    Text(String),
    List(Vec<FilterValue>),
}

impl FilterValue {
    fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (FilterValue::Int(a), FilterValue::Int(b)) => Some(a.cmp(b)),
            (FilterValue::Text(a), FilterValue::Text(b)) => Some(a.cmp(b)),
            (FilterValue::Timestamp(a), FilterValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Int(value.into())
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

impl From<JobStatus> for FilterValue {
    fn from(value: JobStatus) -> Self {
        FilterValue::Text(value.as_str().to_string())
    }
}

impl From<JobType> for FilterValue {
    fn from(value: JobType) -> Self {
        FilterValue::Text(value.as_str().to_string())
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// A single `field <operator> value` predicate over stored jobs.
///
/// Recognised fields are `id`, `type`, `status`, `worker_id`, `priority`,
/// `created_at`, `started_at` and `completed_at`. A filter on any other field
/// matches nothing.
///
/// When deserialized, a string value in RFC 3339 form becomes a
/// [`FilterValue::Timestamp`], so it never matches the text fields `id` or
/// `worker_id`. Build such filters with [`Filter::contains`] or a
/// [`FilterValue::Text`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Contains, value.into())
    }

    pub fn is_in<T: Into<FilterValue>>(field: impl Into<String>, values: Vec<T>) -> Self {
        Self::new(field, FilterOperator::In, values)
    }

    pub fn matches(&self, job: &Job) -> bool {
        let Some(actual) = field_value(job, &self.field) else {
            return false;
        };

        match self.operator {
            FilterOperator::Eq => actual == self.value,
            FilterOperator::Ne => actual != self.value,
            FilterOperator::Gt => actual.compare(&self.value) == Some(Ordering::Greater),
            FilterOperator::Lt => actual.compare(&self.value) == Some(Ordering::Less),
            FilterOperator::Gte => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lte => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::In => match &self.value {
                FilterValue::List(candidates) => candidates.contains(&actual),
                _ => false,
            },
            FilterOperator::Contains => match (&actual, &self.value) {
                (FilterValue::Text(haystack), FilterValue::Text(needle)) => haystack
                    .to_lowercase()
                    .contains(&needle.to_lowercase()),
                _ => false,
            },
        }
    }
}

/// True when `job` satisfies every filter. An empty slice matches all jobs.
pub fn matches_all(job: &Job, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| filter.matches(job))
}

fn field_value(job: &Job, field: &str) -> Option<FilterValue> {
    let timestamp = |value: Option<DateTime<Utc>>| match value {
        Some(at) => FilterValue::Timestamp(at),
        None => FilterValue::Null,
    };

    let value = match field {
        "id" => FilterValue::Text(job.id.clone()),
        "type" => FilterValue::from(job.job_type),
        "status" => FilterValue::from(job.status),
        "worker_id" => FilterValue::Text(job.worker_id.clone().unwrap_or_default()),
        "priority" => FilterValue::Int(job.priority.into()),
        "created_at" => FilterValue::Timestamp(job.created_at),
        "started_at" => timestamp(job.started_at),
        "completed_at" => timestamp(job.completed_at),
        _ => return None,
    };
    Some(value)
}

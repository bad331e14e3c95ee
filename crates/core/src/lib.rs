use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PARTITION_ALL_KEY: &str = "index.all";
pub const PARTITION_USAGE_KEY: &str = "index.usage.data";
pub const BATCH_USER_PREFIX: &str = "index.usage.data.batch.user";
pub const SINGLE_USER_PREFIX: &str = "index.usage.data.user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub total: u64,
    #[serde(rename = "time")]
    pub measured_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchBound {
    pub start: String,
    pub end: String,
}

impl BatchBound {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.start.as_str() <= username && username <= self.end.as_str()
    }
}

pub type AggregatedUsage = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameFormat {
    domain: String,
}

impl UsernameFormat {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.trim_matches('@').to_string(),
        }
    }

    pub fn suffix(&self) -> String {
        format!("@{}", self.domain)
    }

    /// Replaces any existing domain with the configured one.
    pub fn qualify(&self, username: &str) -> String {
        let bare = match username.find('@') {
            Some(idx) => &username[..idx],
            None => username,
        };
        format!("{}@{}", bare, self.domain)
    }

    pub fn unqualify<'a>(&self, username: &'a str) -> &'a str {
        username
            .strip_suffix(self.suffix().as_str())
            .unwrap_or(username)
    }

    pub fn is_qualified(&self, username: &str) -> bool {
        username.contains('@')
    }
}

pub fn is_boundary_rank(n: u64, batch_size: u64) -> bool {
    batch_size > 0 && (n % batch_size == 0 || (n - 1) % batch_size == 0)
}

/// Pairs boundary usernames selected by rank into inclusive bounds.
///
/// `boundaries` must contain every rank for which [`is_boundary_rank`] holds
/// plus `max_rank` itself. The last bound is closed by the maximal username
/// even when it holds fewer than `batch_size` users.
pub fn pair_bounds(
    boundaries: &BTreeMap<u64, String>,
    max_rank: u64,
    batch_size: u64,
) -> Vec<BatchBound> {
    let mut bounds = Vec::new();
    if max_rank == 0 || batch_size == 0 {
        return bounds;
    }
    let last = match boundaries.get(&max_rank) {
        Some(name) => name,
        None => return bounds,
    };
    let mut lower = 1u64;
    while lower <= max_rank {
        let upper_rank = lower + batch_size - 1;
        let start = match boundaries.get(&lower) {
            Some(name) => name,
            None => break,
        };
        let end = if upper_rank >= max_rank {
            last
        } else {
            match boundaries.get(&upper_rank) {
                Some(name) => name,
                None => last,
            }
        };
        bounds.push(BatchBound::new(start.clone(), end.clone()));
        lower += batch_size;
    }
    bounds
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    PartitionAll,
    ReconcileBatch(BatchBound),
    ReconcileUser(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TriggerParseError {
    #[error("unrecognized routing key {0}")]
    Unrecognized(String),
    #[error("batch routing key {0} must carry <start>.<end>")]
    MalformedBatch(String),
    #[error("user routing key {0} carries no username")]
    MissingUsername(String),
}

impl Trigger {
    pub fn parse(routing_key: &str) -> Result<Self, TriggerParseError> {
        if routing_key == PARTITION_ALL_KEY || routing_key == PARTITION_USAGE_KEY {
            return Ok(Self::PartitionAll);
        }
        if let Some(rest) = strip_key_prefix(routing_key, BATCH_USER_PREFIX) {
            return match rest.split_once('.') {
                Some((start, end)) if !start.is_empty() && !end.is_empty() => {
                    Ok(Self::ReconcileBatch(BatchBound::new(start, end)))
                }
                _ => Err(TriggerParseError::MalformedBatch(routing_key.to_string())),
            };
        }
        if let Some(rest) = strip_key_prefix(routing_key, SINGLE_USER_PREFIX) {
            if rest.is_empty() {
                return Err(TriggerParseError::MissingUsername(routing_key.to_string()));
            }
            return Ok(Self::ReconcileUser(rest.to_string()));
        }
        Err(TriggerParseError::Unrecognized(routing_key.to_string()))
    }

    pub fn routing_key(&self) -> String {
        match self {
            Self::PartitionAll => PARTITION_USAGE_KEY.to_string(),
            Self::ReconcileBatch(bound) => {
                format!("{}.{}.{}", BATCH_USER_PREFIX, bound.start, bound.end)
            }
            Self::ReconcileUser(username) => format!("{}.{}", SINGLE_USER_PREFIX, username),
        }
    }
}

fn strip_key_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)?.strip_prefix('.')
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageChanged {
    pub attribute: String,
    pub value: String,
    pub unit: String,
    pub username: String,
    pub user_id: String,
}

impl From<&UsageRecord> for UsageChanged {
    fn from(record: &UsageRecord) -> Self {
        Self {
            attribute: "data.size".to_string(),
            value: record.total.to_string(),
            unit: "bytes".to_string(),
            username: record.username.clone(),
            user_id: record.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(names: &[String], batch_size: u64) -> (BTreeMap<u64, String>, u64) {
        let mut boundaries = BTreeMap::new();
        let max_rank = names.len() as u64;
        for (idx, name) in names.iter().enumerate() {
            let n = idx as u64 + 1;
            if is_boundary_rank(n, batch_size) || n == max_rank {
                boundaries.insert(n, name.clone());
            }
        }
        (boundaries, max_rank)
    }

    fn users(count: usize) -> Vec<String> {
        (0..count).map(|idx| format!("user{:04}", idx)).collect()
    }

    #[test]
    fn pairs_250_users_into_three_batches() {
        let names = users(250);
        let (boundaries, max_rank) = ranked(&names, 100);
        let bounds = pair_bounds(&boundaries, max_rank, 100);
        assert_eq!(
            bounds,
            vec![
                BatchBound::new(names[0].clone(), names[99].clone()),
                BatchBound::new(names[100].clone(), names[199].clone()),
                BatchBound::new(names[200].clone(), names[249].clone()),
            ]
        );
    }

    #[test]
    fn bounds_partition_every_user_exactly_once() {
        for count in 1..40usize {
            let names = users(count);
            for batch_size in 1..12u64 {
                let (boundaries, max_rank) = ranked(&names, batch_size);
                let bounds = pair_bounds(&boundaries, max_rank, batch_size);
                for name in &names {
                    let hits = bounds.iter().filter(|bound| bound.contains(name)).count();
                    assert_eq!(hits, 1, "{} users, batch {}, {}", count, batch_size, name);
                }
                for pair in bounds.windows(2) {
                    assert!(pair[0].end < pair[1].start);
                }
            }
        }
    }

    #[test]
    fn single_user_and_oversized_batch_yield_one_bound() {
        let names = users(1);
        let (boundaries, max_rank) = ranked(&names, 100);
        assert_eq!(
            pair_bounds(&boundaries, max_rank, 100),
            vec![BatchBound::new("user0000", "user0000")]
        );

        let names = users(7);
        let (boundaries, max_rank) = ranked(&names, 7);
        assert_eq!(
            pair_bounds(&boundaries, max_rank, 7),
            vec![BatchBound::new("user0000", "user0006")]
        );
    }

    #[test]
    fn empty_namespace_has_no_bounds() {
        assert!(pair_bounds(&BTreeMap::new(), 0, 10).is_empty());
    }

    #[test]
    fn qualifies_and_unqualifies_usernames() {
        let format = UsernameFormat::new("@example.com");
        assert_eq!(format.qualify("alice"), "alice@example.com");
        assert_eq!(format.qualify("alice@other.org"), "alice@example.com");
        assert_eq!(format.unqualify("alice@example.com"), "alice");
        assert_eq!(format.unqualify("alice@other.org"), "alice@other.org");
        assert_eq!(format.unqualify("alice"), "alice");
    }

    #[test]
    fn parses_routing_keys() {
        assert_eq!(Trigger::parse("index.all"), Ok(Trigger::PartitionAll));
        assert_eq!(Trigger::parse("index.usage.data"), Ok(Trigger::PartitionAll));
        assert_eq!(
            Trigger::parse("index.usage.data.batch.user.alice.bob"),
            Ok(Trigger::ReconcileBatch(BatchBound::new("alice", "bob")))
        );
        assert_eq!(
            Trigger::parse("index.usage.data.user.carol"),
            Ok(Trigger::ReconcileUser("carol".to_string()))
        );
        assert!(matches!(
            Trigger::parse("index.usage.data.batch.user.alice"),
            Err(TriggerParseError::MalformedBatch(_))
        ));
        assert!(matches!(
            Trigger::parse("index.usage.data.user."),
            Err(TriggerParseError::MissingUsername(_))
        ));
        assert!(matches!(
            Trigger::parse("index.usage.other"),
            Err(TriggerParseError::Unrecognized(_))
        ));
    }

    #[test]
    fn routing_keys_parse_back() {
        let trigger = Trigger::ReconcileBatch(BatchBound::new("alice", "bob"));
        assert_eq!(Trigger::parse(&trigger.routing_key()), Ok(trigger));
    }
}

//! Record initializers: one raw record in, one partial aggregate out.
//!
//! Initializers are plain `fn` items so they can be registered by name and
//! re-run on task retry without any captured state.

use crate::aggregate::PartialAggregate;
use crate::error::RecordParseError;
use crate::registry::InitFnId;
use crate::source::RawRecord;
use chrono::NaiveDateTime;

/// Pure record initializer.
pub type InitFn = fn(&RawRecord) -> Result<PartialAggregate, RecordParseError>;

/// Dimension names produced by [`access_log`].
pub const URL_DIMENSION: &str = "URL";
pub const USER_DIMENSION: &str = "User";
pub const DAY_DIMENSION: &str = "Day";

const ACCESS_LOG_TIMESTAMP: &str = "%Y%m%d%H%M%S";

/// A resolved initializer.
#[derive(Clone, Debug)]
pub struct Initializer {
    id: InitFnId,
    func: InitFn,
}

impl Initializer {
    pub fn new(id: impl Into<InitFnId>, func: InitFn) -> Self {
        Self {
            id: id.into(),
            func,
        }
    }

    pub fn id(&self) -> &InitFnId {
        &self.id
    }

    pub fn apply(&self, record: &RawRecord) -> Result<PartialAggregate, RecordParseError> {
        (self.func)(record)
    }
}

/// Access-log initializer.
///
/// Expects `timestamp,url,user` with a `YYYYMMDDhhmmss` timestamp and counts
/// the record once per URL, once per user and once per day.
///
/// ```rust
/// use foldwise::mapper::access_log;
/// use foldwise::source::RawRecord;
///
/// let partial = access_log(&RawRecord::parse("20130512030143,/post/clojure,11", ',')).unwrap();
/// assert_eq!(partial.get("URL", "/post/clojure"), Some(1));
/// assert_eq!(partial.get("User", "11"), Some(1));
/// assert_eq!(partial.get("Day", "20130512"), Some(1));
/// ```
pub fn access_log(record: &RawRecord) -> Result<PartialAggregate, RecordParseError> {
    if record.is_empty() {
        return Err(RecordParseError::Empty);
    }
    let [timestamp, url, user] = record.fields() else {
        return Err(RecordParseError::FieldCount {
            expected: 3,
            found: record.len(),
        });
    };
    for (field, value) in [("timestamp", timestamp), ("url", url), ("user", user)] {
        if value.is_empty() {
            return Err(RecordParseError::EmptyField {
                field: field.to_string(),
            });
        }
    }

    let moment = NaiveDateTime::parse_from_str(timestamp, ACCESS_LOG_TIMESTAMP).map_err(|e| {
        RecordParseError::Timestamp {
            value: timestamp.clone(),
            reason: e.to_string(),
        }
    })?;

    Ok(PartialAggregate::new()
        .with(URL_DIMENSION, url.as_str(), 1)
        .with(USER_DIMENSION, user.as_str(), 1)
        .with(DAY_DIMENSION, moment.format("%Y%m%d").to_string(), 1))
}

/// Counts each field value under a dimension named after its column index.
pub fn field_count(record: &RawRecord) -> Result<PartialAggregate, RecordParseError> {
    if record.is_empty() {
        return Err(RecordParseError::Empty);
    }
    Ok(record
        .fields()
        .iter()
        .enumerate()
        .fold(PartialAggregate::new(), |partial, (column, value)| {
            partial.with(column.to_string(), value.as_str(), 1)
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> RawRecord {
        RawRecord::parse(line, ',')
    }

    #[test]
    fn access_log_emits_one_count_per_dimension() {
        let partial = access_log(&record("20130512020202,/,11")).unwrap();
        assert_eq!(partial.key_count(), 3);
        assert_eq!(partial.get(URL_DIMENSION, "/"), Some(1));
        assert_eq!(partial.get(USER_DIMENSION, "11"), Some(1));
        assert_eq!(partial.get(DAY_DIMENSION, "20130512"), Some(1));
    }

    #[test]
    fn access_log_is_pure() {
        let input = record("20130512040256,/post/datomic,23");
        assert_eq!(access_log(&input), access_log(&input));
    }

    #[test]
    fn wrong_field_count_is_a_parse_error() {
        assert_eq!(
            access_log(&record("20130512040256,/post/datomic")),
            Err(RecordParseError::FieldCount {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn bad_timestamp_is_a_parse_error() {
        assert!(matches!(
            access_log(&record("2013-05-12,/,11")),
            Err(RecordParseError::Timestamp { .. })
        ));
        assert!(matches!(
            access_log(&record("20131312020202,/,11")),
            Err(RecordParseError::Timestamp { .. })
        ));
    }

    #[test]
    fn empty_fields_are_rejected() {
        assert_eq!(
            access_log(&record("20130512020202,,11")),
            Err(RecordParseError::EmptyField {
                field: "url".to_string()
            })
        );
        assert_eq!(access_log(&record("")), Err(RecordParseError::Empty));
    }

    #[test]
    fn field_count_uses_column_dimensions() {
        let partial = field_count(&record("red,large")).unwrap();
        assert_eq!(partial.get("0", "red"), Some(1));
        assert_eq!(partial.get("1", "large"), Some(1));
        assert_eq!(field_count(&record(" , ")), Err(RecordParseError::Empty));
    }
}

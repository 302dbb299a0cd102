//! Event tables (stimulus triggers and system codes) and their structural validation.
//!
//! A loader hands over event tables as loosely typed key/column maps. They are
//! only trusted once [`validate_triggers`] has confirmed that exactly the
//! `Index`, `Duration` and `Code` columns are present and equally long.

use crate::error::{Result, SsrError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub const INDEX_KEY: &str = "Index";
pub const DURATION_KEY: &str = "Duration";
pub const CODE_KEY: &str = "Code";

const REQUIRED_KEYS: [&str; 3] = [INDEX_KEY, DURATION_KEY, CODE_KEY];

/// Event table as produced by a file loader, before validation.
pub type RawEventTable = BTreeMap<String, Vec<Value>>;

/// Event label. Most acquisition systems emit numeric codes, some emit text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventCode {
    Number(i64),
    Label(String),
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCode::Number(n) => write!(f, "{}", n),
            EventCode::Label(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for EventCode {
    fn from(value: i64) -> Self {
        EventCode::Number(value)
    }
}

impl From<&str> for EventCode {
    fn from(value: &str) -> Self {
        EventCode::Label(value.to_string())
    }
}

/// Check the structure of a raw event table.
///
/// Fails on the first missing key, then on the first unexpected key, then on
/// unequal column lengths. Never mutates the table.
pub fn validate_triggers(table: &RawEventTable) -> Result<()> {
    for key in REQUIRED_KEYS {
        if !table.contains_key(key) {
            return Err(SsrError::MissingKey(key.to_string()));
        }
    }

    if let Some(extra) = table.keys().find(|k| !REQUIRED_KEYS.contains(&k.as_str())) {
        return Err(SsrError::UnexpectedKey(extra.clone()));
    }

    check_lengths(
        table[INDEX_KEY].len(),
        table[DURATION_KEY].len(),
        table[CODE_KEY].len(),
    )
}

fn check_lengths(index: usize, duration: usize, code: usize) -> Result<()> {
    if index != duration || index != code {
        return Err(SsrError::LengthMismatch {
            index,
            duration,
            code,
        });
    }
    Ok(())
}

/// Row-aligned event table: `index[i]`, `duration[i]` and `code[i]` describe one event.
///
/// `index` holds zero-based sample offsets into the owning record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventTable {
    #[serde(rename = "Index")]
    pub index: Vec<usize>,
    #[serde(rename = "Duration")]
    pub duration: Vec<i64>,
    #[serde(rename = "Code")]
    pub code: Vec<EventCode>,
}

/// Borrowed view of a single event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event<'a> {
    pub index: usize,
    pub duration: i64,
    pub code: &'a EventCode,
}

impl EventTable {
    pub fn new(index: Vec<usize>, duration: Vec<i64>, code: Vec<EventCode>) -> Result<Self> {
        let table = Self {
            index,
            duration,
            code,
        };
        table.validate()?;
        Ok(table)
    }

    /// Verify that the three columns have equal length.
    pub fn validate(&self) -> Result<()> {
        check_lengths(self.index.len(), self.duration.len(), self.code.len())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Event<'_>> + '_ {
        self.index
            .iter()
            .zip(&self.duration)
            .zip(&self.code)
            .map(|((&index, &duration), code)| Event {
                index,
                duration,
                code,
            })
    }

    /// Whether event positions are in ascending order.
    pub fn is_sorted(&self) -> bool {
        self.index.windows(2).all(|w| w[0] <= w[1])
    }

    /// Keep only the events for which `keep` returns true, in all three columns.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(Event<'_>) -> bool,
    {
        let mask: Vec<bool> = self.iter().map(&mut keep).collect();
        let mut flags = mask.iter();
        self.index.retain(|_| *flags.next().unwrap_or(&false));
        let mut flags = mask.iter();
        self.duration.retain(|_| *flags.next().unwrap_or(&false));
        let mut flags = mask.iter();
        self.code.retain(|_| *flags.next().unwrap_or(&false));
    }

    /// Drop every event whose code is listed. Returns the number removed.
    pub fn remove_codes(&mut self, codes: &[EventCode]) -> usize {
        let before = self.len();
        let codes: HashSet<&EventCode> = codes.iter().collect();
        self.retain(|event| !codes.contains(event.code));
        let removed = before - self.len();
        log::debug!("Removed {} events matching {} codes", removed, codes.len());
        removed
    }

    /// Shift the table into a window that starts at sample `start` and holds
    /// `len` samples. Events outside the window are dropped.
    pub(crate) fn shift_into_window(&mut self, start: usize, len: usize) {
        self.retain(|event| event.index >= start && event.index - start < len);
        for idx in &mut self.index {
            *idx -= start;
        }
    }
}

impl TryFrom<RawEventTable> for EventTable {
    type Error = SsrError;

    fn try_from(mut raw: RawEventTable) -> Result<Self> {
        validate_triggers(&raw)?;

        let index = raw
            .remove(INDEX_KEY)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| SsrError::InvalidEvent {
                        column: INDEX_KEY,
                        row,
                        reason: format!("expected a non-negative integer, got {}", v),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let duration = raw
            .remove(DURATION_KEY)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.as_i64().ok_or_else(|| SsrError::InvalidEvent {
                    column: DURATION_KEY,
                    row,
                    reason: format!("expected an integer, got {}", v),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let code = raw
            .remove(CODE_KEY)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(row, v)| match v {
                Value::String(s) => Ok(EventCode::Label(s)),
                other => other
                    .as_i64()
                    .map(EventCode::Number)
                    .ok_or_else(|| SsrError::InvalidEvent {
                        column: CODE_KEY,
                        row,
                        reason: format!("expected an integer or string label, got {}", other),
                    }),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            index,
            duration,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_table() -> RawEventTable {
        let mut table = RawEventTable::new();
        table.insert(INDEX_KEY.into(), vec![json!(10), json!(20), json!(30)]);
        table.insert(DURATION_KEY.into(), vec![json!(1), json!(1), json!(2)]);
        table.insert(CODE_KEY.into(), vec![json!(252), json!(252), json!("stop")]);
        table
    }

    #[test]
    fn test_valid_table_passes() {
        assert!(validate_triggers(&raw_table()).is_ok());
    }

    #[test]
    fn test_missing_each_key_fails() {
        for key in REQUIRED_KEYS {
            let mut table = raw_table();
            table.remove(key);
            match validate_triggers(&table) {
                Err(SsrError::MissingKey(k)) => assert_eq!(k, key),
                other => panic!("expected MissingKey for {}, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_unexpected_key_fails() {
        let mut table = raw_table();
        table.insert("Offset".into(), vec![json!(0), json!(0), json!(0)]);
        match validate_triggers(&table) {
            Err(SsrError::UnexpectedKey(k)) => assert_eq!(k, "Offset"),
            other => panic!("expected UnexpectedKey, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_column_fails() {
        for key in REQUIRED_KEYS {
            let mut table = raw_table();
            table.get_mut(key).unwrap().pop();
            assert!(matches!(
                validate_triggers(&table),
                Err(SsrError::LengthMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_try_from_converts_columns() {
        let table = EventTable::try_from(raw_table()).unwrap();
        assert_eq!(table.index, vec![10, 20, 30]);
        assert_eq!(table.duration, vec![1, 1, 2]);
        assert_eq!(table.code[0], EventCode::Number(252));
        assert_eq!(table.code[2], EventCode::Label("stop".into()));
    }

    #[test]
    fn test_try_from_rejects_negative_index() {
        let mut table = raw_table();
        table.insert(INDEX_KEY.into(), vec![json!(10), json!(-1), json!(30)]);
        match EventTable::try_from(table) {
            Err(SsrError::InvalidEvent { column, row, .. }) => {
                assert_eq!(column, INDEX_KEY);
                assert_eq!(row, 1);
            }
            other => panic!("expected InvalidEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_codes_keeps_rows_aligned() {
        let mut table = EventTable::try_from(raw_table()).unwrap();
        let removed = table.remove_codes(&[EventCode::Number(252)]);
        assert_eq!(removed, 2);
        assert_eq!(table.index, vec![30]);
        assert_eq!(table.duration, vec![2]);
        assert_eq!(table.code, vec![EventCode::Label("stop".into())]);
    }

    #[test]
    fn test_serde_uses_external_key_names() {
        let table = EventTable::new(vec![5], vec![1], vec![EventCode::Number(3)]).unwrap();
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value, json!({"Index": [5], "Duration": [1], "Code": [3]}));

        let bad = json!({"Index": [5], "Duration": [1], "Code": [3], "Extra": []});
        assert!(serde_json::from_value::<EventTable>(bad).is_err());
    }
}

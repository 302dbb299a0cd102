//! Channel management: add, remove, keep, merge and trim operations on a [`Record`].
//!
//! Channel lookups by name are lenient. A name that matches no channel is
//! logged as a warning and left out of the working selection instead of
//! failing the operation.

use crate::error::{Result, SsrError};
use crate::record::Record;
use ndarray::{s, ArrayView1, Axis};
use std::collections::BTreeSet;

/// Which channels an operation applies to. Indices are zero-based columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelector {
    Name(String),
    Names(Vec<String>),
    Index(usize),
    Indices(Vec<usize>),
}

impl From<&str> for ChannelSelector {
    fn from(name: &str) -> Self {
        ChannelSelector::Name(name.to_string())
    }
}

impl From<String> for ChannelSelector {
    fn from(name: String) -> Self {
        ChannelSelector::Name(name)
    }
}

impl From<usize> for ChannelSelector {
    fn from(index: usize) -> Self {
        ChannelSelector::Index(index)
    }
}

impl From<Vec<String>> for ChannelSelector {
    fn from(names: Vec<String>) -> Self {
        ChannelSelector::Names(names)
    }
}

impl From<Vec<&str>> for ChannelSelector {
    fn from(names: Vec<&str>) -> Self {
        ChannelSelector::Names(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for ChannelSelector {
    fn from(names: &[&str]) -> Self {
        ChannelSelector::Names(names.iter().map(|n| n.to_string()).collect())
    }
}

impl From<Vec<usize>> for ChannelSelector {
    fn from(indices: Vec<usize>) -> Self {
        ChannelSelector::Indices(indices)
    }
}

/// Outcome of matching a selector against the channel list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Matched column indices, in selector order
    pub indices: Vec<usize>,
    /// Names with no matching channel
    pub missing_names: Vec<String>,
    /// Indices past the last column
    pub out_of_range: Vec<usize>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.missing_names.is_empty() && self.out_of_range.is_empty()
    }
}

impl ChannelSelector {
    /// Match against `channel_names` without logging. Names map to their first match.
    pub fn lookup(&self, channel_names: &[String]) -> Resolution {
        let mut resolution = Resolution::default();
        let names: &[String] = match self {
            ChannelSelector::Name(name) => std::slice::from_ref(name),
            ChannelSelector::Names(names) => names,
            ChannelSelector::Index(_) | ChannelSelector::Indices(_) => &[],
        };
        let indices: &[usize] = match self {
            ChannelSelector::Index(idx) => std::slice::from_ref(idx),
            ChannelSelector::Indices(indices) => indices,
            ChannelSelector::Name(_) | ChannelSelector::Names(_) => &[],
        };

        for name in names {
            match channel_names.iter().position(|n| n == name) {
                Some(idx) => resolution.indices.push(idx),
                None => resolution.missing_names.push(name.clone()),
            }
        }
        for &idx in indices {
            if idx < channel_names.len() {
                resolution.indices.push(idx);
            } else {
                resolution.out_of_range.push(idx);
            }
        }
        resolution
    }

    /// Resolve to column indices, in selector order.
    ///
    /// Unmatched names and out-of-range indices are dropped with a warning.
    pub fn resolve(&self, channel_names: &[String]) -> Vec<usize> {
        let resolution = self.lookup(channel_names);
        for name in &resolution.missing_names {
            log::warn!("Channel '{}' not found, ignoring it", name);
        }
        for idx in &resolution.out_of_range {
            log::warn!(
                "Channel index {} out of range for {} channels, ignoring it",
                idx,
                channel_names.len()
            );
        }
        resolution.indices
    }
}

fn dedup_in_order(indices: Vec<usize>) -> Vec<usize> {
    let mut seen = BTreeSet::new();
    indices.into_iter().filter(|idx| seen.insert(*idx)).collect()
}

impl Record {
    /// Append a channel as the last column. Duplicate names are allowed.
    pub fn add_channel(&mut self, column: ArrayView1<'_, f64>, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if column.len() != self.num_samples() {
            return Err(SsrError::DimensionMismatch(format!(
                "channel '{}' has {} samples, record has {}",
                name,
                column.len(),
                self.num_samples()
            )));
        }

        self.data
            .push_column(column)
            .map_err(|e| SsrError::DimensionMismatch(e.to_string()))?;
        log::debug!("Added channel '{}' as column {}", name, self.channel_names.len());
        self.channel_names.push(name);
        Ok(())
    }

    /// Remove the selected channels. Unresolved names are ignored; a selection
    /// that resolves to nothing leaves the record unchanged.
    pub fn remove_channel(&mut self, selector: impl Into<ChannelSelector>) -> Result<()> {
        let selector = selector.into();
        let remove: BTreeSet<usize> = selector.resolve(&self.channel_names).into_iter().collect();

        if remove.is_empty() {
            log::warn!("No channels matched {:?}, nothing removed", selector);
            return Ok(());
        }

        // Descending order keeps the remaining positions valid while removing
        for &idx in remove.iter().rev() {
            log::debug!("Removing channel '{}'", self.channel_names[idx]);
            self.channel_names.remove(idx);
        }

        let keep: Vec<usize> = (0..self.data.ncols()).filter(|c| !remove.contains(c)).collect();
        self.data = self.data.select(Axis(1), &keep);
        Ok(())
    }

    /// Keep only the selected channels, removing all others.
    pub fn keep_channel(&mut self, selector: impl Into<ChannelSelector>) -> Result<()> {
        let keep: BTreeSet<usize> = selector.into().resolve(&self.channel_names).into_iter().collect();
        let remove: Vec<usize> = (0..self.num_channels()).filter(|c| !keep.contains(c)).collect();

        if remove.is_empty() {
            return Ok(());
        }
        self.remove_channel(ChannelSelector::Indices(remove))
    }

    /// Append the row-wise mean of the selected channels as `new_name`.
    ///
    /// Fails with [`SsrError::EmptySelection`] when no selected channel exists.
    pub fn merge_channels(
        &mut self,
        selector: impl Into<ChannelSelector>,
        new_name: impl Into<String>,
    ) -> Result<()> {
        let selector = selector.into();
        let new_name = new_name.into();
        let indices = dedup_in_order(selector.resolve(&self.channel_names));

        if indices.is_empty() {
            return Err(SsrError::EmptySelection(format!(
                "cannot merge {:?} into '{}'",
                selector, new_name
            )));
        }

        log::debug!(
            "Merging {:?} into '{}'",
            indices
                .iter()
                .map(|&i| self.channel_names[i].as_str())
                .collect::<Vec<_>>(),
            new_name
        );

        let merged = self
            .data
            .select(Axis(1), &indices)
            .mean_axis(Axis(1))
            .ok_or_else(|| SsrError::EmptySelection(format!("cannot merge into '{}'", new_name)))?;

        self.add_channel(merged.view(), new_name)
    }

    /// Keep samples `start..=stop` and move the event tables along with them.
    ///
    /// Both bounds are zero-based and inclusive, with `start` first. Use
    /// [`Record::trim_to`] to keep everything up to `stop`.
    ///
    /// Events are shifted by `-start`; events that fall outside the retained
    /// window are removed from every column of their table.
    pub fn trim_channel(&mut self, start: usize, stop: usize) -> Result<()> {
        if start > stop || stop >= self.num_samples() {
            return Err(SsrError::InvalidParameter(format!(
                "cannot trim samples {}..={} from a recording of {} samples",
                start,
                stop,
                self.num_samples()
            )));
        }

        let len = stop - start + 1;
        self.data = self.data.slice(s![start..=stop, ..]).to_owned();

        let triggers_before = self.triggers.len();
        let codes_before = self.system_codes.len();
        self.triggers.shift_into_window(start, len);
        self.system_codes.shift_into_window(start, len);

        log::debug!(
            "Trimmed to {} samples; dropped {} triggers and {} system codes",
            len,
            triggers_before - self.triggers.len(),
            codes_before - self.system_codes.len()
        );
        Ok(())
    }

    /// Keep samples `0..=stop`.
    pub fn trim_to(&mut self, stop: usize) -> Result<()> {
        self.trim_channel(0, stop)
    }

    /// Give a single channel a new name.
    pub fn rename_channel(
        &mut self,
        selector: impl Into<ChannelSelector>,
        new_name: impl Into<String>,
    ) -> Result<()> {
        let selector = selector.into();
        match dedup_in_order(selector.resolve(&self.channel_names)).as_slice() {
            [idx] => {
                self.channel_names[*idx] = new_name.into();
                Ok(())
            }
            [] => Err(SsrError::UnknownChannel(format!("{:?}", selector))),
            many => Err(SsrError::InvalidParameter(format!(
                "rename needs exactly one channel, {:?} selects {}",
                selector,
                many.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::{EventCode, EventTable};
    use ndarray::{aview1, Array2};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    /// Four channels where column `c` holds `10 * c + row`.
    fn record() -> Record {
        let data = Array2::from_shape_fn((6, 4), |(r, c)| (10 * c + r) as f64);
        Record::new(data, names(&["A", "B", "C", "D"]), 100.0, 40.0).unwrap()
    }

    #[test]
    fn test_add_channel_appends_last() {
        let mut r = record();
        r.add_channel(aview1(&[1.0; 6]), "E").unwrap();
        assert_eq!(r.num_channels(), 5);
        assert_eq!(r.channel_names().last().unwrap(), "E");
        assert_eq!(r.channel("E").unwrap().to_vec(), vec![1.0; 6]);
        assert_eq!(r.channel("D").unwrap()[5], 35.0);
    }

    #[test]
    fn test_add_channel_length_mismatch() {
        let mut r = record();
        let err = r.add_channel(aview1(&[1.0; 5]), "E").unwrap_err();
        assert!(matches!(err, SsrError::DimensionMismatch(_)));
        assert_eq!(r.num_channels(), 4);
    }

    #[test]
    fn test_add_channel_allows_duplicate_names() {
        let mut r = record();
        r.add_channel(aview1(&[7.0; 6]), "A").unwrap();
        assert_eq!(r.channel_index("A"), Some(0));
        assert_eq!(r.num_channels(), 5);
    }

    #[test]
    fn test_remove_by_name_and_names() {
        let mut r = record();
        r.remove_channel("B").unwrap();
        assert_eq!(r.channel_names(), names(&["A", "C", "D"]).as_slice());
        assert_eq!(r.channel("C").unwrap()[0], 20.0);

        r.remove_channel(vec!["A", "D"]).unwrap();
        assert_eq!(r.channel_names(), names(&["C"]).as_slice());
        assert_eq!(r.data().ncols(), 1);
    }

    #[test]
    fn test_remove_by_indices_keeps_order() {
        let mut r = record();
        r.remove_channel(vec![3usize, 0, 3]).unwrap();
        assert_eq!(r.channel_names(), names(&["B", "C"]).as_slice());
        assert_eq!(r.data().column(0)[1], 11.0);
        assert_eq!(r.data().column(1)[1], 21.0);
    }

    #[test]
    fn test_lookup_reports_unresolved() {
        let channels = names(&["A", "B", "C", "D"]);

        let found = ChannelSelector::from(vec!["B", "Typo", "A"]).lookup(&channels);
        assert_eq!(found.indices, vec![1, 0]);
        assert_eq!(found.missing_names, names(&["Typo"]));
        assert!(!found.is_complete());

        let found = ChannelSelector::from(vec![3usize, 9]).lookup(&channels);
        assert_eq!(found.indices, vec![3]);
        assert_eq!(found.out_of_range, vec![9]);

        assert!(ChannelSelector::from("C").lookup(&channels).is_complete());
        assert_eq!(ChannelSelector::from(vec!["B", "Typo"]).resolve(&channels), vec![1]);
    }

    #[test]
    fn test_remove_ignores_unknown_names() {
        let mut r = record();
        let selector = ChannelSelector::from(vec!["B", "Typo"]);
        assert_eq!(selector.lookup(r.channel_names()).missing_names, names(&["Typo"]));
        r.remove_channel(vec!["B", "Typo"]).unwrap();
        assert_eq!(r.channel_names(), names(&["A", "C", "D"]).as_slice());

        r.remove_channel("Missing").unwrap();
        assert_eq!(r.num_channels(), 3);
    }

    #[test]
    fn test_remove_all_channels() {
        let mut r = record();
        r.remove_channel(vec![0usize, 1, 2, 3]).unwrap();
        assert_eq!(r.num_channels(), 0);
        assert_eq!(r.num_samples(), 6);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_keep_channel_is_complement() {
        let mut r = record();
        r.keep_channel(vec!["D", "B"]).unwrap();
        assert_eq!(r.channel_names(), names(&["B", "D"]).as_slice());
        assert_eq!(r.channel("D").unwrap()[2], 32.0);

        let mut r = record();
        r.keep_channel(2usize).unwrap();
        assert_eq!(r.channel_names(), names(&["C"]).as_slice());
    }

    #[test]
    fn test_keep_nothing_removes_everything() {
        let mut r = record();
        r.keep_channel("Missing").unwrap();
        assert_eq!(r.num_channels(), 0);
    }

    #[test]
    fn test_merge_channels_mean() {
        let mut r = record();
        r.merge_channels(vec!["A", "B"], "AB").unwrap();
        assert_eq!(r.num_channels(), 5);
        let merged = r.channel("AB").unwrap();
        for row in 0..6 {
            assert_eq!(merged[row], (row as f64 + (10 + row) as f64) / 2.0);
        }
    }

    #[test]
    fn test_merge_skips_missing_channel() {
        let mut r = record();
        let selector = ChannelSelector::from(vec!["A", "Nope"]);
        assert_eq!(selector.lookup(r.channel_names()).missing_names, names(&["Nope"]));
        r.merge_channels(vec!["A", "Nope"], "AB").unwrap();
        assert_eq!(r.channel("AB").unwrap(), r.channel("A").unwrap());
    }

    #[test]
    fn test_merge_with_no_valid_channels_fails() {
        let mut r = record();
        let err = r.merge_channels(vec!["X", "Y"], "XY").unwrap_err();
        assert!(matches!(err, SsrError::EmptySelection(_)));
        assert_eq!(r.num_channels(), 4);
    }

    #[test]
    fn test_trim_shifts_and_drops_events() {
        let mut r = record()
            .with_triggers(
                EventTable::new(
                    vec![0, 2, 3, 5],
                    vec![1, 2, 3, 4],
                    vec![
                        EventCode::Number(1),
                        EventCode::Number(2),
                        EventCode::Number(3),
                        EventCode::Number(4),
                    ],
                )
                .unwrap(),
            )
            .unwrap()
            .with_system_codes(
                EventTable::new(vec![1, 4], vec![0, 0], vec!["on".into(), "off".into()]).unwrap(),
            )
            .unwrap();

        r.trim_channel(2, 4).unwrap();

        assert_eq!(r.num_samples(), 3);
        assert_eq!(r.data().row(0).to_vec(), vec![2.0, 12.0, 22.0, 32.0]);
        assert_eq!(r.triggers().index, vec![0, 1]);
        assert_eq!(r.triggers().duration, vec![2, 3]);
        assert_eq!(
            r.triggers().code,
            vec![EventCode::Number(2), EventCode::Number(3)]
        );
        assert_eq!(r.system_codes().index, vec![2]);
        assert_eq!(r.system_codes().code, vec![EventCode::Label("off".into())]);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_trim_rejects_bad_window() {
        let mut r = record();
        assert!(r.trim_channel(4, 2).is_err());
        assert!(r.trim_channel(0, 6).is_err());
        assert_eq!(r.num_samples(), 6);
    }

    #[test]
    fn test_trim_to_keeps_leading_samples() {
        let mut r = record()
            .with_triggers(
                EventTable::new(vec![1, 4], vec![1, 1], vec![EventCode::Number(7); 2]).unwrap(),
            )
            .unwrap();

        r.trim_to(2).unwrap();

        assert_eq!(r.num_samples(), 3);
        assert_eq!(r.channel("B").unwrap().to_vec(), vec![10.0, 11.0, 12.0]);
        assert_eq!(r.triggers().index, vec![1]);
        assert!(r.trim_to(3).is_err());
    }

    #[test]
    fn test_rename_channel() {
        let mut r = record();
        r.rename_channel("C", "Cz").unwrap();
        assert_eq!(r.channel_index("Cz"), Some(2));
        assert!(r.rename_channel("Nope", "X").is_err());
        assert!(r.rename_channel(vec![0usize, 1], "X").is_err());
    }

    #[test]
    fn test_selector_resolution() {
        let list = names(&["A", "B", "A"]);
        assert_eq!(ChannelSelector::from("A").resolve(&list), vec![0]);
        assert_eq!(ChannelSelector::from(vec!["B", "Z", "A"]).resolve(&list), vec![1, 0]);
        assert_eq!(ChannelSelector::from(vec![2usize, 9]).resolve(&list), vec![2]);
        assert!(ChannelSelector::Index(3).resolve(&list).is_empty());
    }
}

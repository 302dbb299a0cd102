//! Re-referencing of multichannel signals.
//!
//! Operates on raw `samples × channels` matrices so it can be reused outside
//! of a [`Record`]; [`Record::rereference`] wraps it and keeps track of the
//! reference channels.

use crate::error::{Result, SsrError};
use crate::record::Record;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;

/// What to subtract from every channel. Indices are zero-based columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTarget {
    Index(usize),
    Name(String),
    Indices(Vec<usize>),
    Names(Vec<String>),
    /// Mean over all channels
    CommonAverage,
}

impl FromStr for ReferenceTarget {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "car" | "average" => ReferenceTarget::CommonAverage,
            _ => ReferenceTarget::Name(s.to_string()),
        })
    }
}

impl From<&str> for ReferenceTarget {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(target) => target,
            Err(never) => match never {},
        }
    }
}

impl From<usize> for ReferenceTarget {
    fn from(index: usize) -> Self {
        ReferenceTarget::Index(index)
    }
}

impl From<Vec<usize>> for ReferenceTarget {
    fn from(indices: Vec<usize>) -> Self {
        ReferenceTarget::Indices(indices)
    }
}

impl From<Vec<&str>> for ReferenceTarget {
    fn from(names: Vec<&str>) -> Self {
        ReferenceTarget::Names(names.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for ReferenceTarget {
    fn from(names: Vec<String>) -> Self {
        ReferenceTarget::Names(names)
    }
}

/// Subtract `template` from every column of `signals`.
pub fn remove_template(signals: &mut Array2<f64>, template: ArrayView1<'_, f64>) -> Result<()> {
    if template.len() != signals.nrows() {
        return Err(SsrError::DimensionMismatch(format!(
            "template has {} samples, signals have {}",
            template.len(),
            signals.nrows()
        )));
    }

    *signals -= &template.insert_axis(Axis(1));
    Ok(())
}

/// Re-reference `signals` to `target`.
///
/// A single channel is subtracted from every column, so the target column
/// becomes zero. A list of channels, or the common average, subtracts the
/// row-wise mean of the selected columns. `channel_names` is required when the
/// target is given by name.
pub fn rereference(
    signals: &mut Array2<f64>,
    target: &ReferenceTarget,
    channel_names: Option<&[String]>,
) -> Result<()> {
    let indices = resolve_target(target, signals.ncols(), channel_names)?;
    let template = reference_signal(signals, &indices)?;
    remove_template(signals, template.view())
}

fn reference_signal(signals: &Array2<f64>, indices: &[usize]) -> Result<Array1<f64>> {
    signals
        .select(Axis(1), indices)
        .mean_axis(Axis(1))
        .ok_or_else(|| SsrError::DimensionMismatch("no reference channels selected".to_string()))
}

fn require_names<'a>(channel_names: Option<&'a [String]>, ncols: usize) -> Result<&'a [String]> {
    let names = channel_names.ok_or_else(|| {
        SsrError::InvalidParameter(
            "channel names are required to reference by channel name".to_string(),
        )
    })?;
    if names.len() != ncols {
        return Err(SsrError::DimensionMismatch(format!(
            "{} channel names for {} signal columns",
            names.len(),
            ncols
        )));
    }
    Ok(names)
}

/// Resolve a reference target to zero-based column indices.
pub(crate) fn resolve_target(
    target: &ReferenceTarget,
    ncols: usize,
    channel_names: Option<&[String]>,
) -> Result<Vec<usize>> {
    let indices = match target {
        ReferenceTarget::Index(idx) => {
            if *idx >= ncols {
                return Err(SsrError::UnknownChannel(format!(
                    "index {} with {} channels",
                    idx, ncols
                )));
            }
            vec![*idx]
        }
        ReferenceTarget::Name(name) => {
            let names = require_names(channel_names, ncols)?;
            let idx = names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| SsrError::UnknownChannel(name.clone()))?;
            vec![idx]
        }
        ReferenceTarget::Indices(list) => list
            .iter()
            .copied()
            .filter(|&idx| {
                let valid = idx < ncols;
                if !valid {
                    log::warn!("Reference index {} out of range, ignoring it", idx);
                }
                valid
            })
            .collect(),
        ReferenceTarget::Names(list) => {
            let names = require_names(channel_names, ncols)?;
            list.iter()
                .filter_map(|name| {
                    let found = names.iter().position(|n| n == name);
                    if found.is_none() {
                        log::warn!("Reference channel '{}' not found, ignoring it", name);
                    }
                    found
                })
                .collect()
        }
        ReferenceTarget::CommonAverage => (0..ncols).collect(),
    };

    if indices.is_empty() {
        return Err(SsrError::DimensionMismatch(format!(
            "reference {:?} resolves to no channels",
            target
        )));
    }
    Ok(indices)
}

impl Record {
    /// Re-reference `data` in place and remember the reference channels.
    pub fn rereference(&mut self, target: impl Into<ReferenceTarget>) -> Result<()> {
        let target = target.into();
        let indices = resolve_target(&target, self.num_channels(), Some(self.channel_names.as_slice()))?;
        let template = reference_signal(&self.data, &indices)?;
        remove_template(&mut self.data, template.view())?;

        self.reference_channel = indices
            .iter()
            .map(|&idx| self.channel_names[idx].clone())
            .collect();
        log::info!(
            "Re-referenced {} channels to {:?}",
            self.num_channels(),
            self.reference_channel
        );
        Ok(())
    }
}

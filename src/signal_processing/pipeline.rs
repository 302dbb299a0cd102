//! Conditioning Pipeline
//!
//! Applies signal conditioning to a recording in a fixed order:
//! 1. Re-referencing
//! 2. FIR filtering (high-pass, low-pass, or band-pass when both are set)
//!
//! The filter is designed once per pipeline and reused for every record.

use super::filters::{create_filter, AppliedFilter, FilterConfig, FirFilter, ResponseType, Window};
use crate::error::Result;
use crate::record::Record;
use crate::reference::ReferenceTarget;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the conditioning pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditioningConfig {
    /// Reference to subtract before filtering
    #[serde(default)]
    pub reference: Option<ReferenceTarget>,

    /// High-pass cutoff (Hz)
    #[serde(default)]
    pub highpass: Option<f64>,

    /// Low-pass cutoff (Hz)
    #[serde(default)]
    pub lowpass: Option<f64>,

    /// FIR order, derived from the cutoffs when absent
    #[serde(default)]
    pub filter_order: Option<usize>,

    #[serde(default)]
    pub window: Window,

    /// Forward-backward filtering (no phase delay)
    #[serde(default = "default_zero_phase")]
    pub zero_phase: bool,
}

fn default_zero_phase() -> bool {
    true
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            reference: None,
            highpass: None,
            lowpass: None,
            filter_order: None,
            window: Window::Hamming,
            zero_phase: true,
        }
    }
}

impl ConditioningConfig {
    /// Drift removal for steady-state responses: 2 Hz zero-phase high-pass
    pub fn standard_ssr() -> Self {
        Self {
            highpass: Some(2.0),
            ..Default::default()
        }
    }

    /// Common-average reference followed by a band-pass
    pub fn averaged_bandpass(low: f64, high: f64) -> Self {
        Self {
            reference: Some(ReferenceTarget::CommonAverage),
            highpass: Some(low),
            lowpass: Some(high),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Response implied by the configured cutoffs
    pub fn response(&self) -> Option<ResponseType> {
        match (self.highpass, self.lowpass) {
            (Some(low), Some(high)) => Some(ResponseType::Bandpass { low, high }),
            (Some(cutoff), None) => Some(ResponseType::Highpass { cutoff }),
            (None, Some(cutoff)) => Some(ResponseType::Lowpass { cutoff }),
            (None, None) => None,
        }
    }
}

/// Outcome of conditioning one record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditioningReport {
    /// Channels the record is now referenced to
    pub reference_channel: Vec<String>,
    pub filter: Option<AppliedFilter>,
    /// Processing time in milliseconds
    pub processing_time_ms: f64,
}

/// Conditioning pipeline bound to one sampling rate
pub struct ConditioningPipeline {
    config: ConditioningConfig,
    filter: Option<FirFilter>,
}

impl ConditioningPipeline {
    /// Create a pipeline and design its filter for `sample_rate`
    pub fn new(config: ConditioningConfig, sample_rate: f64) -> Result<Self> {
        let filter = config
            .response()
            .map(|response| {
                create_filter(&FilterConfig {
                    response,
                    order: config.filter_order,
                    window: config.window,
                    sample_rate,
                })
            })
            .transpose()?;

        Ok(Self { config, filter })
    }

    pub fn config(&self) -> &ConditioningConfig {
        &self.config
    }

    pub fn filter(&self) -> Option<&FirFilter> {
        self.filter.as_ref()
    }

    /// Re-reference and filter `record` in place
    pub fn apply(&self, record: &mut Record) -> Result<ConditioningReport> {
        let start = std::time::Instant::now();

        if let Some(ref target) = self.config.reference {
            record.rereference(target.clone())?;
        }

        let applied = match self.filter {
            Some(ref filter) => {
                record.filter(filter, self.config.zero_phase)?;
                record.processing().filters.last().cloned()
            }
            None => None,
        };

        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        log::info!(
            "Conditioned {} channels in {:.2}ms (reference: {:?}, filter: {:?})",
            record.num_channels(),
            processing_time_ms,
            self.config.reference,
            applied.as_ref().map(|f| f.response)
        );

        Ok(ConditioningReport {
            reference_channel: record.reference_channel().to_vec(),
            filter: applied,
            processing_time_ms,
        })
    }
}

/// Condition independent records in parallel, each at its own sampling rate
pub fn condition_batch(
    records: &mut [Record],
    config: &ConditioningConfig,
) -> Result<Vec<ConditioningReport>> {
    records
        .par_iter_mut()
        .map(|record| {
            let pipeline = ConditioningPipeline::new(config.clone(), record.samplingrate())?;
            pipeline.apply(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::f64::consts::PI;
    use std::io::Write;

    fn record(sample_rate: f64) -> Record {
        let data = Array2::from_shape_fn((2000, 3), |(i, c)| {
            let t = i as f64 / sample_rate;
            c as f64 + (2.0 * PI * 40.0 * t).sin()
        });
        Record::new(
            data,
            vec!["Cz".into(), "Fz".into(), "Oz".into()],
            sample_rate,
            40.0,
        )
        .unwrap()
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config = ConditioningConfig::from_json(r#"{"highpass": 2.0}"#).unwrap();
        assert_eq!(config.highpass, Some(2.0));
        assert!(config.zero_phase);
        assert_eq!(config.window, Window::Hamming);
        assert_eq!(config.reference, None);
        assert_eq!(config.response(), Some(ResponseType::Highpass { cutoff: 2.0 }));
    }

    #[test]
    fn test_config_reference_variants() {
        let config = ConditioningConfig::from_json(
            r#"{"reference": "common_average", "lowpass": 100.0, "zero_phase": false}"#,
        )
        .unwrap();
        assert_eq!(config.reference, Some(ReferenceTarget::CommonAverage));
        assert!(!config.zero_phase);

        let config = ConditioningConfig::from_json(r#"{"reference": {"names": ["Cz", "Fz"]}}"#).unwrap();
        assert_eq!(
            config.reference,
            Some(ReferenceTarget::Names(vec!["Cz".into(), "Fz".into()]))
        );
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"highpass": 1.0, "lowpass": 80.0, "filter_order": 200}}"#).unwrap();
        let config = ConditioningConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.response(),
            Some(ResponseType::Bandpass { low: 1.0, high: 80.0 })
        );
        assert_eq!(config.filter_order, Some(200));

        assert!(ConditioningConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_pipeline_without_steps_is_identity() {
        let mut r = record(500.0);
        let before = r.data().to_owned();
        let pipeline = ConditioningPipeline::new(ConditioningConfig::default(), 500.0).unwrap();
        let report = pipeline.apply(&mut r).unwrap();
        assert!(report.filter.is_none());
        assert!(report.reference_channel.is_empty());
        assert_eq!(r.data(), before);
    }

    #[test]
    fn test_pipeline_references_then_filters() {
        let mut r = record(500.0);
        let config = ConditioningConfig::averaged_bandpass(20.0, 60.0);
        let pipeline = ConditioningPipeline::new(config, 500.0).unwrap();
        let report = pipeline.apply(&mut r).unwrap();

        assert_eq!(report.reference_channel, vec!["Cz", "Fz", "Oz"]);
        let applied = report.filter.unwrap();
        assert!(applied.zero_phase);
        assert_eq!(applied.order % 2, 0);
        assert_eq!(r.processing().filters.len(), 1);
        // CAR removes the shared 40 Hz component, leaving constant offsets the band-pass rejects
        for v in r.data().slice(ndarray::s![500..1500, ..]).iter() {
            assert!(v.abs() < 0.01);
        }
    }

    #[test]
    fn test_pipeline_rejects_invalid_cutoff() {
        let config = ConditioningConfig {
            lowpass: Some(300.0),
            ..Default::default()
        };
        assert!(ConditioningPipeline::new(config, 500.0).is_err());
    }

    #[test]
    fn test_condition_batch_per_record_rate() {
        let mut records = vec![record(500.0), record(1000.0)];
        let reports = condition_batch(&mut records, &ConditioningConfig::standard_ssr()).unwrap();
        assert_eq!(reports.len(), 2);
        assert_ne!(
            reports[0].filter.as_ref().unwrap().order,
            reports[1].filter.as_ref().unwrap().order
        );
        for r in &records {
            assert_eq!(r.processing().filters.len(), 1);
        }
    }
}

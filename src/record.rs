//! The steady-state response recording held in memory.

use crate::error::{Result, SsrError};
use crate::signal_processing::AppliedFilter;
use crate::triggers::EventTable;
use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value stored in the open-ended metadata maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Number(f64),
    Text(String),
    Numbers(Vec<f64>),
    Array(ArrayD<f64>),
}

/// Analysis metadata. Recognized keys are typed fields; anything produced by
/// downstream steps (`epochs`, `sweeps`, ...) lives in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Processing {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Side", default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(rename = "Carrier_Frequency", default, skip_serializing_if = "Option::is_none")]
    pub carrier_frequency: Option<f64>,
    #[serde(rename = "Amplitude", default, skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    /// Filters applied to `data`, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<AppliedFilter>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, MetaValue>,
}

/// Numeric types a stored frequency can be read back as.
pub trait FromHertz {
    fn from_hertz(hz: f64) -> Self;
}

macro_rules! impl_from_hertz_float {
    ($($t:ty),*) => {
        $(impl FromHertz for $t {
            fn from_hertz(hz: f64) -> Self {
                hz as $t
            }
        })*
    };
}

macro_rules! impl_from_hertz_int {
    ($($t:ty),*) => {
        $(impl FromHertz for $t {
            fn from_hertz(hz: f64) -> Self {
                hz.round() as $t
            }
        })*
    };
}

impl_from_hertz_float!(f32, f64);
impl_from_hertz_int!(i32, i64, u32, u64, usize);

/// Multichannel SSR recording: samples × channels plus event markers and metadata.
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) data: Array2<f64>,
    pub(crate) channel_names: Vec<String>,
    pub(crate) triggers: EventTable,
    pub(crate) system_codes: EventTable,
    pub(crate) samplingrate: f64,
    pub(crate) modulationrate: f64,
    pub(crate) reference_channel: Vec<String>,
    pub(crate) processing: Processing,
    pub(crate) header: BTreeMap<String, MetaValue>,
}

fn check_rate(label: &str, hz: f64) -> Result<()> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(SsrError::InvalidParameter(format!(
            "{} must be a positive frequency, got {} Hz",
            label, hz
        )));
    }
    Ok(())
}

impl Record {
    /// Build a record from loader output. Event tables start empty.
    pub fn new(
        data: Array2<f64>,
        channel_names: Vec<String>,
        samplingrate: f64,
        modulationrate: f64,
    ) -> Result<Self> {
        check_rate("Sampling rate", samplingrate)?;
        check_rate("Modulation rate", modulationrate)?;

        if channel_names.len() != data.ncols() {
            return Err(SsrError::DimensionMismatch(format!(
                "{} channel names for {} data columns",
                channel_names.len(),
                data.ncols()
            )));
        }

        Ok(Self {
            data,
            channel_names,
            triggers: EventTable::default(),
            system_codes: EventTable::default(),
            samplingrate,
            modulationrate,
            reference_channel: Vec::new(),
            processing: Processing::default(),
            header: BTreeMap::new(),
        })
    }

    pub fn with_triggers(mut self, triggers: EventTable) -> Result<Self> {
        self.set_triggers(triggers)?;
        Ok(self)
    }

    pub fn with_system_codes(mut self, system_codes: EventTable) -> Result<Self> {
        self.set_system_codes(system_codes)?;
        Ok(self)
    }

    pub fn with_processing(mut self, processing: Processing) -> Self {
        self.processing = processing;
        self
    }

    pub fn with_header(mut self, header: BTreeMap<String, MetaValue>) -> Self {
        self.header = header;
        self
    }

    /// Replace the trigger table. Every `Index` must fall inside the recording.
    pub fn set_triggers(&mut self, triggers: EventTable) -> Result<()> {
        check_events("triggers", &triggers, self.num_samples())?;
        self.triggers = triggers;
        Ok(())
    }

    pub fn set_system_codes(&mut self, system_codes: EventTable) -> Result<()> {
        check_events("system codes", &system_codes, self.num_samples())?;
        self.system_codes = system_codes;
        Ok(())
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Mutable view of the samples. The shape cannot change through it.
    pub fn data_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.data.view_mut()
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn triggers(&self) -> &EventTable {
        &self.triggers
    }

    pub fn system_codes(&self) -> &EventTable {
        &self.system_codes
    }

    pub fn reference_channel(&self) -> &[String] {
        &self.reference_channel
    }

    pub fn processing(&self) -> &Processing {
        &self.processing
    }

    pub fn processing_mut(&mut self) -> &mut Processing {
        &mut self.processing
    }

    pub fn header(&self) -> &BTreeMap<String, MetaValue> {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut BTreeMap<String, MetaValue> {
        &mut self.header
    }

    /// Sampling rate in Hz
    pub fn samplingrate(&self) -> f64 {
        self.samplingrate
    }

    pub fn samplingrate_as<T: FromHertz>(&self) -> T {
        T::from_hertz(self.samplingrate)
    }

    /// Modulation rate of the stimulus in Hz
    pub fn modulationrate(&self) -> f64 {
        self.modulationrate
    }

    pub fn modulationrate_as<T: FromHertz>(&self) -> T {
        T::from_hertz(self.modulationrate)
    }

    pub fn num_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_channels(&self) -> usize {
        self.data.ncols()
    }

    pub fn duration_secs(&self) -> f64 {
        self.num_samples() as f64 / self.samplingrate
    }

    /// Index of the first channel with this name.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channel_names.iter().position(|n| n == name)
    }

    pub fn channel(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.channel_index(name)
            .map(|idx| self.data.index_axis(Axis(1), idx))
    }

    /// Check every structural invariant of the record.
    pub fn validate(&self) -> Result<()> {
        if self.channel_names.len() != self.data.ncols() {
            return Err(SsrError::DimensionMismatch(format!(
                "{} channel names for {} data columns",
                self.channel_names.len(),
                self.data.ncols()
            )));
        }

        check_events("triggers", &self.triggers, self.num_samples())?;
        check_events("system codes", &self.system_codes, self.num_samples())
    }
}

/// Row-aligned columns and every sample offset inside `[0, num_samples)`.
fn check_events(label: &str, table: &EventTable, num_samples: usize) -> Result<()> {
    table.validate()?;
    if let Some(&idx) = table.index.iter().find(|&&idx| idx >= num_samples) {
        return Err(SsrError::InvalidParameter(format!(
            "{} contain sample offset {} beyond recording length {}",
            label, idx, num_samples
        )));
    }
    Ok(())
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "SSR measurement of {:.2} mins with {} channels sampled at {} Hz",
            self.duration_secs() / 60.0,
            self.num_channels(),
            self.samplingrate
        )?;
        write!(f, "  Modulation frequency: {} Hz", self.modulationrate)?;

        if let Some(amplitude) = self.processing.amplitude {
            write!(f, "\n  Stimulation amplitude: {} dB", amplitude)?;
        }
        if let Some(ref name) = self.processing.name {
            write!(f, "\n  Participant name: {}", name)?;
        }
        if let Some(ref side) = self.processing.side {
            write!(f, "\n  Stimulation side: {}", side)?;
        }
        if let Some(carrier) = self.processing.carrier_frequency {
            write!(f, "\n  Carrier frequency: {} Hz", carrier)?;
        }
        Ok(())
    }
}

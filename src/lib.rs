pub mod channels;
pub mod error;
pub mod record;
pub mod reference;
pub mod signal_processing;
pub mod triggers;

pub use channels::{ChannelSelector, Resolution};
pub use error::{Result, SsrError};
pub use record::{FromHertz, MetaValue, Processing, Record};
pub use reference::{remove_template, rereference, ReferenceTarget};
pub use signal_processing::{
    default_filter_order, filter_signal, ConditioningConfig, ConditioningPipeline, FirFilter,
    ResponseType, Window,
};
pub use triggers::{validate_triggers, EventCode, EventTable, RawEventTable};

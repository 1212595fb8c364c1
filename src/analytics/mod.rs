//! Click analytics: classification, privacy, geolocation, recording, and
//! aggregation. The redirect hot path only ever enqueues into the recorder;
//! every lookup and hash runs on the worker.

pub mod aggregator;
pub mod classifier;
pub mod geoip;
pub mod ip_extractor;
pub mod language;
pub mod privacy;
pub mod recorder;

pub use aggregator::{Aggregator, AnalyticsSummary, DateRange, ExportRow};
pub use classifier::{Classification, DeviceClassifier};
pub use geoip::{GeoInfo, GeoResolver};
pub use ip_extractor::extract_client_ip;
pub use recorder::{ClickJob, ClickRecorder};

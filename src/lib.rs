pub mod aggregate;
pub mod classify;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod export;
pub mod filter;

pub use aggregate::{GroupKey, GroupSum, KeyValue, ValueField};
pub use classify::Classifier;
pub use dataset::{Dataset, DetailRow, Record};
pub use filter::{FilterOptions, Selection};

pub mod aggregation;
pub mod classifier;
pub mod config;
pub mod error;
pub mod group_report;
pub mod mailbox;
pub mod matcher;
pub mod message;
pub mod normalization;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod sink;
pub mod status;
pub mod window;

pub use config::Config;
pub use error::{DigestError, Result};
pub use message::{Message, MessageSource};
pub use pipeline::{Engine, Inspection};
pub use registry::{ClientRegistry, ClientRule, Registry};
pub use report::Digest;
pub use status::{Status, StatusKind};

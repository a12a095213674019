//! `neighborwatch` - Community safety reports, zone chat and incident heatmaps
//!
//! This library provides the core of the `nwatch` tool: a local document
//! store for incident reports, votes, comments and zone chat; an
//! authentication session; live feeds over the store; and the coordinate
//! bucketer that turns reports into heatmap cells.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod chat;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod feed;
pub mod flows;
pub mod heatmap;
pub mod links;
pub mod logging;
pub mod report;
pub mod session;
pub mod storage;
pub mod validation;

pub use chat::{ChatMessage, ChatUser, MessageKind, OutgoingMessage};
pub use config::Config;
pub use device::{ConsoleNotifier, FixedGeolocator, Geolocator, Notifier, PermissionStatus, Place};
pub use error::{Error, Result};
pub use feed::{subscribe, ChatFeed, CommentsFeed, PanicWatcher, ReportsFeed, Subscription};
pub use heatmap::{bucket_reports, HeatBucket, HeatmapStyle};
pub use logging::init_logging;
pub use report::{Category, Comment, Coordinates, Report, ReportDraft, VoteKind};
pub use session::{Auth, Session, SignUpForm, UserProfile};
pub use storage::{SharedStorage, Storage, StorageStats};

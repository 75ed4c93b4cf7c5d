//! Structured event stream.
//!
//! Every user-visible occurrence flows through the event bus as a typed
//! [`Event`]. Sinks render events for their audience: the pipe sink writes
//! one `{"type": ..., "data": {...}}` JSON object per line to a named pipe
//! or socket path (`EVENT_PIPE`), the tracing sink forwards to the `tracing`
//! ecosystem, and tests collect events in memory.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::error::Result;

/// A structured event.
///
/// Step-scoped events are always emitted in the sequence begin → zero or
/// more progress ticks → end.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A surfaced error. Exactly one per surfaced failure.
    Error {
        /// Error message.
        msg: String,
    },
    /// A non-fatal notice; every "skip" decision produces one.
    Notice {
        /// Notice message.
        msg: String,
    },
    /// A fetch began.
    FetchBegin {
        /// URL being fetched.
        url: String,
    },
    /// A fetch completed.
    FetchFinished {
        /// URL that was fetched.
        url: String,
    },
    /// An install step began.
    InstallBegin {
        /// `name-version` of the package.
        pkg: String,
    },
    /// An install step completed.
    InstallFinished {
        /// `name-version` of the package.
        pkg: String,
    },
    /// A deinstall step began.
    DeinstallBegin {
        /// `name-version` of the package.
        pkg: String,
    },
    /// A deinstall step completed.
    DeinstallFinished {
        /// `name-version` of the package.
        pkg: String,
    },
    /// An upgrade step began.
    UpgradeBegin {
        /// Package name.
        pkg: String,
        /// Version being replaced.
        old_version: String,
        /// Version being installed.
        new_version: String,
    },
    /// An upgrade step completed.
    UpgradeFinished {
        /// Package name.
        pkg: String,
        /// Version that was replaced.
        old_version: String,
        /// Version now installed.
        new_version: String,
    },
    /// Payload extraction began.
    ExtractBegin {
        /// `name-version` of the package.
        pkg: String,
    },
    /// Payload extraction completed.
    ExtractFinished {
        /// `name-version` of the package.
        pkg: String,
    },
    /// Conflict pre-check across a plan began.
    IntegrityCheckBegin,
    /// Conflict pre-check completed.
    IntegrityCheckFinished {
        /// Number of conflicts found.
        conflicting: usize,
    },
    /// Two packages claim the same path.
    Conflict {
        /// Conflicting path.
        path: String,
        /// Current owner, `name-version`.
        owner: String,
        /// Claimer, `name-version`.
        claimer: String,
    },
    /// Catalogue rows added during an update.
    UpdateAdd {
        /// Rows processed so far.
        done: usize,
        /// Total rows.
        total: usize,
    },
    /// Catalogue rows removed during an update.
    UpdateRemove {
        /// Rows processed so far.
        done: usize,
        /// Total rows.
        total: usize,
    },
    /// Repository catalogue already current.
    UpToDate {
        /// Repository name.
        repo: String,
    },
    /// Periodic progress during a long operation.
    ProgressTick {
        /// Units done.
        current: u64,
        /// Total units, zero when unknown.
        total: u64,
    },
    /// A locked package blocked (or was forced through) a plan.
    Locked {
        /// `name-version` of the locked package.
        pkg: String,
    },
    /// A removed shared library is still required and nothing provides it.
    AbiBreakage {
        /// Library name.
        lib: String,
        /// Installed package that still requires it.
        needed_by: String,
    },
    /// A yes/no question for the caller.
    QueryYesno {
        /// Question text.
        msg: String,
        /// Default answer.
        default: bool,
    },
    /// A selection question for the caller.
    QuerySelect {
        /// Question text.
        msg: String,
        /// Items to choose from.
        items: Vec<String>,
    },
}

impl Event {
    /// Stable type tag written to the event pipe.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Error { .. } => "ERROR",
            Self::Notice { .. } => "NOTICE",
            Self::FetchBegin { .. } => "INFO_FETCH_BEGIN",
            Self::FetchFinished { .. } => "INFO_FETCH_FINISHED",
            Self::InstallBegin { .. } => "INFO_INSTALL_BEGIN",
            Self::InstallFinished { .. } => "INFO_INSTALL_FINISHED",
            Self::DeinstallBegin { .. } => "INFO_DEINSTALL_BEGIN",
            Self::DeinstallFinished { .. } => "INFO_DEINSTALL_FINISHED",
            Self::UpgradeBegin { .. } => "INFO_UPGRADE_BEGIN",
            Self::UpgradeFinished { .. } => "INFO_UPGRADE_FINISHED",
            Self::ExtractBegin { .. } => "INFO_EXTRACT_BEGIN",
            Self::ExtractFinished { .. } => "INFO_EXTRACT_FINISHED",
            Self::IntegrityCheckBegin => "INFO_INTEGRITYCHECK_BEGIN",
            Self::IntegrityCheckFinished { .. } => "INFO_INTEGRITYCHECK_FINISHED",
            Self::Conflict { .. } => "CONFLICT",
            Self::UpdateAdd { .. } => "INFO_UPDATE_ADD",
            Self::UpdateRemove { .. } => "INFO_UPDATE_REMOVE",
            Self::UpToDate { .. } => "UP_TO_DATE",
            Self::ProgressTick { .. } => "PROGRESS_TICK",
            Self::Locked { .. } => "LOCKED",
            Self::AbiBreakage { .. } => "ABI_BREAKAGE",
            Self::QueryYesno { .. } => "QUERY_YESNO",
            Self::QuerySelect { .. } => "QUERY_SELECT",
        }
    }

    /// What: Render the event as its pipe JSON object.
    ///
    /// Inputs: None
    ///
    /// Output:
    /// - `{"type": <tag>, "data": {...}}` with event-specific data fields.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let data = match self {
            Self::Error { msg } | Self::Notice { msg } => json!({ "msg": msg }),
            Self::FetchBegin { url } | Self::FetchFinished { url } => json!({ "url": url }),
            Self::InstallBegin { pkg }
            | Self::InstallFinished { pkg }
            | Self::DeinstallBegin { pkg }
            | Self::DeinstallFinished { pkg }
            | Self::ExtractBegin { pkg }
            | Self::ExtractFinished { pkg }
            | Self::Locked { pkg } => json!({ "pkg": pkg }),
            Self::UpgradeBegin {
                pkg,
                old_version,
                new_version,
            }
            | Self::UpgradeFinished {
                pkg,
                old_version,
                new_version,
            } => json!({ "pkg": pkg, "old_version": old_version, "new_version": new_version }),
            Self::IntegrityCheckBegin => json!({}),
            Self::IntegrityCheckFinished { conflicting } => json!({ "conflicting": conflicting }),
            Self::Conflict {
                path,
                owner,
                claimer,
            } => json!({ "path": path, "owner": owner, "claimer": claimer }),
            Self::UpdateAdd { done, total } | Self::UpdateRemove { done, total } => {
                json!({ "fetched": done, "total": total })
            }
            Self::UpToDate { repo } => json!({ "repo": repo }),
            Self::ProgressTick { current, total } => {
                json!({ "current": current, "total": total })
            }
            Self::AbiBreakage { lib, needed_by } => {
                json!({ "lib": lib, "needed_by": needed_by })
            }
            Self::QueryYesno { msg, default } => json!({ "msg": msg, "default": default }),
            Self::QuerySelect { msg, items } => json!({ "msg": msg, "items": items }),
        };
        json!({ "type": self.type_name(), "data": data })
    }
}

/// Receives every event emitted through a bus.
pub trait EventSink {
    /// Handle one event. Sinks must not fail the caller; internal errors
    /// are logged and swallowed.
    fn emit(&self, event: &Event);
}

/// Sink writing one JSON object per line to a pipe, socket, or file path.
#[derive(Debug)]
pub struct PipeSink {
    /// Output handle, serialized by a mutex because sinks take `&self`.
    file: Mutex<File>,
}

impl PipeSink {
    /// What: Open the event pipe for appending.
    ///
    /// Inputs:
    /// - `path`: `EVENT_PIPE` path; a fifo, unix socket path pre-bound by
    ///   the consumer, or a plain file.
    ///
    /// Output:
    /// - The sink.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` when the path cannot be opened for writing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for PipeSink {
    fn emit(&self, event: &Event) {
        let line = event.to_json().to_string();
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{line}") {
            tracing::error!(error = %e, "failed to write event pipe");
        }
    }
}

/// Sink forwarding events into the `tracing` ecosystem.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::Error { msg } => tracing::error!(msg = %msg, "event"),
            Event::Notice { msg } => tracing::info!(msg = %msg, "event"),
            other => tracing::debug!(event = other.type_name(), "event"),
        }
    }
}

/// Sink collecting events in memory. Intended for tests.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CollectingSink {
    /// Empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything collected so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &Event) {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
    }
}

/// Fan-out dispatcher over all registered sinks.
#[derive(Default)]
pub struct EventBus {
    sinks: Vec<Box<dyn EventSink>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl EventBus {
    /// Bus with no sinks; events are dropped until one is added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// What: Dispatch one event to every sink in registration order.
    ///
    /// Inputs:
    /// - `event`: Event to dispatch.
    ///
    /// Output: None
    pub fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }

    /// Convenience: emit an `ERROR` event.
    pub fn error(&self, msg: impl Into<String>) {
        self.emit(&Event::Error { msg: msg.into() });
    }

    /// Convenience: emit a `NOTICE` event.
    pub fn notice(&self, msg: impl Into<String>) {
        self.emit(&Event::Notice { msg: msg.into() });
    }
}

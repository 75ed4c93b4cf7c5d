//! Explicit library context.
//!
//! There is no process-wide state: `Context::init` wires configuration,
//! the event bus, and the repository collection into one value that is
//! threaded through every public call, and `Context::shutdown` consumes
//! it. Tests create fresh contexts freely.

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::events::{Event, EventBus, PipeSink, TracingSink};
use crate::repo::RepoCollection;

/// Answers interactive queries on behalf of the caller.
///
/// The CLI installs a responder that talks to the terminal; unattended
/// callers rely on the configured answer policy.
pub trait QueryResponder {
    /// Answer a yes/no question.
    fn yesno(&self, msg: &str, default: bool) -> bool;

    /// Answer a selection question with the chosen index.
    fn select(&self, msg: &str, items: &[String], default: usize) -> usize;
}

/// Library context: configuration, event bus, repositories.
pub struct Context {
    /// Effective configuration.
    pub config: Config,
    events: Arc<EventBus>,
    /// Repository definitions in deterministic order.
    pub repos: RepoCollection,
    responder: Option<Box<dyn QueryResponder>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("repos", &self.repos)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// What: Initialize a context from configuration.
    ///
    /// Inputs:
    /// - `config`: Effective configuration (defaults, options, and
    ///   environment already applied by the caller).
    ///
    /// Output:
    /// - The context, with the tracing sink always attached and the pipe
    ///   sink attached when `EVENT_PIPE` is configured.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` when the event pipe cannot be opened and
    /// `PkgError::Parse` for malformed repository definitions.
    pub fn init(config: Config) -> Result<Self> {
        let mut bus = EventBus::new();
        bus.add_sink(Box::new(TracingSink));
        if let Some(pipe) = &config.event_pipe {
            bus.add_sink(Box::new(PipeSink::open(pipe)?));
        }
        let repos = RepoCollection::load(&config)?;
        tracing::debug!(repos = repos.iter().count(), "context initialized");
        Ok(Self {
            config,
            events: Arc::new(bus),
            repos,
            responder: None,
        })
    }

    /// Install an interactive query responder.
    pub fn set_responder(&mut self, responder: Box<dyn QueryResponder>) {
        self.responder = Some(responder);
    }

    /// Shared handle to the event bus.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// What: Ask the caller a yes/no question.
    ///
    /// Inputs:
    /// - `msg`: Question text.
    /// - `default`: Default answer.
    ///
    /// Output:
    /// - The answer: `true` immediately under `ASSUME_ALWAYS_YES`, the
    ///   responder's answer when installed, otherwise the default (forced
    ///   to yes under `DEFAULT_ALWAYS_YES`).
    #[must_use]
    pub fn ask_yesno(&self, msg: &str, default: bool) -> bool {
        if self.config.assume_always_yes {
            return true;
        }
        let default = default || self.config.default_always_yes;
        self.events.emit(&Event::QueryYesno {
            msg: msg.to_string(),
            default,
        });
        self.responder
            .as_ref()
            .map_or(default, |r| r.yesno(msg, default))
    }

    /// What: Ask the caller to pick one of several items.
    ///
    /// Inputs:
    /// - `msg`: Question text.
    /// - `items`: Choices.
    /// - `default`: Default index.
    ///
    /// Output:
    /// - The chosen index, clamped to the item count.
    #[must_use]
    pub fn ask_select(&self, msg: &str, items: &[String], default: usize) -> usize {
        self.events.emit(&Event::QuerySelect {
            msg: msg.to_string(),
            items: items.to_vec(),
        });
        let chosen = self
            .responder
            .as_ref()
            .map_or(default, |r| r.select(msg, items, default));
        chosen.min(items.len().saturating_sub(1))
    }

    /// What: Shut the context down.
    ///
    /// Inputs: None (consumes the context)
    ///
    /// Output: None
    ///
    /// Details:
    /// - Sinks flush on drop; consuming the value makes the lifecycle
    ///   explicit instead of relying on destructor order.
    pub fn shutdown(self) {
        tracing::debug!("context shut down");
        drop(self);
    }
}

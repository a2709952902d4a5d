//! Run link registry.
//!
//! Maps an execution context key to a FIFO queue of client-visible run links.
//! One context can serially service several client sends; the head of the
//! queue is the run currently being streamed.

use std::collections::{HashMap, VecDeque};

/// Client-visible identity of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLink {
    pub session_key: String,
    pub client_run_id: String,
}

impl RunLink {
    pub fn new(session_key: impl Into<String>, client_run_id: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            client_run_id: client_run_id.into(),
        }
    }
}

/// FIFO queues of run links keyed by execution context.
#[derive(Debug, Default)]
pub struct RunRegistry {
    queues: HashMap<String, VecDeque<RunLink>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a link behind any runs already queued for the context.
    pub fn add(&mut self, context_key: &str, link: RunLink) {
        self.queues
            .entry(context_key.to_string())
            .or_default()
            .push_back(link);
    }

    /// The current (head) link for a context.
    pub fn peek(&self, context_key: &str) -> Option<&RunLink> {
        self.queues.get(context_key).and_then(|q| q.front())
    }

    /// Remove and return the head link. Drops the queue once empty.
    pub fn shift(&mut self, context_key: &str) -> Option<RunLink> {
        let queue = self.queues.get_mut(context_key)?;
        let head = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(context_key);
        }
        head
    }

    /// Remove the first link matching `client_run_id` (and `session_key`,
    /// when given), wherever it sits in the queue.
    pub fn remove(
        &mut self,
        context_key: &str,
        client_run_id: &str,
        session_key: Option<&str>,
    ) -> Option<RunLink> {
        let queue = self.queues.get_mut(context_key)?;
        let pos = queue.iter().position(|link| {
            link.client_run_id == client_run_id
                && session_key.is_none_or(|key| link.session_key == key)
        })?;
        let removed = queue.remove(pos);
        if queue.is_empty() {
            self.queues.remove(context_key);
        }
        removed
    }

    /// Locate a link by client run id across all contexts.
    ///
    /// Returns the context key and whether the link is the queue head.
    pub fn find(&self, client_run_id: &str, session_key: &str) -> Option<(String, bool)> {
        self.queues.iter().find_map(|(context, queue)| {
            queue
                .iter()
                .position(|l| l.client_run_id == client_run_id && l.session_key == session_key)
                .map(|pos| (context.clone(), pos == 0))
        })
    }

    /// All links belonging to a session, as `(context_key, link, is_head)`.
    pub fn links_for_session(&self, session_key: &str) -> Vec<(String, RunLink, bool)> {
        let mut links: Vec<(String, RunLink, bool)> = self
            .queues
            .iter()
            .flat_map(|(context, queue)| {
                queue
                    .iter()
                    .enumerate()
                    .filter(|(_, link)| link.session_key == session_key)
                    .map(|(pos, link)| (context.clone(), link.clone(), pos == 0))
            })
            .collect();
        links.sort_by(|a, b| a.0.cmp(&b.0));
        links
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

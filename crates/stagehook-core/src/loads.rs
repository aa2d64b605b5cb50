//! Per-name guard for asynchronous asset loads
//!
//! At most one load per name is in flight. What happens to a second request
//! depends on [`LoadPolicy`]: it either waits for the running one (only the
//! latest waiting request is kept) or is dropped.

use std::collections::HashMap;

use crate::backend::LoadTicket;
use crate::config::LoadPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Avatar,
    Texture,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub kind: LoadKind,
    pub path: String,
}

impl LoadRequest {
    pub fn avatar(path: &str) -> Self {
        Self {
            kind: LoadKind::Avatar,
            path: path.to_string(),
        }
    }

    pub fn texture(path: &str) -> Self {
        Self {
            kind: LoadKind::Texture,
            path: path.to_string(),
        }
    }
}

/// Outcome of asking the guard for a new load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Start loading now under this ticket
    Start(LoadTicket),
    /// Parked behind the running load
    Queued,
    Rejected,
}

/// A load the guard just closed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    pub name: String,
    pub request: LoadRequest,
    /// Queued request promoted to in flight, to be started by the caller
    pub next: Option<(LoadTicket, LoadRequest)>,
}

#[derive(Debug)]
struct InFlight {
    ticket: LoadTicket,
    request: LoadRequest,
    queued: Option<LoadRequest>,
}

#[derive(Debug)]
pub struct LoadGuard {
    policy: LoadPolicy,
    next_ticket: u64,
    by_name: HashMap<String, InFlight>,
    by_ticket: HashMap<LoadTicket, String>,
}

impl LoadGuard {
    pub fn new(policy: LoadPolicy) -> Self {
        Self {
            policy,
            next_ticket: 1,
            by_name: HashMap::new(),
            by_ticket: HashMap::new(),
        }
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    /// Applies to loads admitted from now on
    pub fn set_policy(&mut self, policy: LoadPolicy) {
        self.policy = policy;
    }

    fn issue(&mut self, name: &str) -> LoadTicket {
        let ticket = LoadTicket(self.next_ticket);
        self.next_ticket += 1;
        self.by_ticket.insert(ticket, name.to_string());
        ticket
    }

    pub fn admit(&mut self, name: &str, request: LoadRequest) -> Admission {
        if let Some(running) = self.by_name.get_mut(name) {
            return match self.policy {
                LoadPolicy::Serialize => {
                    running.queued = Some(request);
                    Admission::Queued
                }
                LoadPolicy::Reject => Admission::Rejected,
            };
        }

        let ticket = self.issue(name);
        self.by_name.insert(
            name.to_string(),
            InFlight {
                ticket,
                request,
                queued: None,
            },
        );
        Admission::Start(ticket)
    }

    /// Close out `ticket`. Returns `None` for tickets the guard never issued
    /// or already closed.
    pub fn complete(&mut self, ticket: LoadTicket) -> Option<Completed> {
        let name = self.by_ticket.remove(&ticket)?;
        let running = self.by_name.remove(&name)?;

        let next = match running.queued {
            Some(queued) => {
                let next_ticket = self.issue(&name);
                self.by_name.insert(
                    name.clone(),
                    InFlight {
                        ticket: next_ticket,
                        request: queued.clone(),
                        queued: None,
                    },
                );
                Some((next_ticket, queued))
            }
            None => None,
        };

        Some(Completed {
            name,
            request: running.request,
            next,
        })
    }

    /// Name a live ticket belongs to
    pub fn name_of(&self, ticket: LoadTicket) -> Option<&str> {
        self.by_ticket.get(&ticket).map(|name| name.as_str())
    }

    pub fn in_flight(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn ticket_for(&self, name: &str) -> Option<LoadTicket> {
        self.by_name.get(name).map(|running| running.ticket)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Forget every load; late completions become stale
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_ticket.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_queues_latest_request() {
        let mut guard = LoadGuard::new(LoadPolicy::Serialize);

        let first = match guard.admit("vrm", LoadRequest::avatar("a.vrm")) {
            Admission::Start(ticket) => ticket,
            other => panic!("unexpected admission {:?}", other),
        };
        assert_eq!(guard.admit("vrm", LoadRequest::avatar("b.vrm")), Admission::Queued);
        assert_eq!(guard.admit("vrm", LoadRequest::avatar("c.vrm")), Admission::Queued);

        let done = guard.complete(first).unwrap();
        assert_eq!(done.name, "vrm");
        assert_eq!(done.request.path, "a.vrm");
        let (next_ticket, next) = done.next.unwrap();
        assert_eq!(next.path, "c.vrm");
        assert_eq!(guard.ticket_for("vrm"), Some(next_ticket));

        let done = guard.complete(next_ticket).unwrap();
        assert!(done.next.is_none());
        assert!(!guard.in_flight("vrm"));
    }

    #[test]
    fn test_reject_policy() {
        let mut guard = LoadGuard::new(LoadPolicy::Reject);
        assert!(matches!(
            guard.admit("tex", LoadRequest::texture("a.png")),
            Admission::Start(_)
        ));
        assert_eq!(
            guard.admit("tex", LoadRequest::texture("b.png")),
            Admission::Rejected
        );
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_names_are_independent() {
        let mut guard = LoadGuard::new(LoadPolicy::Serialize);
        assert!(matches!(guard.admit("a", LoadRequest::avatar("a.vrm")), Admission::Start(_)));
        assert!(matches!(guard.admit("b", LoadRequest::avatar("b.vrm")), Admission::Start(_)));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_stale_ticket() {
        let mut guard = LoadGuard::new(LoadPolicy::Serialize);
        let ticket = match guard.admit("vrm", LoadRequest::avatar("a.vrm")) {
            Admission::Start(ticket) => ticket,
            other => panic!("unexpected admission {:?}", other),
        };
        guard.clear();
        assert!(guard.complete(ticket).is_none());
        assert!(guard.complete(LoadTicket(999)).is_none());
    }
}

//! Pages the worker can control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;
use url::Url;

use crate::worker::ServiceWorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    pub client_type: ClientType,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    pub fn is_controlled_by(&self, worker: ServiceWorkerId) -> bool {
        self.controller == Some(worker)
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened page. Returns its id.
    pub fn open(&mut self, url: Url, client_type: ClientType) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        self.clients.insert(
            id.clone(),
            Client {
                id: id.clone(),
                url,
                client_type,
                controller: None,
            },
        );
        id
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Clients under `scope`, optionally only those `worker` controls.
    pub fn match_all(&self, scope: &Url, controlled_by: Option<ServiceWorkerId>) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| c.url.as_str().starts_with(scope.as_str()))
            .filter(|c| controlled_by.map_or(true, |w| c.is_controlled_by(w)))
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Make `worker` the controller of every client under `scope`.
    ///
    /// Returns the ids whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId, scope: &Url) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.url.as_str().starts_with(scope.as_str()))
            .filter(|c| !c.is_controlled_by(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        debug!(?worker, scope = %scope, claimed = changed.len(), "Claimed clients");
        changed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_clients() {
        let mut clients = Clients::new();

        let id = clients.open(url("https://example.com/"), ClientType::Window);
        let client = clients.get(&id).unwrap();
        assert_eq!(client.client_type, ClientType::Window);
        assert!(client.controller.is_none());

        assert!(clients.remove(&id).is_some());
        assert!(clients.is_empty());
    }

    #[test]
    fn test_claim_in_scope_only() {
        let mut clients = Clients::new();
        let home = clients.open(url("https://example.com/"), ClientType::Window);
        let other = clients.open(url("https://other.example/"), ClientType::Window);
        let worker = ServiceWorkerId::new();

        let claimed = clients.claim(worker, &url("https://example.com/"));

        assert_eq!(claimed, vec![home.clone()]);
        assert!(clients.get(&home).unwrap().is_controlled_by(worker));
        assert!(clients.get(&other).unwrap().controller.is_none());
    }

    #[test]
    fn test_claim_twice_changes_nothing() {
        let mut clients = Clients::new();
        clients.open(url("https://example.com/about"), ClientType::Window);
        let worker = ServiceWorkerId::new();
        let scope = url("https://example.com/");

        assert_eq!(clients.claim(worker, &scope).len(), 1);
        assert!(clients.claim(worker, &scope).is_empty());
        assert_eq!(clients.match_all(&scope, Some(worker)).len(), 1);
    }

    #[test]
    fn test_new_worker_takes_over() {
        let mut clients = Clients::new();
        clients.open(url("https://example.com/"), ClientType::Window);
        let scope = url("https://example.com/");
        let old = ServiceWorkerId::new();
        let new = ServiceWorkerId::new();

        clients.claim(old, &scope);
        clients.claim(new, &scope);

        assert!(clients.match_all(&scope, Some(old)).is_empty());
        assert_eq!(clients.match_all(&scope, Some(new)).len(), 1);
    }
}

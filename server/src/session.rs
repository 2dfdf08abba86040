//! Single-client session gate.
//!
//! The broker serves exactly one experiment client at a time; a second
//! connection would race the first for hardware. The gate admits the first
//! socket and refuses the rest until that socket disconnects.

use tokio::sync::RwLock;

#[derive(Default)]
pub struct SessionGate {
    current: RwLock<Option<String>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `sid` if no session is active (or if `sid` already holds it).
    pub async fn try_connect(&self, sid: &str) -> bool {
        let mut current = self.current.write().await;
        match current.as_deref() {
            None => {
                *current = Some(sid.to_string());
                true
            }
            Some(active) => active == sid,
        }
    }

    /// Release the session if `sid` holds it. Returns whether `sid` was
    /// the active client.
    pub async fn disconnect(&self, sid: &str) -> bool {
        let mut current = self.current.write().await;
        if current.as_deref() == Some(sid) {
            *current = None;
            true
        } else {
            false
        }
    }

    pub async fn current(&self) -> Option<String> {
        self.current.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_one_client_at_a_time() {
        let gate = SessionGate::new();
        assert!(gate.try_connect("x").await);
        assert!(!gate.try_connect("y").await);
        assert_eq!(gate.current().await.as_deref(), Some("x"));

        // The active client reconnecting is not a new session.
        assert!(gate.try_connect("x").await);
    }

    #[tokio::test]
    async fn releases_only_for_the_active_client() {
        let gate = SessionGate::new();
        assert!(gate.try_connect("x").await);
        assert!(!gate.disconnect("y").await);
        assert_eq!(gate.current().await.as_deref(), Some("x"));

        assert!(gate.disconnect("x").await);
        assert!(gate.try_connect("y").await);
    }
}

//! SessionManager: an in-memory, process-lifetime table of connection
//! sessions keyed by a random nonzero 32-bit id.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: u32,
    pub uid: Option<String>,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<u32, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Draws a uniform random nonzero 32-bit id, retrying on collision.
    pub fn create_session(&self) -> u32 {
        let mut sessions = self.sessions.lock();
        let mut rng = rand::rng();
        let id = loop {
            let candidate: u32 = rng.random_range(1..=u32::MAX);
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(
            id,
            Session {
                id,
                uid: None,
            },
        );
        id
    }

    pub fn get_session(&self, id: u32) -> Option<Session> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Binds authentication to a session. No-op (returns `false`) if the
    /// session does not exist.
    pub fn replace_uid(&self, id: u32, uid: String) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&id) {
            Some(session) => {
                session.uid = Some(uid);
                true
            }
            None => false,
        }
    }

    pub fn delete_session(&self, id: u32) {
        self.sessions.lock().remove(&id);
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use parley_shared::protocol::ServerEvent;
use parley_shared::types::UserId;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broadcaster::Broadcaster;
use crate::db::DbHandle;
use crate::error::ServerError;

/// Tracks which users have at least one live connection.
///
/// A user goes online with their first announced connection and offline when
/// the last one closes. Only those two transitions touch the persisted flag
/// and notify other connections. The count lock is held across the store
/// write so transitions for one user are applied in order.
#[derive(Clone)]
pub struct PresenceRegistry {
    connections: Arc<Mutex<HashMap<UserId, usize>>>,
    db: DbHandle,
    broadcaster: Broadcaster,
}

impl PresenceRegistry {
    pub fn new(db: DbHandle, broadcaster: Broadcaster) -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            db,
            broadcaster,
        }
    }

    /// Count one more connection for `user`. Returns `true` on the offline to
    /// online transition.
    pub async fn mark_online(&self, user: UserId) -> Result<bool, ServerError> {
        let mut connections = self.connections.lock().await;
        let count = connections.entry(user).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Ok(false);
        }

        let known = self
            .db
            .run("set_user_online", move |db| db.set_user_online(user, true))
            .await;
        match known {
            Ok(true) => {}
            Ok(false) => {
                connections.remove(&user);
                return Err(ServerError::NotFound("User not found!".to_string()));
            }
            Err(e) => {
                connections.remove(&user);
                // The write may still land after a timeout; queue the reverse.
                if let Err(undo) = self
                    .db
                    .run("set_user_online", move |db| db.set_user_online(user, false))
                    .await
                {
                    warn!(user = %user, error = %undo, "Failed to reset online flag");
                }
                return Err(e);
            }
        }

        info!(user = %user, "User online");
        self.broadcaster
            .broadcast_all(
                ServerEvent::PresenceChanged {
                    user_id: user,
                    online: true,
                },
                user,
            )
            .await;
        Ok(true)
    }

    /// Count one connection less for `user`. Returns `true` on the online to
    /// offline transition.
    pub async fn mark_offline(&self, user: UserId) -> Result<bool, ServerError> {
        let mut connections = self.connections.lock().await;
        let Some(count) = connections.get_mut(&user) else {
            return Ok(false);
        };
        *count -= 1;
        if *count > 0 {
            return Ok(false);
        }
        connections.remove(&user);

        self.db
            .run("set_user_online", move |db| db.set_user_online(user, false))
            .await?;

        info!(user = %user, "User offline");
        self.broadcaster
            .broadcast_all(
                ServerEvent::PresenceChanged {
                    user_id: user,
                    online: false,
                },
                user,
            )
            .await;
        Ok(true)
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.connections.lock().await.contains_key(&user)
    }
}

//! The authoritative presence registry.
//!
//! An explicit insertion-order vector sits alongside the lookup map, since
//! `iterate()` must yield a deterministic, registration-order roster — a
//! guarantee a bare `HashMap` cannot make on its own.

use std::{collections::HashMap, time::Instant};

use bytes::Bytes;

use crate::{codec::Status, error::GatewayError};

/// A connected user's presence record.
#[derive(Debug, Clone)]
pub struct User {
    pub username: Bytes,
    pub status: Status,
    pub last_action: Instant,
}

#[derive(Default)]
pub struct PresenceRegistry {
    order: Vec<Bytes>,
    users: HashMap<Bytes, User>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new user as `Active`. Fails with `DuplicateName` if the
    /// username is already registered.
    pub fn register(&mut self, username: Bytes) -> Result<(), GatewayError> {
        if self.users.contains_key(username.as_ref()) {
            return Err(GatewayError::DuplicateName);
        }
        self.order.push(username.clone());
        self.users.insert(username.clone(), User {
            username,
            status: Status::Active,
            last_action: Instant::now(),
        });
        Ok(())
    }

    pub fn lookup(&self, name: &[u8]) -> Option<&User> {
        self.users.get(name)
    }

    pub fn remove(&mut self, name: &[u8]) -> Option<User> {
        self.order.retain(|n| n.as_ref() != name);
        self.users.remove(name)
    }

    /// Users in registration order — the order LIST_USERS responses use.
    pub fn iterate(&self) -> impl Iterator<Item = &User> {
        self.order.iter().filter_map(move |name| self.users.get(name))
    }

    /// Stamp `last_action = now`, implicitly promoting an `Inactive` user to
    /// `Active`. Returns `true` if a promotion happened, `false` if the user
    /// was just touched, `None` if the user isn't registered.
    pub fn touch_and_maybe_promote(&mut self, name: &[u8]) -> Option<bool> {
        let user = self.users.get_mut(name)?;
        user.last_action = Instant::now();
        if user.status == Status::Inactive {
            user.status = Status::Active;
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Apply a direct client-requested status change: only Active↔Busy is
    /// accepted; a no-op or any other transition is `InvalidStatus`.
    pub fn request_status_change(&mut self, name: &[u8], requested: Status) -> Result<(), GatewayError> {
        let user = self.users.get_mut(name).ok_or(GatewayError::UserNotFound)?;
        let allowed = matches!(
            (user.status, requested),
            (Status::Active, Status::Busy) | (Status::Busy, Status::Active)
        );
        if !allowed {
            return Err(GatewayError::InvalidStatus);
        }
        user.status = requested;
        Ok(())
    }

    /// Demote every `Active`/`Busy` user idle for at least `threshold` to
    /// `Inactive`. Returns the usernames demoted, for the caller to publish
    /// `CHANGED_STATUS` for.
    pub fn demote_idle(&mut self, threshold: std::time::Duration) -> Vec<Bytes> {
        let now = Instant::now();
        let mut demoted = Vec::new();
        for user in self.users.values_mut() {
            if matches!(user.status, Status::Active | Status::Busy)
                && now.duration_since(user.last_action) >= threshold
            {
                user.status = Status::Inactive;
                demoted.push(user.username.clone());
            }
        }
        demoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_duplicate_name() {
        let mut reg = PresenceRegistry::new();
        reg.register(Bytes::from_static(b"Flavio")).unwrap();
        assert_eq!(
            reg.register(Bytes::from_static(b"Flavio")),
            Err(GatewayError::DuplicateName)
        );
    }

    #[test]
    fn iterate_preserves_registration_order() {
        let mut reg = PresenceRegistry::new();
        for name in ["Flavio", "Jose", "Ana"] {
            reg.register(Bytes::copy_from_slice(name.as_bytes())).unwrap();
        }
        let names: Vec<&[u8]> = reg.iterate().map(|u| u.username.as_ref()).collect();
        assert_eq!(names, vec![b"Flavio".as_ref(), b"Jose".as_ref(), b"Ana".as_ref()]);
    }

    #[test]
    fn remove_preserves_order_of_remaining_users() {
        let mut reg = PresenceRegistry::new();
        for name in ["Flavio", "Jose", "Ana"] {
            reg.register(Bytes::copy_from_slice(name.as_bytes())).unwrap();
        }
        reg.remove(b"Jose");
        let names: Vec<&[u8]> = reg.iterate().map(|u| u.username.as_ref()).collect();
        assert_eq!(names, vec![b"Flavio".as_ref(), b"Ana".as_ref()]);
    }

    #[test]
    fn status_change_accepts_only_active_busy_toggle() {
        let mut reg = PresenceRegistry::new();
        reg.register(Bytes::from_static(b"Flavio")).unwrap();

        reg.request_status_change(b"Flavio", Status::Busy).unwrap();
        assert_eq!(reg.lookup(b"Flavio").unwrap().status, Status::Busy);

        // No-op transition (already Busy) is InvalidStatus.
        assert_eq!(
            reg.request_status_change(b"Flavio", Status::Busy),
            Err(GatewayError::InvalidStatus)
        );

        // Disconnected/Inactive are not client-reachable targets.
        assert_eq!(
            reg.request_status_change(b"Flavio", Status::Inactive),
            Err(GatewayError::InvalidStatus)
        );
    }

    #[test]
    fn touch_promotes_inactive_to_active() {
        let mut reg = PresenceRegistry::new();
        reg.register(Bytes::from_static(b"Flavio")).unwrap();
        reg.demote_idle(std::time::Duration::from_secs(0));
        assert_eq!(reg.lookup(b"Flavio").unwrap().status, Status::Inactive);

        let promoted = reg.touch_and_maybe_promote(b"Flavio");
        assert_eq!(promoted, Some(true));
        assert_eq!(reg.lookup(b"Flavio").unwrap().status, Status::Active);
    }

    #[test]
    fn demote_idle_only_affects_active_and_busy() {
        let mut reg = PresenceRegistry::new();
        reg.register(Bytes::from_static(b"Flavio")).unwrap();
        let demoted = reg.demote_idle(std::time::Duration::from_secs(0));
        assert_eq!(demoted, vec![Bytes::from_static(b"Flavio")]);
        // A second scan finds nothing new to demote (already Inactive).
        assert!(reg.demote_idle(std::time::Duration::from_secs(0)).is_empty());
    }
}

//! Last-Write-Wins conflict resolution.

/// Conflict resolution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Accept the remote operation (remote is newer or equal).
    AcceptRemote,
    /// Keep the local entry (local is strictly newer).
    KeepLocal,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve an incoming create/update against the local copy.
    ///
    /// LWW rules:
    /// 1. No local copy: accept.
    /// 2. Local `updated_at` <= remote `updated_at`: accept (ties go to remote).
    /// 3. Otherwise keep local.
    pub fn resolve_upsert(local_updated_at: Option<i64>, remote_updated_at: i64) -> Resolution {
        match local_updated_at {
            Some(local) if local > remote_updated_at => Resolution::KeepLocal,
            _ => Resolution::AcceptRemote,
        }
    }

    /// Resolve an incoming delete stamped `op_timestamp`.
    ///
    /// A local edit strictly newer than the delete survives it.
    pub fn resolve_delete(local_updated_at: Option<i64>, op_timestamp: i64) -> Resolution {
        Self::resolve_upsert(local_updated_at, op_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_local_accepts_remote() {
        assert_eq!(
            ConflictResolver::resolve_upsert(None, 1000),
            Resolution::AcceptRemote
        );
        assert_eq!(
            ConflictResolver::resolve_delete(None, 1000),
            Resolution::AcceptRemote
        );
    }

    #[test]
    fn newer_remote_wins() {
        assert_eq!(
            ConflictResolver::resolve_upsert(Some(1000), 2000),
            Resolution::AcceptRemote
        );
    }

    #[test]
    fn newer_local_is_kept() {
        assert_eq!(
            ConflictResolver::resolve_upsert(Some(2000), 1000),
            Resolution::KeepLocal
        );
    }

    #[test]
    fn tie_goes_to_remote() {
        assert_eq!(
            ConflictResolver::resolve_upsert(Some(1000), 1000),
            Resolution::AcceptRemote
        );
        assert_eq!(
            ConflictResolver::resolve_delete(Some(1000), 1000),
            Resolution::AcceptRemote
        );
    }

    #[test]
    fn local_edit_after_delete_survives() {
        assert_eq!(
            ConflictResolver::resolve_delete(Some(5000), 4999),
            Resolution::KeepLocal
        );
    }

    #[test]
    fn delete_after_local_edit_wins() {
        assert_eq!(
            ConflictResolver::resolve_delete(Some(4999), 5000),
            Resolution::AcceptRemote
        );
    }
}

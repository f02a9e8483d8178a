use std::sync::Arc;

use tracing::debug;

use super::{LockArtifact, LockAttempt, LockToken, ReadLockStrategy};
use crate::config::{ReadLockConfig, ReadLockKind};
use crate::error::EngineResult;
use crate::idempotent::IdempotentRepository;
use crate::model::CandidateEntry;

/// Claims a file by inserting its absolute path into a repository.
///
/// Consumers sharing the repository (for example several endpoints on the
/// same directory inside one process) exclude each other without touching
/// the filesystem.
pub struct IdempotentReadLock {
    config: ReadLockConfig,
    repository: Arc<dyn IdempotentRepository>,
}

impl std::fmt::Debug for IdempotentReadLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentReadLock")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IdempotentReadLock {
    pub fn new(config: ReadLockConfig, repository: Arc<dyn IdempotentRepository>) -> Self {
        Self { config, repository }
    }
}

impl ReadLockStrategy for IdempotentReadLock {
    fn kind(&self) -> ReadLockKind {
        ReadLockKind::Idempotent
    }

    fn acquire(&self, entry: &CandidateEntry) -> EngineResult<LockAttempt> {
        let key = entry.absolute_path.to_string_lossy().into_owned();
        if !self.repository.add(&key) {
            debug!(key = %key, "key already claimed, lock denied");
            return Ok(LockAttempt::Denied);
        }
        let mut token = LockToken::new(&entry.absolute_path);
        token.push(LockArtifact::RepositoryKey {
            repository: Arc::clone(&self.repository),
            key,
            remove_on_commit: self.config.remove_on_commit,
            remove_on_rollback: self.config.remove_on_rollback,
        });
        Ok(LockAttempt::Acquired(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotent::MemoryIdempotentRepository;
    use crate::model::tests::entry;
    use crate::read_lock::Release;
    use std::path::Path;

    fn lock(repository: &Arc<MemoryIdempotentRepository>) -> IdempotentReadLock {
        IdempotentReadLock::new(
            ReadLockConfig {
                kind: ReadLockKind::Idempotent,
                ..Default::default()
            },
            Arc::clone(repository) as Arc<dyn IdempotentRepository>,
        )
    }

    #[test]
    fn test_shared_repository_excludes_second_consumer() {
        let repository = Arc::new(MemoryIdempotentRepository::default());
        let first = lock(&repository);
        let second = lock(&repository);
        let candidate = entry(Path::new("/in"), "a.txt", 1);

        let token = match first.acquire(&candidate).expect("acquire") {
            LockAttempt::Acquired(token) => token,
            LockAttempt::Denied => panic!("first consumer denied"),
        };
        assert!(matches!(
            second.acquire(&candidate).expect("acquire"),
            LockAttempt::Denied
        ));

        token.release(Release::Rollback).expect("release");
        assert!(!repository.contains("/in/a.txt"));
    }

    #[test]
    fn test_commit_keeps_key_by_default() {
        let repository = Arc::new(MemoryIdempotentRepository::default());
        let candidate = entry(Path::new("/in"), "a.txt", 1);

        match lock(&repository).acquire(&candidate).expect("acquire") {
            LockAttempt::Acquired(token) => token.release(Release::Commit).expect("release"),
            LockAttempt::Denied => panic!("denied"),
        }
        assert!(repository.contains("/in/a.txt"));
    }
}

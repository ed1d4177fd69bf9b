//! Server state shared by all requests
//!
//! Holds the gateway and configuration. When a state file is configured,
//! every request that needs the gateway runs as one transaction against it:
//! take the file lock, load, handle the request, save (unless the request
//! was read-only), release. Runtimes that spin up a fresh instance per
//! request, as `wasmtime serve` does, therefore still see every join to a
//! passkey one after another.

use crate::config::Config;
use crate::error::StateError;
use crate::gateway::{Gateway, GatewayState};
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// How long to wait for another instance to release the state file
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const LOCK_RETRY: Duration = Duration::from_millis(5);

/// Marker locks older than this were left behind by a crashed instance
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// What a request needs from the persisted gateway state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAccess {
    /// Never touches the gateway
    Stateless,
    /// Reads the gateway; changes are not written back
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone)]
pub struct ServerState {
    gateway: Gateway,
    config: Arc<Config>,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        Self {
            gateway: Gateway::from_config(&config),
            config: Arc::new(config),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `request` with the gateway synchronized to the state file
    ///
    /// Without a configured state file the request simply runs against the
    /// in-memory gateway.
    pub async fn with_store<F: Future>(
        &self,
        access: StoreAccess,
        request: F,
    ) -> Result<F::Output, StateError> {
        let Some(path) = self.config.state_file.as_deref() else {
            return Ok(request.await);
        };
        if access == StoreAccess::Stateless {
            return Ok(request.await);
        }

        let lock_path = with_suffix(path, ".lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        let mut file_lock = fd_lock::RwLock::new(lock_file);
        let _guard = StoreGuard::acquire(&mut file_lock, &lock_path, access)?;

        self.load(path)?;
        let output = request.await;
        if access == StoreAccess::ReadWrite {
            self.save(path)?;
        }
        Ok(output)
    }

    /// Replace the gateway state with the contents of the state file
    fn load(&self, path: &Path) -> Result<(), StateError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(snapshot) => self.gateway.restore(snapshot),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable state file");
                self.gateway.restore(GatewayState::default());
            }
        }
        trace!(path = %path.display(), "loaded state");
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_string(&self.gateway.snapshot())?;
        std::fs::write(path, json)?;
        trace!(path = %path.display(), "saved state");
        Ok(())
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Lock held for the duration of one request
enum StoreGuard<'a> {
    Shared {
        _guard: fd_lock::RwLockReadGuard<'a, File>,
    },
    Exclusive {
        _guard: fd_lock::RwLockWriteGuard<'a, File>,
    },
    Marker {
        _guard: MarkerLock,
    },
}

impl<'a> StoreGuard<'a> {
    fn acquire(
        file_lock: &'a mut fd_lock::RwLock<File>,
        lock_path: &Path,
        access: StoreAccess,
    ) -> Result<Self, StateError> {
        let locked = match access {
            StoreAccess::ReadOnly => file_lock.read().map(|_guard| StoreGuard::Shared { _guard }),
            _ => file_lock.write().map(|_guard| StoreGuard::Exclusive { _guard }),
        };
        match locked {
            Ok(guard) => Ok(guard),
            // WASI has no advisory file locks
            Err(e) if e.kind() == ErrorKind::Unsupported => {
                let marker = with_suffix(lock_path, ".held");
                Ok(StoreGuard::Marker {
                    _guard: MarkerLock::acquire(marker, LOCK_TIMEOUT)?,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Exclusive lock held by owning a marker file created with `create_new`
#[derive(Debug)]
struct MarkerLock {
    path: PathBuf,
}

impl MarkerLock {
    fn acquire(path: PathBuf, timeout: Duration) -> Result<Self, StateError> {
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path) && std::fs::remove_file(&path).is_ok() {
                        warn!(path = %path.display(), "removed stale state lock");
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StateError::LockTimeout);
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for MarkerLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GatewayError, Rejection};
    use crate::protocol::{JoinRoom, Passkey};
    use crate::session::Role;
    use std::time::SystemTime;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rendezvous-{label}-{}.json", uuid::Uuid::new_v4()))
    }

    fn shared_config(path: &Path) -> Config {
        Config {
            state_file: Some(path.to_path_buf()),
            ..Config::default()
        }
    }

    fn join(passkey: &str) -> JoinRoom {
        JoinRoom {
            passkey: Some(passkey.into()),
            ..JoinRoom::default()
        }
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(with_suffix(path, ".lock"));
    }

    #[tokio::test]
    async fn instances_sharing_a_file_see_each_others_joins() {
        let path = temp_path("sequential");
        let first = ServerState::new(shared_config(&path));
        let second = ServerState::new(shared_config(&path));

        let (alice, alice_role) = first
            .with_store(StoreAccess::ReadWrite, async {
                let conn = first.gateway().connect();
                (conn, first.gateway().handle_join(conn, join("ABC123")))
            })
            .await
            .unwrap();
        let (bob, bob_role) = second
            .with_store(StoreAccess::ReadWrite, async {
                let conn = second.gateway().connect();
                (conn, second.gateway().handle_join(conn, join("ABC123")))
            })
            .await
            .unwrap();

        assert_eq!(alice_role, Ok(Role::Host));
        assert_eq!(bob_role, Ok(Role::Guest));

        let (size, both_connected) = first
            .with_store(StoreAccess::ReadOnly, async {
                (
                    first.gateway().session_size(&Passkey::from("ABC123")),
                    first.gateway().is_connected(alice) && first.gateway().is_connected(bob),
                )
            })
            .await
            .unwrap();
        cleanup(&path);

        assert_eq!(size, Some(2));
        assert!(both_connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_instances_admit_one_host_and_one_guest() {
        let path = temp_path("concurrent");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let state = ServerState::new(shared_config(&path));
                tokio::spawn(async move {
                    state
                        .with_store(StoreAccess::ReadWrite, async {
                            let conn = state.gateway().connect();
                            state.gateway().handle_join(conn, join("ABC123"))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut roles = Vec::new();
        for task in tasks {
            roles.push(task.await.unwrap());
        }

        let reader = ServerState::new(shared_config(&path));
        let status = reader
            .with_store(StoreAccess::ReadOnly, async { reader.gateway().status() })
            .await
            .unwrap();
        let size = reader.gateway().session_size(&Passkey::from("ABC123"));
        cleanup(&path);

        let count = |wanted: &Result<Role, GatewayError>| roles.iter().filter(|r| *r == wanted).count();
        assert_eq!(count(&Ok(Role::Host)), 1);
        assert_eq!(count(&Ok(Role::Guest)), 1);
        assert_eq!(count(&Err(GatewayError::Rejected(Rejection::RoomFull))), 6);
        assert_eq!(size, Some(2));
        assert_eq!(status.connections, 8);
    }

    #[tokio::test]
    async fn read_only_requests_are_not_written_back() {
        let path = temp_path("read-only");
        let state = ServerState::new(shared_config(&path));

        state
            .with_store(StoreAccess::ReadOnly, async { state.gateway().connect() })
            .await
            .unwrap();

        let fresh = ServerState::new(shared_config(&path));
        let connections = fresh
            .with_store(StoreAccess::ReadOnly, async { fresh.gateway().status().connections })
            .await
            .unwrap();
        cleanup(&path);

        assert_eq!(connections, 0);
    }

    #[tokio::test]
    async fn unreadable_state_file_is_discarded() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "not json").unwrap();
        let state = ServerState::new(shared_config(&path));
        state.gateway().connect();

        let connections = state
            .with_store(StoreAccess::ReadOnly, async { state.gateway().status().connections })
            .await
            .unwrap();
        cleanup(&path);

        assert_eq!(connections, 0);
    }

    #[tokio::test]
    async fn without_state_file_nothing_is_written() {
        let state = ServerState::default();
        state
            .with_store(StoreAccess::ReadWrite, async { state.gateway().connect() })
            .await
            .unwrap();
        assert_eq!(state.gateway().status().connections, 1);
    }

    #[test]
    fn marker_lock_is_exclusive_until_dropped() {
        let path = temp_path("marker");
        let held = MarkerLock::acquire(path.clone(), LOCK_TIMEOUT).unwrap();

        assert!(matches!(
            MarkerLock::acquire(path.clone(), Duration::from_millis(20)),
            Err(StateError::LockTimeout)
        ));

        drop(held);
        assert!(!path.exists());
        let again = MarkerLock::acquire(path.clone(), Duration::from_millis(20));
        assert!(again.is_ok());
    }

    #[test]
    fn stale_marker_lock_is_taken_over() {
        let path = temp_path("stale");
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(120))
            .unwrap();
        drop(file);

        let lock = MarkerLock::acquire(path.clone(), Duration::from_millis(20));
        assert!(lock.is_ok());
    }
}

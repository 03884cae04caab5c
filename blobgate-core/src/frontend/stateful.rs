//! The stateful dispatcher: the stateless walk plus an authoritative index.
//!
//! Every successful write records which backend alias took the blob and the
//! bearer it belongs to. Reads consult the index first, enforce the bearer,
//! and then ask exactly the backend the index names.

use std::sync::Arc;

use crate::backend::{BackendSocket, StoredObject};
use crate::error::{GateError, Result};
use crate::frontend::index::{IndexConfig, IndexEntry, ObjectIndex};
use crate::frontend::stateless::{StatelessFrontend, WriteOutcome};
use crate::promise::{Promise, ReadyCell};

#[derive(Debug, Clone)]
pub struct StatefulFrontendConfig {
    /// Index store location and table name.
    pub index: IndexConfig,
    /// One alias per socket, in socket order. The alias is the stable name
    /// recorded in the index.
    pub aliases: Vec<String>,
}

pub struct StatefulFrontend {
    inner: Arc<StatelessFrontend>,
    index: Arc<ObjectIndex>,
    aliases: Arc<Vec<String>>,
    ready: ReadyCell,
}

impl StatefulFrontend {
    /// Fails when the alias list does not line up with the socket list.
    pub fn new(
        sockets: Vec<Arc<dyn BackendSocket>>,
        config: StatefulFrontendConfig,
    ) -> Result<Self> {
        if config.aliases.len() != sockets.len() {
            return Err(GateError::Config(format!(
                "{} backend aliases configured for {} sockets",
                config.aliases.len(),
                sockets.len()
            )));
        }
        for (position, alias) in config.aliases.iter().enumerate() {
            if alias.is_empty() {
                return Err(GateError::Config(format!(
                    "backend alias at position {position} is empty"
                )));
            }
            if config.aliases[..position].contains(alias) {
                return Err(GateError::Config(format!(
                    "duplicate backend alias: {alias}"
                )));
            }
        }

        Ok(Self {
            inner: Arc::new(StatelessFrontend::new(sockets)),
            index: Arc::new(ObjectIndex::new(config.index)),
            aliases: Arc::new(config.aliases),
            ready: ReadyCell::new(),
        })
    }

    pub fn is_ready(&self) -> Promise<bool> {
        self.ready.current()
    }

    /// Open the index store, then bring up the backend fleet.
    pub fn init(&self) -> Promise<bool> {
        let ready = self.ready.replace();
        let index = Arc::clone(&self.index);
        let inner = Arc::clone(&self.inner);
        let cell = ready.clone();
        tokio::spawn(async move {
            if let Err(reason) = index.init() {
                cell.reject(reason);
                return;
            }
            match inner.init().wait().await {
                Ok(_) => cell.resolve(true),
                Err(reason) => cell.reject(reason),
            }
        });
        ready
    }

    /// Store a blob for `bearer` (absent means public). An id already in
    /// the index, wherever its blob lives, rejects the write before any
    /// backend is consulted. The index entry is the last mutation; if it
    /// cannot be committed after the blob landed, the error is surfaced and
    /// the blob stays orphaned on its backend.
    pub fn write_object(
        &self,
        id: &str,
        data: &str,
        bearer: Option<&str>,
    ) -> Promise<WriteOutcome> {
        let index = Arc::clone(&self.index);
        let inner = Arc::clone(&self.inner);
        let aliases = Arc::clone(&self.aliases);
        let id = id.to_string();
        let data = data.to_string();
        let bearer = bearer.unwrap_or("").to_string();

        Promise::spawn(async move {
            if id.is_empty() {
                return Ok(WriteOutcome::InvalidPayload);
            }
            if index.get(&id)?.is_some() {
                tracing::debug!("write for {} rejected: id already indexed", id);
                return Ok(WriteOutcome::Rejected);
            }

            let outcome = inner.write_object(&id, &data, None).wait().await?;
            if let WriteOutcome::Stored { index: chosen, .. } = &outcome {
                let entry = IndexEntry {
                    id: id.clone(),
                    backend: aliases[*chosen].clone(),
                    bearer,
                };
                if let Err(reason) = index.insert(&entry) {
                    tracing::error!(
                        "blob {} landed on {} but the index entry failed: {}",
                        id,
                        entry.backend,
                        reason
                    );
                    return Err(reason);
                }
            }
            Ok(outcome)
        })
    }

    /// Resolve an id through the index: `None` when unindexed, an
    /// authorization error when the stored bearer is non-empty and differs
    /// from the caller's, and otherwise a read against the single backend
    /// the index names.
    pub fn read_object(&self, id: &str, bearer: Option<&str>) -> Promise<Option<StoredObject>> {
        let index = Arc::clone(&self.index);
        let inner = Arc::clone(&self.inner);
        let aliases = Arc::clone(&self.aliases);
        let id = id.to_string();
        let bearer = bearer.unwrap_or("").to_string();

        Promise::spawn(async move {
            let Some(entry) = index.get(&id)? else {
                return Ok(None);
            };
            if !entry.bearer.is_empty() && entry.bearer != bearer {
                return Err(GateError::Unauthorized(id));
            }

            let Some(socket_index) = aliases.iter().position(|alias| *alias == entry.backend)
            else {
                return Err(GateError::Internal(format!(
                    "index names backend '{}' which is not attached",
                    entry.backend
                )));
            };
            inner.read_object(&id, Some(vec![socket_index])).wait().await
        })
    }

    /// Test affordance: remove a blob from its recorded backend and drop
    /// the index entry.
    pub fn del_object(&self, id: &str) -> Promise<bool> {
        let index = Arc::clone(&self.index);
        let inner = Arc::clone(&self.inner);
        let aliases = Arc::clone(&self.aliases);
        let id = id.to_string();

        Promise::spawn(async move {
            let Some(entry) = index.get(&id)? else {
                return Ok(false);
            };
            if let Some(socket_index) = aliases.iter().position(|alias| *alias == entry.backend) {
                inner.del_object_at(socket_index, &id).wait().await?;
            }
            index.delete(&id)
        })
    }

    pub fn backup(&self) -> Promise<bool> {
        self.inner.backup()
    }

    pub fn close(&self) -> Promise<bool> {
        self.ready.close();
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use base64::prelude::*;

    use crate::backend::db::{DbBackend, DbBackendConfig};
    use crate::backend::fs::{FsBackend, FsBackendConfig};

    fn sockets_for(dir: &tempfile::TempDir) -> Vec<Arc<dyn BackendSocket>> {
        vec![
            Arc::new(DbBackend::new(DbBackendConfig::new(dir.path().join("blobs.db")))),
            Arc::new(FsBackend::new(FsBackendConfig::new(
                dir.path().join("blobs"),
                dir.path().join("meta.json"),
            ))),
        ]
    }

    fn config_for(dir: &tempfile::TempDir) -> StatefulFrontendConfig {
        StatefulFrontendConfig {
            index: IndexConfig::new(dir.path().join("index.db")),
            aliases: vec!["db_1".to_string(), "fs_1".to_string()],
        }
    }

    async fn ready_frontend(dir: &tempfile::TempDir) -> StatefulFrontend {
        let frontend = StatefulFrontend::new(sockets_for(dir), config_for(dir)).unwrap();
        frontend.init().wait().await.unwrap();
        frontend
    }

    fn encoded(data: &[u8]) -> String {
        BASE64_STANDARD.encode(data)
    }

    #[tokio::test]
    async fn alias_list_must_match_the_socket_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = StatefulFrontendConfig {
            index: IndexConfig::new(dir.path().join("index.db")),
            aliases: vec!["db_1".to_string()],
        };
        assert!(matches!(
            StatefulFrontend::new(sockets_for(&dir), config),
            Err(GateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_aliases_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = StatefulFrontendConfig {
            index: IndexConfig::new(dir.path().join("index.db")),
            aliases: vec!["same".to_string(), "same".to_string()],
        };
        assert!(matches!(
            StatefulFrontend::new(sockets_for(&dir), config),
            Err(GateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn write_then_read_round_trips_with_a_bearer() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        let outcome = frontend
            .write_object("secret", &encoded(b"ABC"), Some("tok-A"))
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Stored { .. }));

        let object = frontend
            .read_object("secret", Some("tok-A"))
            .wait()
            .await
            .unwrap()
            .expect("owner should read the object");
        assert_eq!(object.data.as_ref(), b"ABC");
    }

    #[tokio::test]
    async fn wrong_bearer_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        frontend
            .write_object("secret", &encoded(b"ABC"), Some("tok-A"))
            .wait()
            .await
            .unwrap();

        assert!(matches!(
            frontend.read_object("secret", Some("tok-B")).wait().await,
            Err(GateError::Unauthorized(_))
        ));
        assert!(matches!(
            frontend.read_object("secret", None).wait().await,
            Err(GateError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn public_objects_are_readable_by_anyone() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        frontend
            .write_object("pub", &encoded(b"open"), None)
            .wait()
            .await
            .unwrap();

        assert!(frontend
            .read_object("pub", Some("tok-X"))
            .wait()
            .await
            .unwrap()
            .is_some());
        assert!(frontend.read_object("pub", None).wait().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ids_are_write_once_across_the_fleet() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        frontend
            .write_object("a", &encoded(b"one"), None)
            .wait()
            .await
            .unwrap();
        let outcome = frontend
            .write_object("a", &encoded(b"two"), Some("someone"))
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Rejected));
    }

    #[tokio::test]
    async fn the_index_names_the_backend_that_took_the_blob() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        let outcome = frontend
            .write_object("a", &encoded(b"data"), None)
            .wait()
            .await
            .unwrap();
        let WriteOutcome::Stored { index: chosen, .. } = outcome else {
            panic!("expected a stored outcome");
        };

        let index = ObjectIndex::new(IndexConfig::new(dir.path().join("index.db")));
        let entry = index.get("a").unwrap().expect("entry should exist");
        let expected = ["db_1", "fs_1"][chosen];
        assert_eq!(entry.backend, expected);
        assert_eq!(entry.bearer, "");
    }

    #[tokio::test]
    async fn unknown_ids_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;
        assert!(frontend
            .read_object("missing", Some("whoever"))
            .wait()
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn empty_ids_are_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;
        let outcome = frontend
            .write_object("", &encoded(b"x"), None)
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::InvalidPayload));
    }

    #[tokio::test]
    async fn del_object_clears_blob_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        frontend
            .write_object("a", &encoded(b"data"), None)
            .wait()
            .await
            .unwrap();
        assert!(frontend.del_object("a").wait().await.unwrap());
        assert!(frontend.read_object("a", None).wait().await.unwrap().is_none());

        // The id is writable again once deleted.
        let outcome = frontend
            .write_object("a", &encoded(b"again"), None)
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Stored { .. }));
    }

    #[tokio::test]
    async fn objects_survive_a_frontend_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let frontend = ready_frontend(&dir).await;
            frontend
                .write_object("kept", &encoded(b"durable"), None)
                .wait()
                .await
                .unwrap();
            frontend.close().wait().await.unwrap();
        }

        let frontend = ready_frontend(&dir).await;
        let object = frontend
            .read_object("kept", None)
            .wait()
            .await
            .unwrap()
            .expect("object should survive the restart");
        assert_eq!(object.data.as_ref(), b"durable");
    }

    #[tokio::test]
    async fn close_rejects_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;
        frontend.close().wait().await.unwrap();
        assert!(matches!(
            frontend.is_ready().wait().await,
            Err(GateError::Closed)
        ));
    }
}

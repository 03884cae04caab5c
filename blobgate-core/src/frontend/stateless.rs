//! The stateless dispatcher: no record of where anything lives.
//!
//! Reads fan out to every backend in parallel and take the first hit in
//! input order; writes walk a shuffled backend list and commit to the first
//! online backend that approves the id.

use std::sync::Arc;

use base64::prelude::*;
use bytes::Bytes;
use rand::seq::SliceRandom;

use crate::backend::{BackendSocket, ObjectMetadata, StoredObject};
use crate::promise::{Promise, ReadyCell};

/// How a write ended.
///
/// Every variant except `Stored` aborts the write; they are kept distinct so
/// the HTTP controller can answer 422 vs 503 without inspecting logs.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// The blob landed on the backend at `index`.
    Stored { index: usize, meta: ObjectMetadata },
    /// The chosen backend refused the id (or failed committing it); the id
    /// is treated as claimed and no other backend is tried.
    Rejected,
    /// Every backend in the walk was offline.
    NoBackendOnline,
    /// The payload was not decodable base64.
    InvalidPayload,
}

pub struct StatelessFrontend {
    sockets: Vec<Arc<dyn BackendSocket>>,
    ready: ReadyCell,
}

impl StatelessFrontend {
    pub fn new(sockets: Vec<Arc<dyn BackendSocket>>) -> Self {
        Self {
            sockets,
            ready: ReadyCell::new(),
        }
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_ready(&self) -> Promise<bool> {
        self.ready.current()
    }

    /// Bring up every backend. Individual failures are logged and tolerated;
    /// readiness resolves once every attempt has settled.
    pub fn init(&self) -> Promise<bool> {
        let ready = self.ready.replace();
        let attempts = self
            .sockets
            .iter()
            .enumerate()
            .map(|(index, socket)| {
                let kind = socket.kind();
                socket.init().catch(move |error| {
                    tracing::warn!("backend {} ({}) failed to initialize: {}", index, kind, error);
                    Ok(false)
                })
            })
            .collect();
        ready.adopt(Promise::all(attempts).then(|_| Ok(true)));
        ready
    }

    /// Fan out across the selected backends (all of them by default) and
    /// return the first present object in input order; `None` when every
    /// backend comes up empty. Per-backend failures are absorbed.
    pub fn read_object(
        &self,
        id: &str,
        sockets: Option<Vec<usize>>,
    ) -> Promise<Option<StoredObject>> {
        let indices = sockets.unwrap_or_else(|| (0..self.sockets.len()).collect());
        let attempts: Vec<Promise<Option<StoredObject>>> = indices
            .into_iter()
            .filter_map(|index| self.sockets.get(index).cloned())
            .map(|socket| {
                let reader = Arc::clone(&socket);
                socket
                    .get_object_metadata(id)
                    .then_promise(move |meta| {
                        reader
                            .get_object(&meta.id)
                            .then(move |data| Ok(StoredObject { meta, data }))
                    })
                    .then(|object| Ok(Some(object)))
                    .catch(|_| Ok(None))
            })
            .collect();

        Promise::all(attempts).then(|results| Ok(results.into_iter().flatten().next()))
    }

    /// Walk the backends in the given order (shuffled by default), skipping
    /// offline ones, and commit to the first that approves the id. The
    /// payload is decoded only once a backend is about to take it.
    pub fn write_object(
        &self,
        id: &str,
        data: &str,
        order: Option<Vec<usize>>,
    ) -> Promise<WriteOutcome> {
        let order = order.unwrap_or_else(|| {
            let mut indices: Vec<usize> = (0..self.sockets.len()).collect();
            indices.shuffle(&mut rand::thread_rng());
            indices
        });
        let sockets = self.sockets.clone();
        let id = id.to_string();
        let data = data.to_string();

        Promise::spawn(async move {
            for index in order {
                let Some(socket) = sockets.get(index) else {
                    continue;
                };
                match socket.is_online().wait().await {
                    Ok(Some(latency)) => {
                        tracing::debug!(
                            "backend {} ({}) answered the liveness probe in {}ms",
                            index,
                            socket.kind(),
                            latency
                        );
                    }
                    _ => continue,
                }

                let payload = match BASE64_STANDARD.decode(data.as_bytes()) {
                    Ok(bytes) => Bytes::from(bytes),
                    Err(error) => {
                        tracing::warn!("rejecting write for {}: undecodable payload: {}", id, error);
                        return Ok(WriteOutcome::InvalidPayload);
                    }
                };

                if let Err(error) = socket
                    .approve_object_metadata(&id, payload.len() as i64)
                    .wait()
                    .await
                {
                    tracing::warn!(
                        "backend {} ({}) refused {}: {}",
                        index,
                        socket.kind(),
                        id,
                        error
                    );
                    return Ok(WriteOutcome::Rejected);
                }

                return match socket.set_object(&id, payload).wait().await {
                    Ok(meta) => Ok(WriteOutcome::Stored { index, meta }),
                    Err(error) => {
                        tracing::warn!(
                            "backend {} ({}) failed to commit {}: {}",
                            index,
                            socket.kind(),
                            id,
                            error
                        );
                        Ok(WriteOutcome::Rejected)
                    }
                };
            }
            Ok(WriteOutcome::NoBackendOnline)
        })
    }

    /// Test affordance: delete from one specific backend.
    pub fn del_object_at(&self, index: usize, id: &str) -> Promise<bool> {
        match self.sockets.get(index) {
            Some(socket) => socket.del_object(id),
            None => Promise::resolved(false),
        }
    }

    /// Persist every backend's non-durable state; errors surface through
    /// the combined promise.
    pub fn backup(&self) -> Promise<bool> {
        let attempts = self.sockets.iter().map(|socket| socket.backup()).collect();
        Promise::all(attempts).then(|_| Ok(true))
    }

    /// Reject readiness, persist, then close every backend in parallel.
    pub fn close(&self) -> Promise<bool> {
        self.ready.close();
        let sockets = self.sockets.clone();
        self.backup().then_promise(move |_| {
            let closings = sockets.iter().map(|socket| socket.close()).collect();
            Promise::all(closings).then(|_| Ok(true))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use base64::prelude::*;

    use crate::backend::db::{DbBackend, DbBackendConfig};
    use crate::backend::fs::{FsBackend, FsBackendConfig};
    use crate::error::GateError;

    fn two_backends(dir: &tempfile::TempDir) -> Vec<Arc<dyn BackendSocket>> {
        vec![
            Arc::new(DbBackend::new(DbBackendConfig::new(dir.path().join("blobs.db")))),
            Arc::new(FsBackend::new(FsBackendConfig::new(
                dir.path().join("blobs"),
                dir.path().join("meta.json"),
            ))),
        ]
    }

    async fn ready_frontend(dir: &tempfile::TempDir) -> StatelessFrontend {
        let frontend = StatelessFrontend::new(two_backends(dir));
        frontend.init().wait().await.unwrap();
        frontend
    }

    fn encoded(data: &[u8]) -> String {
        BASE64_STANDARD.encode(data)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        let outcome = frontend
            .write_object("hello.txt", &encoded(b"Hello World!"), None)
            .wait()
            .await
            .unwrap();
        let WriteOutcome::Stored { index, meta } = outcome else {
            panic!("expected a stored outcome, got {outcome:?}");
        };
        assert!(index < 2);
        assert_eq!(meta.size, 12);

        let object = frontend
            .read_object("hello.txt", None)
            .wait()
            .await
            .unwrap()
            .expect("object should be readable");
        assert_eq!(object.data.as_ref(), b"Hello World!");
        assert_eq!(object.meta.size, 12);
    }

    #[tokio::test]
    async fn read_honors_the_socket_selection() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        let outcome = frontend
            .write_object("a", &encoded(b"data"), Some(vec![0]))
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Stored { index: 0, .. }));

        // Present on backend 0, absent on backend 1.
        assert!(frontend
            .read_object("a", Some(vec![0]))
            .wait()
            .await
            .unwrap()
            .is_some());
        assert!(frontend
            .read_object("a", Some(vec![1]))
            .wait()
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn absent_ids_read_as_none_not_as_errors() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;
        assert!(frontend
            .read_object("missing", None)
            .wait()
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_id_on_the_chosen_backend_rejects_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        frontend
            .write_object("a", &encoded(b"one"), Some(vec![0]))
            .wait()
            .await
            .unwrap();
        let outcome = frontend
            .write_object("a", &encoded(b"two"), Some(vec![0, 1]))
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Rejected));

        // The second backend was not consulted.
        assert!(frontend
            .read_object("a", Some(vec![1]))
            .wait()
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn malformed_base64_fails_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        let outcome = frontend
            .write_object("a", "!!! not base64 !!!", None)
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::InvalidPayload));
        assert!(frontend.read_object("a", None).wait().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_online_backend_means_no_write() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        // Tear the filesystem root out from under backend 1 and restrict the
        // walk to it.
        std::fs::remove_dir_all(dir.path().join("blobs")).unwrap();
        let outcome = frontend
            .write_object("a", &encoded(b"data"), Some(vec![1]))
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::NoBackendOnline));
    }

    #[tokio::test]
    async fn close_rejects_readiness_and_backends() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = ready_frontend(&dir).await;

        frontend.close().wait().await.unwrap();
        assert!(matches!(
            frontend.is_ready().wait().await,
            Err(GateError::Closed)
        ));
    }

    #[tokio::test]
    async fn init_tolerates_a_failing_backend() {
        let dir = tempfile::tempdir().unwrap();
        // Point the DB backend at a path whose parent is a regular file so
        // its init fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let sockets: Vec<Arc<dyn BackendSocket>> = vec![
            Arc::new(DbBackend::new(DbBackendConfig::new(blocker.join("blobs.db")))),
            Arc::new(FsBackend::new(FsBackendConfig::new(
                dir.path().join("blobs"),
                dir.path().join("meta.json"),
            ))),
        ];
        let frontend = StatelessFrontend::new(sockets);
        assert!(frontend.init().wait().await.unwrap());

        // The healthy backend still takes writes.
        let outcome = frontend
            .write_object("a", &encoded(b"data"), None)
            .wait()
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Stored { index: 1, .. }));
    }
}

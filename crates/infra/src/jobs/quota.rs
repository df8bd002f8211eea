//! Per-tenant quota controller.
//!
//! One actor task per tenant key owns that tenant's `QuotaState`. Requests arrive
//! over an `mpsc` channel and are answered over `oneshot`, so read-modify-write
//! cycles for a tenant are strictly serialized. State is loaded from the metadata
//! store on first use and every mutation is persisted before the reply; a failed
//! write leaves the in-memory state untouched and is reported to the caller.
//!
//! Actors are process-local: one process owns the quota keys of a given store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use docintel_core::TenantId;
use docintel_documents::{AcquireDecision, QuotaState};

use crate::store::{MetadataStore, StoreError};

const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("quota store error: {0}")]
    Store(#[from] StoreError),
    #[error("quota controller unavailable for tenant {0}")]
    Unavailable(TenantId),
}

type Reply<T> = oneshot::Sender<Result<T, QuotaError>>;

enum QuotaCommand {
    TryAcquire(Reply<AcquireDecision>),
    Release(Reply<u32>),
    SetLimit(u32, Reply<QuotaState>),
    GetState(Reply<QuotaState>),
}

impl QuotaCommand {
    fn fail(self, err: QuotaError) {
        let _ = match self {
            QuotaCommand::TryAcquire(reply) => reply.send(Err(err)).map_err(drop),
            QuotaCommand::Release(reply) => reply.send(Err(err)).map_err(drop),
            QuotaCommand::SetLimit(_, reply) => reply.send(Err(err)).map_err(drop),
            QuotaCommand::GetState(reply) => reply.send(Err(err)).map_err(drop),
        };
    }
}

pub struct QuotaController {
    store: Arc<dyn MetadataStore>,
    default_limit: u32,
    actors: Mutex<HashMap<TenantId, mpsc::Sender<QuotaCommand>>>,
}

impl core::fmt::Debug for QuotaController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QuotaController")
            .field("default_limit", &self.default_limit)
            .finish_non_exhaustive()
    }
}

impl QuotaController {
    pub fn new(store: Arc<dyn MetadataStore>, default_limit: u32) -> Self {
        Self {
            store,
            default_limit,
            actors: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    /// Grant a slot iff `inflight < limit`. Never waits for capacity.
    pub async fn try_acquire(&self, tenant_id: &TenantId) -> Result<AcquireDecision, QuotaError> {
        self.request(tenant_id, QuotaCommand::TryAcquire).await
    }

    /// Return a slot; `inflight` never drops below zero. Returns the new `inflight`.
    pub async fn release(&self, tenant_id: &TenantId) -> Result<u32, QuotaError> {
        self.request(tenant_id, QuotaCommand::Release).await
    }

    pub async fn set_limit(&self, tenant_id: &TenantId, limit: u32) -> Result<QuotaState, QuotaError> {
        self.request(tenant_id, |reply| QuotaCommand::SetLimit(limit, reply))
            .await
    }

    pub async fn get_state(&self, tenant_id: &TenantId) -> Result<QuotaState, QuotaError> {
        self.request(tenant_id, QuotaCommand::GetState).await
    }

    async fn request<T>(
        &self,
        tenant_id: &TenantId,
        command: impl FnOnce(Reply<T>) -> QuotaCommand,
    ) -> Result<T, QuotaError> {
        let mailbox = self.mailbox(tenant_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        mailbox
            .send(command(reply_tx))
            .await
            .map_err(|_| QuotaError::Unavailable(tenant_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| QuotaError::Unavailable(tenant_id.clone()))?
    }

    fn mailbox(&self, tenant_id: &TenantId) -> Result<mpsc::Sender<QuotaCommand>, QuotaError> {
        let mut actors = self
            .actors
            .lock()
            .map_err(|_| QuotaError::Unavailable(tenant_id.clone()))?;
        if let Some(tx) = actors.get(tenant_id) {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(run_actor(
            tenant_id.clone(),
            Arc::clone(&self.store),
            self.default_limit,
            rx,
        ));
        actors.insert(tenant_id.clone(), tx.clone());
        debug!(tenant_id = %tenant_id, "quota actor started");
        Ok(tx)
    }
}

async fn run_actor(
    tenant_id: TenantId,
    store: Arc<dyn MetadataStore>,
    default_limit: u32,
    mut mailbox: mpsc::Receiver<QuotaCommand>,
) {
    let mut loaded: Option<QuotaState> = None;

    while let Some(command) = mailbox.recv().await {
        let current = match loaded {
            Some(state) => state,
            None => match store.load_quota(&tenant_id).await {
                Ok(state) => {
                    let state = state.unwrap_or_else(|| QuotaState::with_limit(default_limit));
                    loaded = Some(state);
                    state
                }
                Err(e) => {
                    warn!(tenant_id = %tenant_id, error = %e, "failed to load quota state");
                    command.fail(e.into());
                    continue;
                }
            },
        };

        match command {
            QuotaCommand::GetState(reply) => {
                let _ = reply.send(Ok(current));
            }
            QuotaCommand::TryAcquire(reply) => {
                let mut next = current;
                let decision = next.try_acquire();
                let result = if decision.granted {
                    commit(&store, &tenant_id, &mut loaded, next).await.map(|_| decision)
                } else {
                    Ok(decision)
                };
                let _ = reply.send(result);
            }
            QuotaCommand::Release(reply) => {
                let mut next = current;
                let inflight = next.release();
                let result = if next == current {
                    Ok(inflight)
                } else {
                    commit(&store, &tenant_id, &mut loaded, next).await.map(|_| inflight)
                };
                let _ = reply.send(result);
            }
            QuotaCommand::SetLimit(limit, reply) => {
                let mut next = current;
                next.set_limit(limit);
                let result = commit(&store, &tenant_id, &mut loaded, next).await.map(|_| next);
                let _ = reply.send(result);
            }
        }
    }
    debug!(tenant_id = %tenant_id, "quota actor stopped");
}

/// Persist `next`, and adopt it only once the write succeeded.
async fn commit(
    store: &Arc<dyn MetadataStore>,
    tenant_id: &TenantId,
    loaded: &mut Option<QuotaState>,
    next: QuotaState,
) -> Result<(), QuotaError> {
    match store.save_quota(tenant_id, &next).await {
        Ok(()) => {
            *loaded = Some(next);
            Ok(())
        }
        Err(e) => {
            warn!(tenant_id = %tenant_id, error = %e, "quota write failed, state rolled back");
            Err(e.into())
        }
    }
}

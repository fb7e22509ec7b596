//! Session registry: the single owner of session lifetime.
//!
//! Sessions are keyed by stream sid. Everything else refers to sessions by
//! id and resolves through here, so there are no strong reference cycles
//! and no component besides the registry can destroy a session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::core::conference::ConferenceManager;
use crate::core::session::{Session, SessionContext, SessionError, SessionParams};
use crate::core::stt::BaseStt;
use crate::core::tts::BaseTts;
use crate::telephony::OutboundSink;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    conferences: Arc<ConferenceManager>,
    ctx: SessionContext,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            conferences: Arc::new(ConferenceManager::new()),
            ctx,
        })
    }

    pub fn conferences(&self) -> &Arc<ConferenceManager> {
        &self.conferences
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Create and start a session for a fresh stream.
    pub async fn create(
        self: &Arc<Self>,
        params: SessionParams,
        stt: Box<dyn BaseStt>,
        tts: Box<dyn BaseTts>,
        sink: Arc<dyn OutboundSink>,
    ) -> Result<Arc<Session>, SessionError> {
        let stream_sid = params.stream_sid.clone();
        if self.has(&stream_sid) {
            warn!("create for known stream {}, replacing adapters instead", stream_sid);
            self.replace_adapters(&stream_sid, stt, tts, sink).await?;
            return self
                .get(&stream_sid)
                .ok_or_else(|| SessionError::InvalidState("session vanished during swap".to_string()));
        }

        let session = Session::new(params, stt, tts, sink, self.ctx.clone(), Arc::downgrade(self));
        session.start().await?;
        self.sessions
            .write()
            .insert(stream_sid.clone(), session.clone());
        info!("session {} created", stream_sid);
        Ok(session)
    }

    pub fn get(&self, stream_sid: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(stream_sid).cloned()
    }

    pub fn has(&self, stream_sid: &str) -> bool {
        self.sessions.read().contains_key(stream_sid)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// In-place adapter swap for a reappearing stream sid.
    pub async fn replace_adapters(
        self: &Arc<Self>,
        stream_sid: &str,
        stt: Box<dyn BaseStt>,
        tts: Box<dyn BaseTts>,
        sink: Arc<dyn OutboundSink>,
    ) -> Result<(), SessionError> {
        let session = self.get(stream_sid).ok_or_else(|| {
            SessionError::InvalidState(format!("no session for stream {stream_sid}"))
        })?;
        session.replace_adapters(stt, tts, sink).await
    }

    /// Remove a session and run its cleanup.
    pub async fn delete(&self, stream_sid: &str) {
        let session = self.sessions.write().remove(stream_sid);
        if let Some(session) = session {
            session.cleanup().await;
            info!("session {} deleted", stream_sid);
        }
    }

    /// Stream teardown. The session is deleted unless a conference transfer
    /// is in flight, in which case the old stream's death is expected and
    /// the session stays alive waiting for its reconnect.
    pub async fn release(&self, stream_sid: &str) {
        if let Some(session) = self.get(stream_sid) {
            if session.is_transferring() {
                info!("stream {} closed mid-transfer, keeping session", stream_sid);
                return;
            }
        }
        self.delete(stream_sid).await;
    }
}

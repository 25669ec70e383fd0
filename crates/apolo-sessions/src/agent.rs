//! Diameter credit control agent
//!
//! Turns Credit-Control-Requests into engine operations and engine outcomes
//! into Credit-Control-Answers. INITIAL starts a session, UPDATE debits it,
//! TERMINATE ends it.

use apolo_core::config::DiameterConfig;
use apolo_core::models::SessionEvent;
use apolo_core::{AppError, AppResult};
use apolo_diameter::dictionary::result_code;
use apolo_diameter::{
    CreditControlAnswer, CreditControlRequest, DiameterCodec, DiameterMessage, RequestTracker,
    RequestType,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::SessionEngine;

pub struct DiameterAgent {
    engine: SessionEngine,
    tracker: Arc<RequestTracker>,
    config: DiameterConfig,
}

/// Outcome of one request, before it is shaped into an answer
enum Outcome {
    Granted(Duration),
    Ended,
}

impl DiameterAgent {
    pub fn new(engine: SessionEngine, config: DiameterConfig) -> Self {
        let tracker = Arc::new(RequestTracker::new());
        let ended = Arc::downgrade(&tracker);
        engine.on_session_ended(move |session_id| {
            if let Some(tracker) = ended.upgrade() {
                tracker.forget(session_id);
            }
        });
        Self {
            engine,
            tracker,
            config,
        }
    }

    pub fn config(&self) -> &DiameterConfig {
        &self.config
    }

    /// Answer one Credit-Control-Request
    ///
    /// Never fails: every error becomes a Result-Code in the answer.
    pub async fn handle_message(&self, msg: &DiameterMessage, conn_id: &str) -> DiameterMessage {
        let ccr = match CreditControlRequest::from_message(msg) {
            Ok(ccr) => ccr,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "Undecodable credit control request");
                return CreditControlAnswer::for_undecodable(msg, &self.config, &e).to_message();
            }
        };

        let answer = match self.process(&ccr, conn_id).await {
            Ok(Outcome::Granted(units)) => {
                CreditControlAnswer::granted(&ccr, &self.config, units)
            }
            Ok(Outcome::Ended) => {
                CreditControlAnswer::new(&ccr, &self.config, result_code::SUCCESS)
            }
            Err(e) => {
                warn!(
                    session_id = %ccr.session_id,
                    request_type = %ccr.request_type,
                    error = %e,
                    "Credit control request failed"
                );
                CreditControlAnswer::from_error(&ccr, &self.config, &e)
            }
        };
        answer.to_message()
    }

    #[instrument(
        skip(self, ccr),
        fields(
            session_id = %ccr.session_id,
            request_type = %ccr.request_type,
            request_number = ccr.request_number
        )
    )]
    async fn process(&self, ccr: &CreditControlRequest, conn_id: &str) -> AppResult<Outcome> {
        let event = ccr.as_session_event(&self.config)?;
        let previous = self
            .tracker
            .observe(&ccr.session_id, ccr.request_type, ccr.request_number)?;

        let outcome = self.dispatch(ccr, &event, conn_id).await;
        if let Err(e) = &outcome {
            if e.is_retryable() {
                // nothing happened, the peer may resend the same number
                self.tracker.restore(&ccr.session_id, previous);
            }
        }
        if !self.engine.is_managed(&ccr.session_id) {
            self.tracker.forget(&ccr.session_id);
        }
        outcome
    }

    async fn dispatch(
        &self,
        ccr: &CreditControlRequest,
        event: &SessionEvent,
        conn_id: &str,
    ) -> AppResult<Outcome> {
        match ccr.request_type {
            RequestType::Initial => {
                let granted = self.engine.session_start(event, conn_id).await?;
                if !self.engine.is_managed(&ccr.session_id) {
                    // not charged by this engine, the network decides
                    return Ok(Outcome::Granted(ccr.cc_units()));
                }
                Self::checked_grant(granted, &event_account(ccr))
            }
            RequestType::Update => {
                let granted = self.engine.session_update(event).await?;
                if !self.engine.is_managed(&ccr.session_id) {
                    return Ok(Outcome::Granted(granted));
                }
                Self::checked_grant(granted, &event_account(ccr))
            }
            RequestType::Terminate => {
                self.engine.session_end(event).await?;
                Ok(Outcome::Ended)
            }
        }
    }

    fn checked_grant(granted: Duration, account: &str) -> AppResult<Outcome> {
        if granted.is_zero() {
            return Err(AppError::InsufficientCredit(format!(
                "nothing granted for {}",
                account
            )));
        }
        Ok(Outcome::Granted(granted))
    }

    /// Answer a raw request, for transports that deliver whole messages
    pub async fn handle_bytes(&self, raw: Bytes, conn_id: &str) -> AppResult<Bytes> {
        let msg = DiameterMessage::decode(raw)?;
        if !msg.header.is_request() {
            return Err(AppError::MalformedMessage(
                "expected a request, got an answer".to_string(),
            ));
        }
        Ok(self.handle_message(&msg, conn_id).await.to_bytes())
    }

    /// Serve one framed connection until the peer leaves or `cancel` fires
    ///
    /// Requests are answered in arrival order. Disconnect requests the
    /// engine raises for sessions of this connection are logged; acting on
    /// them is up to the peer handling layer.
    pub async fn serve<T>(self: Arc<Self>, io: T, conn_id: String, cancel: CancellationToken)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let connections = self.engine.connections();
        let mut disconnects = connections.register(&conn_id);
        let mut framed = Framed::new(io, DiameterCodec::new(self.config.max_message_size));
        info!(conn_id = %conn_id, "Diameter connection opened");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(request) = disconnects.recv() => {
                    info!(
                        conn_id = %conn_id,
                        session_id = %request.session_id,
                        reason = %request.reason,
                        "Engine requested disconnect"
                    );
                }
                frame = framed.next() => {
                    let msg = match frame {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!(conn_id = %conn_id, error = %e, "Dropping connection on framing error");
                            break;
                        }
                        None => break,
                    };
                    if !msg.header.is_request() {
                        debug!(conn_id = %conn_id, command_code = msg.header.command_code, "Ignoring answer");
                        continue;
                    }
                    let answer = self.handle_message(&msg, &conn_id).await;
                    if let Err(e) = framed.send(answer).await {
                        warn!(conn_id = %conn_id, error = %e, "Failed writing answer");
                        break;
                    }
                }
            }
        }

        connections.unregister(&conn_id);
        info!(conn_id = %conn_id, "Diameter connection closed");
    }
}

fn event_account(ccr: &CreditControlRequest) -> String {
    ccr.e164_subscriber().unwrap_or_default().to_string()
}

//! Delivery pipeline: verify, decode, fan out to handlers.
//!
//! Each delivery moves through `Received → Verified → Decoded → Dispatched`
//! or stops in `RejectedSignature` / `RejectedBody`. Handlers run as detached
//! tasks on the tokio runtime captured when the webhook was built;
//! [`Webhook::receive`] returns as soon as they are spawned, and can be called
//! from any thread.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{BuildError, HandlerError, TokenError, WebhookError};
use crate::token::validate_token;
use crate::webhook::registry::{HandlerFuture, HandlerRegistry};
use crate::webhook::signature::SigningKey;
use crate::webhook::update::{self, Update};

/// Called when a delivery is rejected before dispatch.
pub type WebhookErrorCallback = Arc<dyn Fn(&WebhookError) + Send + Sync>;

/// Called when a handler fails, times out, or panics.
pub type HandlerErrorCallback = Arc<dyn Fn(&Update, &HandlerError) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum DeliveryState {
    Received,
    Verified,
    Decoded,
    Dispatched,
    RejectedSignature,
    RejectedBody,
}

/// Accepted delivery.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub update: Arc<Update>,
    /// Number of handler tasks spawned for the update
    pub handler_count: usize,
}

/// Crypto Pay webhook receiver.
///
/// Owns the signing key and the handler registry. Share it between server
/// tasks behind an `Arc`.
pub struct Webhook {
    signing_key: SigningKey,
    registry: HandlerRegistry,
    on_webhook_error: Option<WebhookErrorCallback>,
    on_handler_error: Option<HandlerErrorCallback>,
    handler_timeout: Option<Duration>,
    handler_permits: Option<Arc<Semaphore>>,
    runtime: Handle,
}

impl Webhook {
    /// Start configuring a webhook for the given API token.
    pub fn builder(token: &str) -> WebhookBuilder {
        WebhookBuilder::new(token)
    }

    /// Webhook with no callbacks and no handler limits, spawning handlers on
    /// `runtime`.
    pub fn new(signing_key: SigningKey, runtime: Handle) -> Self {
        Self {
            signing_key,
            registry: HandlerRegistry::new(),
            on_webhook_error: None,
            on_handler_error: None,
            handler_timeout: None,
            handler_permits: None,
            runtime,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Process one delivery.
    ///
    /// `signature` is the `crypto-pay-api-signature` header value, `None` if
    /// the header was absent. `body` must be the complete raw request body.
    ///
    /// Rejections are also passed to the webhook error callback. Handler
    /// outcomes are not part of the result; they go to the handler error
    /// callback once the tasks finish.
    ///
    /// Does not need to run inside a tokio runtime; servers on other executors
    /// or plain threads can call it directly.
    pub fn receive(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Dispatched, WebhookError> {
        debug!(
            state = ?DeliveryState::Received,
            body_length = body.len(),
            has_signature = signature.is_some(),
            "webhook_delivery_state"
        );

        let verified = signature.is_some_and(|s| self.signing_key.verify(body, s));
        if !verified {
            let err = WebhookError::WrongSignature;
            return Err(self.reject(DeliveryState::RejectedSignature, err));
        }
        debug!(state = ?DeliveryState::Verified, "webhook_delivery_state");

        let update = match update::decode(body) {
            Ok(update) => Arc::new(update),
            Err(e) => return Err(self.reject(DeliveryState::RejectedBody, e.into())),
        };
        debug!(
            state = ?DeliveryState::Decoded,
            update_id = update.id,
            update_type = %update.update_type,
            "webhook_delivery_state"
        );

        let handler_count = self.dispatch(Arc::clone(&update));

        info!(
            state = ?DeliveryState::Dispatched,
            update_id = update.id,
            update_type = %update.update_type,
            handler_count = handler_count,
            "webhook_update_dispatched"
        );

        Ok(Dispatched {
            update,
            handler_count,
        })
    }

    /// Run the handlers registered for the update's type.
    ///
    /// Handlers are invoked in registration order on the calling thread, and
    /// each resulting future is spawned as its own task. Returns the number of tasks spawned;
    /// an update type without handlers is not an error.
    pub fn dispatch(&self, update: Arc<Update>) -> usize {
        let handlers = self.registry.snapshot(&update.update_type);
        if handlers.is_empty() {
            debug!(
                update_id = update.id,
                update_type = %update.update_type,
                "webhook_update_unhandled"
            );
            return 0;
        }

        let count = handlers.len();
        for (index, handler) in handlers.into_iter().enumerate() {
            let invoked = panic::catch_unwind(AssertUnwindSafe(|| handler(Arc::clone(&update))));
            let future = match invoked {
                Ok(future) => future,
                Err(payload) => {
                    let err = HandlerError::Panicked(panic_message(payload.as_ref()));
                    self.report_handler_error(&update, index, &err);
                    continue;
                }
            };

            let task = HandlerTask {
                update: Arc::clone(&update),
                index,
                timeout: self.handler_timeout,
                permits: self.handler_permits.clone(),
                on_error: self.on_handler_error.clone(),
            };
            self.runtime.spawn(task.run(future));
        }

        count
    }

    fn reject(&self, state: DeliveryState, err: WebhookError) -> WebhookError {
        warn!(state = ?state, error = %err, "webhook_delivery_rejected");
        if let Some(callback) = &self.on_webhook_error {
            callback(&err);
        }
        err
    }

    fn report_handler_error(&self, update: &Update, index: usize, err: &HandlerError) {
        report_handler_error(self.on_handler_error.as_ref(), update, index, err);
    }
}

impl fmt::Debug for Webhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Webhook")
            .field("registry", &self.registry)
            .field("handler_timeout", &self.handler_timeout)
            .field(
                "free_handler_slots",
                &self.handler_permits.as_ref().map(|p| p.available_permits()),
            )
            .finish_non_exhaustive()
    }
}

/// One spawned handler invocation.
struct HandlerTask {
    update: Arc<Update>,
    index: usize,
    timeout: Option<Duration>,
    permits: Option<Arc<Semaphore>>,
    on_error: Option<HandlerErrorCallback>,
}

impl HandlerTask {
    async fn run(self, future: HandlerFuture) {
        // The semaphore is never closed, so acquiring only waits
        let _permit = match &self.permits {
            Some(permits) => Arc::clone(permits).acquire_owned().await.ok(),
            None => None,
        };

        let guarded = AssertUnwindSafe(future).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = HandlerError::TimedOut(limit);
                    report_handler_error(self.on_error.as_ref(), &self.update, self.index, &err);
                    return;
                }
            },
            None => guarded.await,
        };

        let err = match outcome {
            Ok(Ok(())) => {
                debug!(
                    update_id = self.update.id,
                    handler_index = self.index,
                    "webhook_handler_completed"
                );
                return;
            }
            Ok(Err(e)) => HandlerError::Failed(e),
            Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())),
        };
        report_handler_error(self.on_error.as_ref(), &self.update, self.index, &err);
    }
}

fn report_handler_error(
    callback: Option<&HandlerErrorCallback>,
    update: &Update,
    index: usize,
    err: &HandlerError,
) {
    error!(
        update_id = update.id,
        update_type = %update.update_type,
        handler_index = index,
        error = %err,
        "webhook_handler_failed"
    );
    if let Some(callback) = callback {
        callback(update, err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Builder for [`Webhook`].
///
/// The raw token is hashed immediately; the builder keeps only the signing
/// key and the result of the token format check.
pub struct WebhookBuilder {
    signing_key: SigningKey,
    token_check: Result<i64, TokenError>,
    validate_token: bool,
    on_webhook_error: Option<WebhookErrorCallback>,
    on_handler_error: Option<HandlerErrorCallback>,
    handler_timeout: Option<Duration>,
    max_concurrent_handlers: usize,
    runtime: Option<Handle>,
}

impl WebhookBuilder {
    pub fn new(token: &str) -> Self {
        Self {
            signing_key: SigningKey::derive(token),
            token_check: validate_token(token),
            validate_token: true,
            on_webhook_error: None,
            on_handler_error: None,
            handler_timeout: None,
            max_concurrent_handlers: 0,
            runtime: None,
        }
    }

    /// Called with every rejected delivery (bad signature, bad body).
    pub fn on_webhook_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&WebhookError) + Send + Sync + 'static,
    {
        self.on_webhook_error = Some(Arc::new(callback));
        self
    }

    /// Called with the update and the error of every failed handler.
    pub fn on_handler_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Update, &HandlerError) + Send + Sync + 'static,
    {
        self.on_handler_error = Some(Arc::new(callback));
        self
    }

    /// Abort handlers that run longer than `timeout`.
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Cap the number of handlers running at once. `0` means unbounded.
    ///
    /// Handlers over the cap wait for a slot; the HTTP response does not.
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    /// Accept tokens that are not in `<app_id>:<secret>` form.
    ///
    /// An empty token is still rejected: its signing key is public.
    pub fn skip_token_validation(mut self) -> Self {
        self.validate_token = false;
        self
    }

    /// Spawn handlers on `runtime`.
    ///
    /// Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Webhook, BuildError> {
        match self.token_check {
            Ok(app_id) => debug!(app_id = app_id, "webhook_token_validated"),
            Err(TokenError::Empty) => return Err(TokenError::Empty.into()),
            Err(e) if self.validate_token => return Err(e.into()),
            Err(e) => debug!(error = %e, "webhook_token_validation_skipped"),
        }

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };

        let handler_permits = match self.max_concurrent_handlers {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };

        Ok(Webhook {
            signing_key: self.signing_key,
            registry: HandlerRegistry::new(),
            on_webhook_error: self.on_webhook_error,
            on_handler_error: self.on_handler_error,
            handler_timeout: self.handler_timeout,
            handler_permits,
            runtime,
        })
    }
}

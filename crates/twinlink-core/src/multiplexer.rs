//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Asset-connection abstraction and concurrency machinery."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Subscription multiplexer.
//!
//! One protocol-level subscription per reference, shared by any number
//! of listeners. The underlying subscription is created when the first
//! listener arrives and torn down when the last one leaves; both
//! transitions happen inside a single lock so concurrent add/remove
//! can never double-create or prematurely destroy it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::context::{resolve_property_datatype, ServiceContext};
use crate::error::AssetConnectionError;
use crate::provider::{ListenerHandle, NewDataListener};
use twinlink_model::{from_wire, Datatype, Reference};

/// Callback a transport pushes raw wire values into.
pub type NotificationSink = Arc<dyn Fn(Value) + Send + Sync>;

/// Protocol-level subscription handle owned by a multiplexer.
///
/// `open` is called with the multiplexer's internal lock held, so the
/// transport must not deliver a notification into the sink before
/// `open` has returned; deliveries from another thread afterwards are
/// fine. `close` must stop deliveries before it returns.
pub trait SubscriptionTransport: Send + Sync {
    fn open(&self, sink: NotificationSink) -> Result<(), AssetConnectionError>;
    fn close(&self) -> Result<(), AssetConnectionError>;
}

enum MuxState {
    Inactive,
    Active { datatype: Datatype },
}

struct Inner {
    state: MuxState,
    listeners: IndexMap<ListenerHandle, NewDataListener>,
}

/// Shares one protocol subscription among independent listeners.
pub struct SubscriptionMultiplexer {
    reference: Reference,
    context: Arc<dyn ServiceContext>,
    transport: Arc<dyn SubscriptionTransport>,
    inner: Arc<Mutex<Inner>>,
}

impl SubscriptionMultiplexer {
    pub fn new(
        reference: Reference,
        context: Arc<dyn ServiceContext>,
        transport: Arc<dyn SubscriptionTransport>,
    ) -> Self {
        Self {
            reference,
            context,
            transport,
            inner: Arc::new(Mutex::new(Inner {
                state: MuxState::Inactive,
                listeners: IndexMap::new(),
            })),
        }
    }

    /// Register a listener, opening the underlying subscription if this
    /// is the first one.
    ///
    /// The element's datatype is resolved here, so an unresolvable
    /// reference or unsupported element kind fails the registration
    /// immediately instead of poisoning later deliveries.
    pub fn add_listener(
        &self,
        listener: NewDataListener,
    ) -> Result<ListenerHandle, AssetConnectionError> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, MuxState::Inactive) {
            let datatype = resolve_property_datatype(self.context.as_ref(), &self.reference)?;
            self.transport.open(self.make_sink())?;
            inner.state = MuxState::Active { datatype };
        }
        let handle = ListenerHandle::next();
        inner.listeners.insert(handle, listener);
        Ok(handle)
    }

    /// Deregister a listener, closing the underlying subscription
    /// synchronously if it was the last one. Unknown handles are a
    /// no-op.
    pub fn remove_listener(&self, handle: ListenerHandle) -> Result<(), AssetConnectionError> {
        let mut inner = self.inner.lock();
        if inner.listeners.shift_remove(&handle).is_none() {
            return Ok(());
        }
        if inner.listeners.is_empty() && matches!(inner.state, MuxState::Active { .. }) {
            inner.state = MuxState::Inactive;
            self.transport.close()?;
        }
        Ok(())
    }

    /// True iff the underlying protocol subscription currently exists.
    pub fn is_active(&self) -> bool {
        matches!(self.inner.lock().state, MuxState::Active { .. })
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    fn make_sink(&self) -> NotificationSink {
        let inner: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let reference = self.reference.clone();
        Arc::new(move |raw: Value| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            // Snapshot datatype and listeners, then deliver outside the
            // lock so a slow listener cannot block add/remove.
            let (datatype, listeners): (Datatype, Vec<NewDataListener>) = {
                let inner = inner.lock();
                match inner.state {
                    MuxState::Active { datatype } => {
                        (datatype, inner.listeners.values().cloned().collect())
                    }
                    MuxState::Inactive => return,
                }
            };
            let value = match from_wire(&raw, datatype) {
                Ok(value) => value,
                Err(err) => {
                    warn!(
                        reference = %reference,
                        %datatype,
                        error = %err,
                        "dropping notification, wire value conversion failed"
                    );
                    return;
                }
            };
            for listener in listeners {
                if catch_unwind(AssertUnwindSafe(|| listener(&value))).is_err() {
                    warn!(
                        reference = %reference,
                        "subscription listener panicked, continuing with remaining listeners"
                    );
                }
            }
        })
    }
}

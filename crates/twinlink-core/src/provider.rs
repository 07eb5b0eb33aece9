//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Asset-connection abstraction and concurrency machinery."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Per-reference capability contracts for protocol adapters.
//!
//! A connection exposes up to three capabilities per bound reference:
//! reading/writing a value, invoking an operation, and pushing value
//! changes to listeners. Adapters implement the async invocation
//! primitive; the blocking `invoke` wrapper is derived here once so
//! every adapter gets identical wait and reconciliation semantics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::ArgumentValidationMode;
use crate::error::AssetConnectionError;
use twinlink_model::{OperationVariable, TypedValue};

/// Bounded wait applied by the blocking invoke wrapper unless the
/// adapter overrides it.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Read/write access to the value of one bound reference.
pub trait AssetValueProvider: Send + Sync {
    fn get(&self) -> Result<TypedValue, AssetConnectionError>;
    fn set(&self, value: TypedValue) -> Result<(), AssetConnectionError>;
}

/// Outcome an adapter reports through the invocation callback.
#[derive(Debug)]
pub enum InvocationResult {
    Success {
        output: Vec<OperationVariable>,
        inout: Vec<OperationVariable>,
    },
    Failure(AssetConnectionError),
}

/// One-shot completion callback for [`AssetOperationProvider::invoke_async`].
pub type InvocationCallback = Box<dyn FnOnce(InvocationResult) + Send>;

/// Operation invocation on one bound reference.
///
/// The async primitive is the required surface. Natively synchronous
/// adapters implement it by performing the call inline and firing the
/// callback before returning; the blocking wrapper still works for
/// them because the result is buffered until the wrapper reads it.
pub trait AssetOperationProvider: Send + Sync {
    /// Start the operation and report completion through `callback`.
    ///
    /// The callback must be called exactly once. Errors returned
    /// directly are submission failures; errors after submission
    /// travel through the callback.
    fn invoke_async(
        &self,
        input: Vec<OperationVariable>,
        inout: Vec<OperationVariable>,
        callback: InvocationCallback,
    ) -> Result<(), AssetConnectionError>;

    /// Upper bound on how long the blocking wrapper waits for the
    /// callback to fire.
    fn invoke_timeout(&self) -> Duration {
        DEFAULT_INVOKE_TIMEOUT
    }

    /// Validation the blocking wrapper applies when reconciling the
    /// inout arguments the asset echoed back.
    fn inout_validation(&self) -> ArgumentValidationMode {
        ArgumentValidationMode::Require
    }

    /// Blocking invocation derived from [`invoke_async`].
    ///
    /// Waits on a one-shot channel released by the callback, surfaces
    /// adapter failures, then reconciles the caller's inout arguments
    /// in place against what the asset returned. Exceeding
    /// [`invoke_timeout`] is reported as a connectivity failure; the
    /// underlying operation is not cancelled on the wire, so callers
    /// must not assume its side effects were prevented.
    ///
    /// [`invoke_async`]: AssetOperationProvider::invoke_async
    /// [`invoke_timeout`]: AssetOperationProvider::invoke_timeout
    fn invoke(
        &self,
        input: Vec<OperationVariable>,
        inout: &mut Vec<OperationVariable>,
    ) -> Result<Vec<OperationVariable>, AssetConnectionError> {
        let (tx, rx) = mpsc::sync_channel::<InvocationResult>(1);
        let callback: InvocationCallback = Box::new(move |result| {
            // A dropped receiver means the waiting caller already gave
            // up; nothing is left to notify.
            let _ = tx.send(result);
        });
        self.invoke_async(input, inout.clone(), callback)?;

        let timeout = self.invoke_timeout();
        let result = match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                return Err(AssetConnectionError::connectivity(format!(
                    "operation invocation timed out (timeout: {:?})",
                    timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(AssetConnectionError::connectivity(
                    "operation callback was dropped without reporting a result",
                ))
            }
        };
        match result {
            InvocationResult::Success { output, inout: returned } => {
                match self.inout_validation() {
                    ArgumentValidationMode::Require => reconcile_inout(inout, &returned)?,
                    // Unchecked mode takes the asset's word for it.
                    ArgumentValidationMode::None => *inout = returned,
                }
                Ok(output)
            }
            InvocationResult::Failure(err) => Err(err),
        }
    }
}

/// Mutate `declared` in place to carry the values the asset echoed
/// back, matching entries by `id_short`.
fn reconcile_inout(
    declared: &mut [OperationVariable],
    returned: &[OperationVariable],
) -> Result<(), AssetConnectionError> {
    if declared.len() != returned.len() {
        return Err(AssetConnectionError::contract_violation(format!(
            "number of inout arguments changed during invocation (declared: {}, returned: {})",
            declared.len(),
            returned.len()
        )));
    }
    for variable in declared.iter_mut() {
        let echoed = returned
            .iter()
            .find(|candidate| candidate.id_short == variable.id_short)
            .ok_or_else(|| {
                AssetConnectionError::contract_violation(format!(
                    "no matching inout argument returned by the asset (id_short: {})",
                    variable.id_short
                ))
            })?;
        variable.value = echoed.value.clone();
    }
    Ok(())
}

/// Identity token handed out by [`AssetSubscriptionProvider::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    /// Process-unique handle.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback invoked with each converted push notification.
pub type NewDataListener = Arc<dyn Fn(&TypedValue) + Send + Sync>;

/// Push notifications for one bound reference.
pub trait AssetSubscriptionProvider: Send + Sync {
    fn add_listener(
        &self,
        listener: NewDataListener,
    ) -> Result<ListenerHandle, AssetConnectionError>;
    fn remove_listener(&self, handle: ListenerHandle) -> Result<(), AssetConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use twinlink_model::Datatype;

    /// Natively synchronous adapter that doubles every integer input
    /// and echoes inout arguments under a configurable set of names.
    struct DoublingAdapter {
        echoed_inout_names: Vec<&'static str>,
    }

    impl AssetOperationProvider for DoublingAdapter {
        fn invoke_async(
            &self,
            input: Vec<OperationVariable>,
            inout: Vec<OperationVariable>,
            callback: InvocationCallback,
        ) -> Result<(), AssetConnectionError> {
            let output = input
                .into_iter()
                .map(|variable| {
                    let doubled = match variable.value {
                        TypedValue::Int(v) => TypedValue::Int(v * 2),
                        other => other,
                    };
                    OperationVariable::new(variable.id_short, doubled)
                })
                .collect();
            let returned = self
                .echoed_inout_names
                .iter()
                .zip(inout)
                .map(|(name, variable)| OperationVariable::new(*name, variable.value))
                .collect();
            callback(InvocationResult::Success {
                output,
                inout: returned,
            });
            Ok(())
        }
    }

    #[test]
    fn blocking_invoke_matches_synchronous_adapter_and_finishes_promptly() {
        let adapter = DoublingAdapter {
            echoed_inout_names: vec![],
        };
        let input = vec![OperationVariable::new("in", TypedValue::Int(21))];
        let mut inout = Vec::new();

        let started = Instant::now();
        let output = adapter.invoke(input, &mut inout).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].value, TypedValue::Int(42));
    }

    #[test]
    fn blocking_invoke_updates_inout_in_place() {
        let adapter = DoublingAdapter {
            echoed_inout_names: vec!["state"],
        };
        let mut inout = vec![OperationVariable::new("state", TypedValue::Int(7))];
        adapter.invoke(Vec::new(), &mut inout).unwrap();
        assert_eq!(inout[0].id_short, "state");
        assert_eq!(inout[0].value, TypedValue::Int(7));
    }

    #[test]
    fn unmatched_inout_name_is_a_contract_violation_naming_the_argument() {
        let adapter = DoublingAdapter {
            echoed_inout_names: vec!["y"],
        };
        let mut inout = vec![OperationVariable::declared("x", Datatype::Int)];
        let err = adapter.invoke(Vec::new(), &mut inout).unwrap_err();
        assert!(matches!(err, AssetConnectionError::ContractViolation(_)));
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn inout_count_mismatch_is_a_contract_violation() {
        struct SwallowingAdapter;
        impl AssetOperationProvider for SwallowingAdapter {
            fn invoke_async(
                &self,
                _input: Vec<OperationVariable>,
                _inout: Vec<OperationVariable>,
                callback: InvocationCallback,
            ) -> Result<(), AssetConnectionError> {
                callback(InvocationResult::Success {
                    output: Vec::new(),
                    inout: Vec::new(),
                });
                Ok(())
            }
        }
        let mut inout = vec![OperationVariable::declared("x", Datatype::Int)];
        let err = SwallowingAdapter.invoke(Vec::new(), &mut inout).unwrap_err();
        assert!(matches!(err, AssetConnectionError::ContractViolation(_)));
    }

    #[test]
    fn unchecked_inout_mode_takes_the_returned_arguments_as_is() {
        struct RenamingAdapter;
        impl AssetOperationProvider for RenamingAdapter {
            fn invoke_async(
                &self,
                _input: Vec<OperationVariable>,
                _inout: Vec<OperationVariable>,
                callback: InvocationCallback,
            ) -> Result<(), AssetConnectionError> {
                callback(InvocationResult::Success {
                    output: Vec::new(),
                    inout: vec![OperationVariable::new("renamed", TypedValue::Int(9))],
                });
                Ok(())
            }
            fn inout_validation(&self) -> ArgumentValidationMode {
                ArgumentValidationMode::None
            }
        }
        let mut inout = vec![OperationVariable::declared("x", Datatype::Int)];
        RenamingAdapter.invoke(Vec::new(), &mut inout).unwrap();
        assert_eq!(inout.len(), 1);
        assert_eq!(inout[0].id_short, "renamed");
        assert_eq!(inout[0].value, TypedValue::Int(9));
    }

    #[test]
    fn adapter_failure_surfaces_through_blocking_invoke() {
        struct FailingAdapter;
        impl AssetOperationProvider for FailingAdapter {
            fn invoke_async(
                &self,
                _input: Vec<OperationVariable>,
                _inout: Vec<OperationVariable>,
                callback: InvocationCallback,
            ) -> Result<(), AssetConnectionError> {
                callback(InvocationResult::Failure(
                    AssetConnectionError::connectivity("asset rejected the call"),
                ));
                Ok(())
            }
        }
        let err = FailingAdapter.invoke(Vec::new(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, AssetConnectionError::Connectivity { .. }));
    }

    #[test]
    fn never_completing_adapter_times_out_as_connectivity_failure() {
        struct StalledAdapter;
        impl AssetOperationProvider for StalledAdapter {
            fn invoke_async(
                &self,
                _input: Vec<OperationVariable>,
                _inout: Vec<OperationVariable>,
                _callback: InvocationCallback,
            ) -> Result<(), AssetConnectionError> {
                // Drops the callback without firing it.
                Ok(())
            }
            fn invoke_timeout(&self) -> Duration {
                Duration::from_millis(50)
            }
        }
        let err = StalledAdapter.invoke(Vec::new(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, AssetConnectionError::Connectivity { .. }));
    }
}

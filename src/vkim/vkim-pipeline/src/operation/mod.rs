/*
 * vKIM mail gateway
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use vkim_common::{
    re::{anyhow, tracing},
    GatewayError,
};

/// operations registered by the gateway itself
pub mod builtin;

/// Typed values shared by the steps of one pipeline invocation.
///
/// Keys are namespaced by the name of the step which reads them, so two
/// steps never collide.
#[derive(Default)]
pub struct OperationContext {
    values: std::collections::HashMap<String, Box<dyn std::any::Any + Send + Sync>>,
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys = self.values.keys().collect::<Vec<_>>();
        keys.sort();
        f.debug_struct("OperationContext")
            .field("keys", &keys)
            .finish()
    }
}

impl OperationContext {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(step: &str, key: &str) -> String {
        format!("{step}.{key}")
    }

    /// store `value`, replacing the previous one
    pub fn set<T: std::any::Any + Send + Sync>(&mut self, step: &str, key: &str, value: T) {
        self.values.insert(Self::key(step, key), Box::new(value));
    }

    /// the value, `None` if absent or of another type
    #[must_use]
    pub fn get<T: std::any::Any>(&self, step: &str, key: &str) -> Option<&T> {
        self.values
            .get(&Self::key(step, key))
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// remove the value, it is left in place if of another type
    pub fn take<T: std::any::Any>(&mut self, step: &str, key: &str) -> Option<T> {
        let key = Self::key(step, key);
        let value = self.values.remove(&key)?;
        match value.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(value) => {
                self.values.insert(key, value);
                None
            }
        }
    }

    ///
    #[must_use]
    pub fn contains(&self, step: &str, key: &str) -> bool {
        self.values.contains_key(&Self::key(step, key))
    }

    /// remove a mandatory value
    ///
    /// # Errors
    ///
    /// * the value is absent or of another type
    pub fn require<T: std::any::Any>(&mut self, step: &str, key: &str) -> Result<T, GatewayError> {
        self.take(step, key).ok_or_else(|| {
            GatewayError::InvalidArgument(format!("'{}' missing in the context", Self::key(step, key)))
        })
    }
}

/// Result of an operation: the context is handed back in both cases.
pub type OperationResult = Result<OperationContext, (OperationContext, GatewayError)>;

/// A named step of a pipeline.
#[async_trait::async_trait]
pub trait Operation: Send + Sync {
    /// namespace of the operation, `builtin` for the gateway's own
    fn vendor(&self) -> &str;

    ///
    fn name(&self) -> &str;

    /// run the step on `context`
    async fn execute(&self, context: OperationContext) -> OperationResult;
}

/// Run `operation` and call exactly one of the continuations, exactly once.
///
/// A panic of the operation is converted into a call to `on_fail`, without
/// context since it is lost with the unwinding.
pub async fn execute_with<R>(
    operation: &dyn Operation,
    context: OperationContext,
    on_ok: impl FnOnce(OperationContext) -> R + Send,
    on_fail: impl FnOnce(Option<OperationContext>, GatewayError) -> R + Send,
) -> R {
    let outcome =
        futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(operation.execute(context)))
            .await;

    match outcome {
        Ok(Ok(context)) => on_ok(context),
        Ok(Err((context, error))) => {
            tracing::debug!(
                vendor = operation.vendor(),
                name = operation.name(),
                %error,
                "operation failed"
            );
            on_fail(Some(context), error)
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::error!(
                vendor = operation.vendor(),
                name = operation.name(),
                %reason,
                "operation panicked"
            );
            on_fail(
                None,
                GatewayError::Collaborator(anyhow::anyhow!(
                    "operation '{}.{}' panicked: {reason}",
                    operation.vendor(),
                    operation.name()
                )),
            )
        }
    }
}

/// The operations available to the pipelines, keyed by (vendor, name).
///
/// Built once at startup from an explicit list, the uniqueness of the keys
/// is checked by [`OperationRegistry::validate`].
#[derive(Default, Clone)]
pub struct OperationRegistry {
    operations: Vec<std::sync::Arc<dyn Operation>>,
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

impl OperationRegistry {
    ///
    #[must_use]
    pub fn new(operations: Vec<std::sync::Arc<dyn Operation>>) -> Self {
        Self { operations }
    }

    /// add an operation, the registry must be validated afterwards
    #[must_use]
    pub fn with(mut self, operation: std::sync::Arc<dyn Operation>) -> Self {
        self.operations.push(operation);
        self
    }

    /// every `vendor.name` key, in registration order
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.operations
            .iter()
            .map(|op| format!("{}.{}", op.vendor(), op.name()))
            .collect()
    }

    /// The operation registered under (`vendor`, `name`).
    ///
    /// # Errors
    ///
    /// * [`GatewayError::NotFound`] if nothing is registered under the key
    /// * [`GatewayError::AmbiguousOperation`] if more than one operation is
    pub fn get(
        &self,
        vendor: &str,
        name: &str,
    ) -> Result<std::sync::Arc<dyn Operation>, GatewayError> {
        let mut found = self
            .operations
            .iter()
            .filter(|op| op.vendor() == vendor && op.name() == name);

        match (found.next(), found.count()) {
            (None, _) => Err(GatewayError::NotFound {
                vendor: vendor.to_string(),
                name: name.to_string(),
            }),
            (Some(op), 0) => Ok(op.clone()),
            (Some(_), more) => Err(GatewayError::AmbiguousOperation {
                vendor: vendor.to_string(),
                name: name.to_string(),
                count: more + 1,
            }),
        }
    }

    /// Check that every key is registered once.
    ///
    /// # Errors
    ///
    /// * [`GatewayError::AmbiguousOperation`] for the first duplicated key
    pub fn validate(&self) -> Result<(), GatewayError> {
        for op in &self.operations {
            self.get(op.vendor(), op.name())?;
        }
        Ok(())
    }

    ///
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

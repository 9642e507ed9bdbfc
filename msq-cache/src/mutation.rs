//! Mutations with optimistic write, retry, rollback and toasts.

use crate::key::KeyMatcher;
use crate::optimistic::OptimisticContext;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::QueryCache;
use msq_core::{CacheError, FetchError, Toast, ToastSink};
use serde_json::Value;
use std::future::Future;

/// What to do around a mutation request.
#[derive(Debug, Clone)]
pub struct MutationOptions {
    pub retry: RetryPolicy,
    /// Invalidated after success so observers refetch the server's truth.
    pub invalidate: Vec<KeyMatcher>,
    pub success_message: Option<String>,
    pub error_message: String,
    /// Replace the optimistic item with the response body on success.
    pub confirm_with_response: bool,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::mutation_default(),
            invalidate: Vec::new(),
            success_message: None,
            error_message: "Something went wrong".to_string(),
            confirm_with_response: false,
        }
    }
}

impl MutationOptions {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            ..Self::default()
        }
    }

    pub fn invalidating(mut self, matcher: KeyMatcher) -> Self {
        self.invalidate.push(matcher);
        self
    }

    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn confirm_with_response(mut self) -> Self {
        self.confirm_with_response = true;
        self
    }
}

/// Apply `optimistic`, send `request`, then confirm or roll back.
///
/// A failed optimistic write (e.g. the item is not cached) is logged and the
/// request still goes out. On failure the cache is restored and an error
/// toast is raised; the error is returned to the caller for inline display.
pub async fn run_mutation<O, R, Fut>(
    cache: &QueryCache,
    toasts: &dyn ToastSink,
    options: &MutationOptions,
    optimistic: O,
    request: R,
) -> Result<Value, FetchError>
where
    O: FnOnce(&QueryCache) -> Result<OptimisticContext, CacheError>,
    R: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, FetchError>>,
{
    let contexts = match optimistic(cache) {
        Ok(context) => vec![context],
        Err(err) => {
            tracing::warn!(error = %err, "Optimistic write skipped");
            Vec::new()
        }
    };
    run_mutation_with(cache, toasts, options, contexts, request).await
}

/// Like [`run_mutation`] for writes already applied to several keys.
///
/// Every context is settled before the invalidations run, so confirmed
/// entries still end up stale and get refetched.
pub async fn run_mutation_with<R, Fut>(
    cache: &QueryCache,
    toasts: &dyn ToastSink,
    options: &MutationOptions,
    contexts: Vec<OptimisticContext>,
    request: R,
) -> Result<Value, FetchError>
where
    R: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, FetchError>>,
{
    match with_retry(&options.retry, request).await {
        Ok(response) => {
            for context in contexts {
                let server_value = options.confirm_with_response.then(|| response.clone());
                context.confirm(cache, server_value);
            }
            for matcher in &options.invalidate {
                cache.invalidate(matcher);
            }
            if let Some(message) = &options.success_message {
                toasts.show(Toast::success(message));
            }
            Ok(response)
        }
        Err(err) => {
            // Newest write first, so overlapping keys end at their oldest value.
            for context in contexts.into_iter().rev() {
                context.rollback(cache);
            }
            tracing::warn!(error = %err, "Mutation failed");
            toasts.show(Toast::error(&options.error_message).with_description(describe(&err)));
            Err(err)
        }
    }
}

fn describe(err: &FetchError) -> String {
    match err {
        FetchError::Rejected { errors } => errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
        FetchError::Http { message, .. } if !message.is_empty() => message.clone(),
        other => other.to_string(),
    }
}

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::error::TdsFluentError;

/// Type-erased settlement value carried through a backend.
pub type ErasedValue = Box<dyn Any + Send>;

/// What a deferred settles with: the resolved value or the rejection error.
pub type Settlement = Result<ErasedValue, TdsFluentError>;

/// Consume-once settle side of one deferred pair.
pub trait DeferredHandle: Send {
    fn resolve(self: Box<Self>, value: ErasedValue);
    fn reject(self: Box<Self>, error: TdsFluentError);
}

/// A pluggable deferred implementation.
///
/// `defer()` hands back the settle side and the awaitable side of one
/// single-settlement pair. Two built-ins exist (`"tokio"` and `"futures"`);
/// callers may inject their own, which is validated at selection time.
pub trait PromiseBackend: Send + Sync {
    fn defer(&self) -> (Box<dyn DeferredHandle>, BoxFuture<'static, Settlement>);
}

/// Built-in backend over `tokio::sync::oneshot`.
pub struct TokioBackend;

struct TokioHandle(tokio::sync::oneshot::Sender<Settlement>);

impl DeferredHandle for TokioHandle {
    fn resolve(self: Box<Self>, value: ErasedValue) {
        let _ = self.0.send(Ok(value));
    }

    fn reject(self: Box<Self>, error: TdsFluentError) {
        let _ = self.0.send(Err(error));
    }
}

impl PromiseBackend for TokioBackend {
    fn defer(&self) -> (Box<dyn DeferredHandle>, BoxFuture<'static, Settlement>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let future = rx
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(TdsFluentError::PromiseError(
                        "Deferred was dropped before settling".to_string(),
                    ))
                })
            })
            .boxed();
        (Box::new(TokioHandle(tx)), future)
    }
}

/// Built-in backend over `futures_channel::oneshot`.
pub struct FuturesBackend;

struct FuturesHandle(futures_channel::oneshot::Sender<Settlement>);

impl DeferredHandle for FuturesHandle {
    fn resolve(self: Box<Self>, value: ErasedValue) {
        let _ = self.0.send(Ok(value));
    }

    fn reject(self: Box<Self>, error: TdsFluentError) {
        let _ = self.0.send(Err(error));
    }
}

impl PromiseBackend for FuturesBackend {
    fn defer(&self) -> (Box<dyn DeferredHandle>, BoxFuture<'static, Settlement>) {
        let (tx, rx) = futures_channel::oneshot::channel();
        let future = rx
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(TdsFluentError::PromiseError(
                        "Deferred was dropped before settling".to_string(),
                    ))
                })
            })
            .boxed();
        (Box::new(FuturesHandle(tx)), future)
    }
}

struct ValidationProbe;

/// A validated deferred implementation, chosen by name or injected.
#[derive(Clone)]
pub struct PromiseLibrary {
    name: String,
    backend: Arc<dyn PromiseBackend>,
}

impl fmt::Debug for PromiseLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseLibrary").field("name", &self.name).finish()
    }
}

impl Default for PromiseLibrary {
    fn default() -> Self {
        Self {
            name: "tokio".to_string(),
            backend: Arc::new(TokioBackend),
        }
    }
}

impl PromiseLibrary {
    /// Select one of the built-in backends by name (`"tokio"` or
    /// `"futures"`), validating it before use.
    ///
    /// # Errors
    /// `TdsFluentError::PromiseError` for an unknown name or a backend that
    /// fails validation.
    pub fn named(name: &str) -> Result<Self, TdsFluentError> {
        let backend: Arc<dyn PromiseBackend> = match name {
            "tokio" => Arc::new(TokioBackend),
            "futures" => Arc::new(FuturesBackend),
            other => {
                return Err(TdsFluentError::PromiseError(format!(
                    "Named promise library \"{other}\" not found"
                )));
            }
        };
        Self::custom(name, backend)
    }

    /// Wrap a caller-supplied backend, validating it now rather than at
    /// first use.
    ///
    /// # Errors
    /// `TdsFluentError::PromiseError` naming the capability that failed.
    pub fn custom(
        name: impl Into<String>,
        backend: Arc<dyn PromiseBackend>,
    ) -> Result<Self, TdsFluentError> {
        validate(backend.as_ref())?;
        Ok(Self {
            name: name.into(),
            backend,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mint a typed deferred pair from the backend.
    #[must_use]
    pub fn defer<T: Send + 'static>(&self) -> Deferred<T> {
        let (handle, future) = self.backend.defer();
        Deferred {
            handle,
            future,
            _marker: PhantomData,
        }
    }
}

/// One real resolve on a throwaway deferred, so a non-conforming backend is
/// caught at selection time instead of mid-query.
fn validate(backend: &dyn PromiseBackend) -> Result<(), TdsFluentError> {
    let (handle, future) = backend.defer();
    handle.resolve(Box::new(ValidationProbe));

    match future.now_or_never() {
        None => Err(TdsFluentError::PromiseError(
            "Promise backend validation failed: the deferred future did not settle \
             after resolve() was called"
                .to_string(),
        )),
        Some(Err(e)) => Err(TdsFluentError::PromiseError(format!(
            "Promise backend validation failed: resolve() settled the deferred with \
             an error: {e}"
        ))),
        Some(Ok(value)) => {
            if value.downcast::<ValidationProbe>().is_ok() {
                Ok(())
            } else {
                Err(TdsFluentError::PromiseError(
                    "Promise backend validation failed: the deferred settled with a \
                     value other than the one passed to resolve()"
                        .to_string(),
                ))
            }
        }
    }
}

/// A typed single-settlement pair bridging callback completion into a
/// future.
pub struct Deferred<T> {
    handle: Box<dyn DeferredHandle>,
    future: BoxFuture<'static, Settlement>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Deferred<T> {
    /// Split into the settle side and the awaitable side.
    #[must_use]
    pub fn split(self) -> (Settle<T>, DeferredFuture<T>) {
        (
            Settle {
                handle: self.handle,
                _marker: PhantomData,
            },
            DeferredFuture {
                inner: self.future,
                _marker: PhantomData,
            },
        )
    }
}

/// Consume-once typed settle handle.
pub struct Settle<T> {
    handle: Box<dyn DeferredHandle>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Settle<T> {
    pub fn resolve(self, value: T) {
        self.handle.resolve(Box::new(value));
    }

    pub fn reject(self, error: TdsFluentError) {
        self.handle.reject(error);
    }
}

/// The awaitable side of a typed deferred.
pub struct DeferredFuture<T> {
    inner: BoxFuture<'static, Settlement>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> DeferredFuture<T> {
    /// Await the settlement.
    ///
    /// # Errors
    /// The rejection error, or `TdsFluentError::PromiseError` if the backend
    /// delivered a value of an unexpected type.
    pub async fn wait(self) -> Result<T, TdsFluentError> {
        match self.inner.await {
            Ok(value) => value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
                TdsFluentError::PromiseError(
                    "Deferred resolved with an unexpected value type".to_string(),
                )
            }),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_backends_validate_and_settle() {
        for name in ["tokio", "futures"] {
            let lib = PromiseLibrary::named(name).unwrap();
            assert_eq!(lib.name(), name);

            let (settle, future) = lib.defer::<u32>().split();
            settle.resolve(17);
            let value = future.wait().now_or_never().unwrap().unwrap();
            assert_eq!(value, 17);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = PromiseLibrary::named("q").unwrap_err();
        assert!(err.to_string().contains("\"q\""));
    }

    #[test]
    fn backend_that_never_settles_fails_validation() {
        struct BrokenHandle;
        impl DeferredHandle for BrokenHandle {
            fn resolve(self: Box<Self>, _value: ErasedValue) {}
            fn reject(self: Box<Self>, _error: TdsFluentError) {}
        }

        struct BrokenBackend;
        impl PromiseBackend for BrokenBackend {
            fn defer(&self) -> (Box<dyn DeferredHandle>, BoxFuture<'static, Settlement>) {
                (Box::new(BrokenHandle), std::future::pending().boxed())
            }
        }

        let err = PromiseLibrary::custom("broken", Arc::new(BrokenBackend)).unwrap_err();
        assert!(err.to_string().contains("did not settle"));
    }

    #[test]
    fn rejection_reaches_the_future() {
        let lib = PromiseLibrary::default();
        let (settle, future) = lib.defer::<u32>().split();
        settle.reject(TdsFluentError::ExecutionError("boom".to_string()));
        let err = future.wait().now_or_never().unwrap().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}

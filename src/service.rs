//! Services: named method tables wrapped in before/after hook pipelines
//!
//! Every call runs the same pipeline:
//!
//! ```text
//! params ─► before hooks ─► method ─► normalize into params.result ─► after hooks ─► Reply
//! ```
//!
//! A method is registered as one of three variants ([`Method::sync`],
//! [`Method::deferred`], [`Method::feed`]). The variant is fixed at registration,
//! so calls never inspect the shape of a result to decide what it is.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::channel::ChannelEnd;
use crate::error::{RegistryError, RpcError};
use crate::hooks::{BoxFuture, Hook, HookChain};
use crate::params::{Params, Reply};

type SyncFn = Arc<dyn Fn(&mut Params) -> Result<Value, RpcError> + Send + Sync>;
type DeferredFn = Arc<dyn Fn(Params) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;
type FeedFn =
    Arc<dyn Fn(Params) -> BoxFuture<'static, Result<ChannelEnd, RpcError>> + Send + Sync>;

/// A registered method body
#[derive(Clone)]
pub enum Method {
    /// Computes its value immediately; may mutate the params it is given
    Sync(SyncFn),
    /// Produces its value later
    Deferred(DeferredFn),
    /// Produces a channel consumer handle (a push feed)
    Feed(FeedFn),
}

/// Which variant a method was registered as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Sync,
    Deferred,
    Feed,
}

impl Method {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut Params) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        Method::Sync(Arc::new(f))
    }

    /// Deferred methods receive a snapshot of the params after the before-hooks ran.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        Method::Deferred(Arc::new(
            move |params| -> BoxFuture<'static, Result<Value, RpcError>> { Box::pin(f(params)) },
        ))
    }

    pub fn feed<F, Fut>(f: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ChannelEnd, RpcError>> + Send + 'static,
    {
        Method::Feed(Arc::new(
            move |params| -> BoxFuture<'static, Result<ChannelEnd, RpcError>> {
                Box::pin(f(params))
            },
        ))
    }

    pub fn kind(&self) -> MethodKind {
        match self {
            Method::Sync(_) => MethodKind::Sync,
            Method::Deferred(_) => MethodKind::Deferred,
            Method::Feed(_) => MethodKind::Feed,
        }
    }

    /// Invoke the body and normalize its result.
    async fn invoke(&self, params: &mut Params) -> Result<Reply, RpcError> {
        match self {
            Method::Sync(f) => f(params).map(Reply::Value),
            Method::Deferred(f) => f(params.clone()).await.map(Reply::Value),
            Method::Feed(f) => f(params.clone()).await.map(Reply::Channel),
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method::{:?}", self.kind())
    }
}

/// A method bound to its hook chains, detached from the service that owns it.
///
/// This is the single call pipeline; [`Service::call`] and the callback form
/// [`WrappedMethod::call_with`] both run it.
#[derive(Clone, Debug)]
pub struct WrappedMethod {
    service: String,
    name: String,
    method: Method,
    before: HookChain<Params>,
    after: HookChain<Params>,
}

impl WrappedMethod {
    /// Run the pipeline. Missing params default to an empty record.
    pub async fn call(&self, params: Option<Params>) -> Result<Reply, RpcError> {
        let params = params.unwrap_or_default();

        let mut params = self.before.run(params).await?;

        let reply = self.method.invoke(&mut params).await?;
        let produced = reply.as_channel().cloned();
        params.result = Some(reply);

        match self.after.run(params).await {
            Ok(mut params) => Ok(params
                .take_result()
                .unwrap_or(Reply::Value(Value::Null))),
            Err(e) => {
                // Nobody will ever subscribe to a feed whose call failed
                if let Some(end) = produced {
                    end.force_close();
                }
                Err(e)
            }
        }
    }

    /// Callback form of [`call`](Self::call): runs the same pipeline on a new task
    /// and hands the outcome to `callback`.
    pub fn call_with<F>(&self, params: Option<Params>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Reply, RpcError>) + Send + 'static,
    {
        let wrapped = self.clone();
        tokio::spawn(async move { callback(wrapped.call(params).await) })
    }

    pub fn kind(&self) -> MethodKind {
        self.method.kind()
    }

    /// `"<service> <method>"`
    pub fn route(&self) -> String {
        format!("{} {}", self.service, self.name)
    }
}

/// A named collection of methods and their hooks
pub struct Service {
    name: String,
    methods: HashMap<String, Method>,
    before: HashMap<String, HookChain<Params>>,
    after: HashMap<String, HookChain<Params>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            before: HashMap::new(),
            after: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merge methods into the service.
    ///
    /// Fails without registering anything if any name is already taken, either
    /// by an existing method or twice within `methods`.
    pub fn extend<I, S>(&mut self, methods: I) -> Result<&mut Self, RegistryError>
    where
        I: IntoIterator<Item = (S, Method)>,
        S: Into<String>,
    {
        let methods: Vec<(String, Method)> =
            methods.into_iter().map(|(k, m)| (k.into(), m)).collect();

        for (i, (name, _)) in methods.iter().enumerate() {
            let repeated = methods[..i].iter().any(|(other, _)| other == name);
            if repeated || self.methods.contains_key(name) {
                return Err(RegistryError::DuplicateMethod {
                    service: self.name.clone(),
                    method: name.clone(),
                });
            }
        }

        for (name, method) in methods {
            tracing::debug!("Registered {} {} ({:?})", self.name, name, method.kind());
            self.methods.insert(name, method);
        }

        Ok(self)
    }

    /// Append hooks that run before `method`
    pub fn before<I>(&mut self, method: &str, hooks: I) -> Result<&mut Self, RegistryError>
    where
        I: IntoIterator<Item = Hook<Params>>,
    {
        self.ensure_registered(method)?;
        let chain = self.before.entry(method.to_string()).or_default();
        hooks.into_iter().for_each(|h| chain.push(h));
        Ok(self)
    }

    /// Append hooks that run after `method`
    pub fn after<I>(&mut self, method: &str, hooks: I) -> Result<&mut Self, RegistryError>
    where
        I: IntoIterator<Item = Hook<Params>>,
    {
        self.ensure_registered(method)?;
        let chain = self.after.entry(method.to_string()).or_default();
        hooks.into_iter().for_each(|h| chain.push(h));
        Ok(self)
    }

    fn ensure_registered(&self, method: &str) -> Result<(), RegistryError> {
        if self.methods.contains_key(method) {
            Ok(())
        } else {
            Err(RegistryError::UnregisteredHook {
                method: method.to_string(),
            })
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Sorted method names
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// The wrapped form of `method`, or `None` if it is not registered
    pub fn method(&self, method: &str) -> Option<WrappedMethod> {
        let body = self.methods.get(method)?;
        Some(WrappedMethod {
            service: self.name.clone(),
            name: method.to_string(),
            method: body.clone(),
            before: self.before.get(method).cloned().unwrap_or_default(),
            after: self.after.get(method).cloned().unwrap_or_default(),
        })
    }

    /// Call `method` through its hook pipeline
    pub async fn call(&self, method: &str, params: Option<Params>) -> Result<Reply, RpcError> {
        self.wrapped(method)?.call(params).await
    }

    /// Callback form of [`call`](Self::call)
    pub fn call_with<F>(&self, method: &str, params: Option<Params>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Reply, RpcError>) + Send + 'static,
    {
        match self.wrapped(method) {
            Ok(wrapped) => wrapped.call_with(params, callback),
            Err(e) => tokio::spawn(async move { callback(Err(e)) }),
        }
    }

    fn wrapped(&self, method: &str) -> Result<WrappedMethod, RpcError> {
        self.method(method).ok_or_else(|| {
            RpcError::bad_request(format!("Unknown method \"{} {}\"", self.name, method))
        })
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

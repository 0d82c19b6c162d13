//! ## AMF remoting service
//!
//! The dispatcher side of the gateway: a dispatch table built from the
//! reflection collaborator, the per-packet message handler with its
//! command state machine, the ACL engine, and parameter casting.
//!
//! The transport boundary is [`Service::serve`]: raw request bytes in,
//! raw response bytes out. A service holds per-engine value graphs and
//! is confined to one engine thread; callers that want parallelism run
//! a pool of services, one per thread, exactly as they would run a pool
//! of decoders.

pub mod acl;
pub mod cast;
pub mod dispatch;
pub mod handler;
pub mod messaging;
pub mod reflect;

use crate::{
    acl::Acl,
    dispatch::DispatchTable,
    reflect::{ClassReflection, FunctionReflection},
};

use bytes::Bytes;
use codec::TypeRegistry;
use parking_lot::RwLock;

#[derive(Debug)]
pub enum Error {
    DuplicateName(String),
    UnknownRole(String),
    UnknownResource(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The identity yielded by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub role: String,
    pub token: Option<String>,
}

/// The outcome of an authentication attempt.
#[derive(Debug, Default)]
pub struct AuthResult {
    pub valid: bool,
    pub identity: Option<Identity>,
    pub messages: Vec<String>,
    pub code: i32,
}

/// The authentication collaborator.
///
/// Owns the session identity; credential stores and identity backends
/// live behind this trait. Methods take `&self` so implementations keep
/// their session slot behind interior mutability.
pub trait Authenticator: Send + Sync {
    fn set_credentials(&self, userid: &str, password: &str);
    fn authenticate(&self) -> AuthResult;
    fn has_identity(&self) -> bool;
    fn get_identity(&self) -> Option<Identity>;
    fn clear_identity(&self);
}

/// The directory collaborator used to auto-register a class when a
/// dispatch lookup misses.
pub trait ClassLoader: Send + Sync {
    fn load(&self, class: &str) -> Option<ClassReflection>;
}

pub struct ServiceOptions<A> {
    pub authenticator: A,
    pub registry: TypeRegistry,
    /// Strip fault diagnostics from client-visible errors.
    pub production: bool,
    pub loader: Option<Box<dyn ClassLoader>>,
}

/// An AMF gateway engine.
///
/// The dispatch table and the ACL are read-heavy during dispatch and
/// edited rarely, so both sit behind a reader-writer lock.
pub struct Service<A> {
    pub(crate) dispatch: RwLock<DispatchTable>,
    pub(crate) acl: RwLock<Option<Acl>>,
    pub(crate) registry: TypeRegistry,
    pub(crate) authenticator: A,
    pub(crate) loader: Option<Box<dyn ClassLoader>>,
    pub(crate) production: bool,
}

impl<A> Service<A>
where
    A: Authenticator,
{
    pub fn new(options: ServiceOptions<A>) -> Self {
        Self {
            dispatch: RwLock::new(DispatchTable::new()),
            acl: RwLock::new(None),
            registry: options.registry,
            authenticator: options.authenticator,
            loader: options.loader,
            production: options.production,
        }
    }

    /// Register every method of a reflected class. A duplicate qualified
    /// name is a configuration error and fails immediately.
    pub fn register_class(
        &self,
        reflection: ClassReflection,
        namespace: Option<&str>,
    ) -> Result<(), Error> {
        self.dispatch.write().register_class(reflection, namespace)
    }

    /// Register a reflected free function.
    pub fn register_function(
        &self,
        reflection: FunctionReflection,
        namespace: Option<&str>,
    ) -> Result<(), Error> {
        self.dispatch
            .write()
            .register_function(reflection, namespace)
    }

    /// Attach an ACL; calls are checked against it from then on. With no
    /// ACL attached every dispatch is allowed.
    pub fn set_acl(&self, acl: Acl) {
        *self.acl.write() = Some(acl);
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }

    /// Handle one request packet.
    ///
    /// This is the whole transport boundary: a decode failure is fatal
    /// and yields `Err` with no response; everything past the envelope
    /// is folded into per-body error messages and the response envelope
    /// stays well-formed.
    pub fn serve(&self, bytes: &[u8]) -> Result<Bytes, codec::Error> {
        let request = codec::decode_packet(bytes, &self.registry)?;
        let response = handler::handle_packet(self, &request);
        codec::encode_packet(&response, &self.registry)
    }
}

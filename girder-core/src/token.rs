//! Provider identity and type-erased instances.
//!
//! Every participant in dependency injection (services, controllers, guards,
//! interceptors, pipes, modules) is addressed by a [`Token`]. The container
//! hands out [`Instance`] values, which are cheap to clone and can be
//! downcast back to the concrete type the factory produced.

use crate::{Guard, Interceptor, Pipe};
use compact_str::CompactString;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Stable identity used to look up a provider descriptor.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(CompactString);

impl Token {
    /// Create a token from a name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(CompactString::new(name.as_ref()))
    }

    /// Create a token named after a Rust type.
    ///
    /// ```
    /// use girder_core::Token;
    ///
    /// struct UserService;
    /// assert!(Token::of::<UserService>().as_str().ends_with("UserService"));
    /// ```
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Token {
    fn from(name: String) -> Self {
        Self(CompactString::from(name))
    }
}

impl From<&Token> for Token {
    fn from(token: &Token) -> Self {
        token.clone()
    }
}

/// Join tokens into a readable path such as `A -> B -> A`.
pub(crate) fn format_path(path: &[Token]) -> String {
    path.iter()
        .map(Token::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A live provider instance.
///
/// Cloning an `Instance` clones the handle, never the underlying value, so
/// identity comparisons with [`Instance::ptr_eq`] hold across clones.
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Instance {
    /// Wrap a value.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wrap a value that is already shared.
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wrap a guard so it can be resolved as `Arc<dyn Guard>`.
    pub fn guard<G: Guard + 'static>(guard: G) -> Self {
        Self::new(Arc::new(guard) as Arc<dyn Guard>)
    }

    /// Wrap an interceptor so it can be resolved as `Arc<dyn Interceptor>`.
    pub fn interceptor<I: Interceptor + 'static>(interceptor: I) -> Self {
        Self::new(Arc::new(interceptor) as Arc<dyn Interceptor>)
    }

    /// Wrap a pipe so it can be resolved as `Arc<dyn Pipe>`.
    pub fn pipe<P: Pipe + 'static>(pipe: P) -> Self {
        Self::new(Arc::new(pipe) as Arc<dyn Pipe>)
    }

    /// Downcast to the concrete type.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    /// Borrow as the concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Name of the type the instance was created from.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether both handles point at the same value.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.value), Arc::as_ptr(&other.value))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Pipeline stage types that can be recovered from an [`Instance`].
pub trait FromInstance: Send + Sync {
    /// Human-readable kind, used in diagnostics.
    const KIND: &'static str;

    fn from_instance(instance: &Instance) -> Option<Arc<Self>>;
}

impl FromInstance for dyn Guard {
    const KIND: &'static str = "guard";

    fn from_instance(instance: &Instance) -> Option<Arc<Self>> {
        instance.downcast_ref::<Arc<dyn Guard>>().cloned()
    }
}

impl FromInstance for dyn Interceptor {
    const KIND: &'static str = "interceptor";

    fn from_instance(instance: &Instance) -> Option<Arc<Self>> {
        instance.downcast_ref::<Arc<dyn Interceptor>>().cloned()
    }
}

impl FromInstance for dyn Pipe {
    const KIND: &'static str = "pipe";

    fn from_instance(instance: &Instance) -> Option<Arc<Self>> {
        instance.downcast_ref::<Arc<dyn Pipe>>().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_type() {
        struct Sample;
        let token = Token::of::<Sample>();
        assert!(token.as_str().ends_with("Sample"));
        assert_eq!(token, Token::of::<Sample>());
    }

    #[test]
    fn test_token_display_and_ordering() {
        let a = Token::from("a");
        let b = Token::from("b".to_string());
        assert!(a < b);
        assert_eq!(a.to_string(), "a");
        assert_eq!(format!("{:?}", a), "Token(a)");
    }

    #[test]
    fn test_format_path() {
        let path = vec![Token::from("A"), Token::from("B"), Token::from("A")];
        assert_eq!(format_path(&path), "A -> B -> A");
    }

    #[test]
    fn test_instance_downcast() {
        let instance = Instance::new(42u32);
        assert_eq!(*instance.downcast::<u32>().unwrap(), 42);
        assert!(instance.downcast::<i64>().is_none());
        assert_eq!(instance.type_name(), "u32");
    }

    #[test]
    fn test_instance_identity() {
        let a = Instance::new(String::from("x"));
        let b = a.clone();
        let c = Instance::new(String::from("x"));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }
}

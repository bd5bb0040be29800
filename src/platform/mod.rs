//! Platform Abstraction (§4.1, §4.2): one capability trait implemented by a
//! small closed set of backend adapters, resolved through a dispatcher rather
//! than any subclassing hierarchy.

pub mod adapter;
pub mod cloud_a;
pub mod cloud_b;
pub mod dispatcher;
pub mod onprem;

pub use adapter::{CloneSpec, Credential, ExecResult, PlatformAdapter, PowerOp};
pub use dispatcher::{PlatformDispatcher, PlatformDispatcherBuilder};

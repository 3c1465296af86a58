//! Client-side synchronisation: the reconciliation engine a browser editor runs,
//! usable from any Rust front end that talks to the socket API.

pub mod debounce;
pub mod reconcile;
pub mod session;

pub use debounce::Debouncer;
pub use reconcile::{
    EditorBuffer, FileListAction, LocalFlush, ReconcileEngine, RemoteApplyFlag, RemoteApplyGuard, RemotePlan,
    TextBuffer,
};
pub use session::{FileSink, SyncSession, TYPEWRITER_STEP};

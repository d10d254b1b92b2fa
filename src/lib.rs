//! Observe Workspace - end-to-end tests for the hot-reloadable observability runtime.
//!
//! This is a virtual package that provides workspace-level integration tests.
//! The actual functionality is provided by the workspace member crates:
//!
//! - `observe-config`: configuration types, layered loading, validation and digests
//! - `observe-runtime`: runtime instances, the reloading client, diagnostics and the
//!   `observe-agent` binary

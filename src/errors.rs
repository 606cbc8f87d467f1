//! Error Types
//!
//! This module defines the error types used throughout the core.
//!
//! # Overview
//!
//! [`GpuError`] covers the *recoverable* failure modes of the binding core:
//! backend refusals while applying queued resource operations, fence waits
//! that time out, and requests that reference missing or incompatible
//! resources.
//!
//! Two failure classes are deliberately **not** represented here:
//!
//! - Draw/dispatch validation failures are reported as an OR-combined
//!   [`DrawValidation`](crate::state::DrawValidation) bitmask so a single
//!   draw call can report every violated precondition at once.
//! - Structural usage bugs (popping an empty state stack, starting the same
//!   frame twice, two slots binding one resource in the same tick) panic
//!   immediately; they indicate a bug in the calling engine, not a runtime
//!   condition.

use thiserror::Error;

use crate::binding::SlotContainer;
use crate::resource::ResourceKey;

/// Error reported by a concrete backend through the
/// [`Device`](crate::backend::Device) trait.
///
/// The core never inspects the message; it only wraps it with the identity
/// of the resource the operation was applied against.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Result alias for backend trait methods.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// The main error type of the binding core.
#[derive(Debug, Error)]
pub enum GpuError {
    // ========================================================================
    // Resource application failures
    // ========================================================================
    /// The backend refused a mapping/copy/resize while draining a resource's
    /// pending-operation queue. Carries the offending resource's label since
    /// the operation cannot be retried blindly without caller awareness.
    #[error("resource '{label}' rejected a backend operation: {source}")]
    ResourceFault {
        /// Debug label of the resource the operation targeted.
        label: String,
        /// Underlying backend refusal.
        #[source]
        source: BackendError,
    },

    /// A queued read-back was invalidated by an earlier resize in the same
    /// drain pass.
    #[error("read-back on '{label}' invalidated by a preceding resize")]
    ReadInvalidated {
        /// Debug label of the resized resource.
        label: String,
    },

    // ========================================================================
    // Resource lifecycle errors
    // ========================================================================
    /// An operation referenced a resource that no longer exists in the arena.
    #[error("resource {0:?} does not exist")]
    MissingResource(ResourceKey),

    /// A writer pushed work against a resource that has been destroyed.
    #[error("resource was destroyed; pending work dropped")]
    ResourceDestroyed,

    /// A resource cannot be released while slots still hold bound
    /// back-references to it.
    #[error("resource '{label}' is still bound to {count} slot(s)")]
    ResourceStillBound {
        /// Debug label of the resource.
        label: String,
        /// Number of live back-references.
        count: usize,
    },

    /// The resource description is internally inconsistent (e.g. a shader
    /// carrying render-target bind flags).
    #[error("invalid description for resource '{label}': {reason}")]
    InvalidResourceDesc {
        /// Debug label of the resource.
        label: String,
        /// What was wrong with the description.
        reason: &'static str,
    },

    // ========================================================================
    // Binding errors
    // ========================================================================
    /// A resource was requested on a slot its kind or bind flags do not
    /// permit.
    #[error("resource '{label}' cannot be bound to a {container:?} slot")]
    IncompatibleBinding {
        /// Debug label of the resource.
        label: String,
        /// The slot container the request targeted.
        container: SlotContainer,
    },

    // ========================================================================
    // Scheduling & frame pacing errors
    // ========================================================================
    /// An `Apply`-priority task was pushed without a target resource.
    #[error("apply-priority task has no target resource")]
    TaskWithoutTarget,

    /// A task was pushed through a sender whose scheduler has shut down.
    #[error("task scheduler has shut down")]
    SchedulerShutDown,

    /// The fence gating a frame-ring slot did not signal within the
    /// requested timeout.
    #[error("fence for in-flight frame {frame_index} did not signal in time")]
    FenceTimeout {
        /// Frame index of the in-flight occupant that is still running.
        frame_index: u64,
    },
}

/// Result alias used by all public APIs of this crate.
pub type Result<T> = std::result::Result<T, GpuError>;

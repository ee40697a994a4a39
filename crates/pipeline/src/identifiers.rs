//! Identifier newtypes.
//!
//! Ids chosen by clients (nodes, workflows, users) wrap a `String`; ids minted
//! by this service (executions, reservations) wrap a [`Uuid`]. Keeping them
//! distinct stops a [`NodeId`] from being passed where a [`WorkflowId`] is
//! expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// string_id!: non-empty String newtype with as_str() and Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps `value`; `None` if it is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let value = value.into();
                (!value.is_empty()).then_some(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// uuid_id!: Copy UUID newtype minted with new_random().
// ---------------------------------------------------------------------------
macro_rules! uuid_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps a UUID read back from the datastore.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// UUID-backed identifiers
// ---------------------------------------------------------------------------

uuid_id! {
    /// Identifies one persisted execution of a workflow graph.
    ///
    /// Generated by the orchestrator when the run starts; it is the foreign key
    /// of every [`crate::NodeResult`] produced by that run.
    ExecutionId
}

uuid_id! {
    /// Identifies an outstanding quota slot reservation held by a run in flight.
    ReservationId
}

// ---------------------------------------------------------------------------
// String-backed identifiers (client supplied)
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a node within one submitted graph.
    ///
    /// Node ids are chosen by the graph editor and are only unique per graph.
    NodeId
}

string_id! {
    /// Identifies a saved workflow in the graph editor.
    ///
    /// Optional on requests: ad-hoc graphs run without one.
    WorkflowId
}

string_id! {
    /// Identifies an authenticated user as resolved by the session resolver.
    UserId
}

//! State enums stored as `TEXT` columns.
//!
//! Each variant's name matches the `CHECK` constraint of the corresponding
//! column in `db/migrations`. Conversion from the database string goes
//! through `TryFrom<String>` so models can use `#[sqlx(try_from = "String")]`.

use crate::error::CoreError;

macro_rules! define_state_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the database representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, CoreError> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        concat!("Unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, CoreError> {
                value.parse()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_state_enum! {
    /// Lifecycle of a queued task.
    TaskState {
        Pending = "pending",
        Processing = "processing",
        /// Enqueued behind an unfinished dependency.
        Waiting = "waiting",
        Finished = "finished",
        Failed = "failed",
    }
}

impl TaskState {
    /// States a claimer may pick up (dependency permitting).
    pub const ACTIONABLE: [TaskState; 2] = [TaskState::Pending, TaskState::Waiting];

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }
}

define_state_enum! {
    /// Lifecycle of a bulk import job.
    ImportJobState {
        Created = "created",
        WaitingForUpload = "waiting_for_upload",
        Processing = "processing",
        Finished = "finished",
        Rejected = "rejected",
        Deleted = "deleted",
    }
}

impl ImportJobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportJobState::Finished | ImportJobState::Rejected | ImportJobState::Deleted
        )
    }

    /// Whether the state machine permits `self -> to`.
    ///
    /// ```text
    /// created -> waiting_for_upload -> processing -> {finished | rejected}
    /// any non-processing state -> deleted
    /// ```
    pub fn can_transition_to(self, to: ImportJobState) -> bool {
        use ImportJobState::*;
        match (self, to) {
            (Created, WaitingForUpload) => true,
            (WaitingForUpload, Processing) => true,
            (Processing, Finished) | (Processing, Rejected) => true,
            (Processing, Deleted) | (Deleted, Deleted) => false,
            (_, Deleted) => true,
            _ => false,
        }
    }

    /// Check a transition, producing a `Conflict` error naming both states.
    pub fn ensure_transition(self, to: ImportJobState) -> Result<(), CoreError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Import job cannot move from '{self}' to '{to}'"
            )))
        }
    }
}

define_state_enum! {
    /// Conversion status of an uploaded row.
    StagingRowState {
        Pending = "pending",
        Imported = "imported",
        Error = "error",
    }
}

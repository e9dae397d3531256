// SPDX-License-Identifier: MIT OR Apache-2.0
//! arcnet-schema
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Versioned record registry for the ArcNet bus.
//!
//! Shapes are keyed by `{entity-kind, schema-version}`. The registry
//! exposes structural validation, upward migration (composed pairwise
//! steps), and the binary frame codec. Consumers call
//! [`SchemaRegistry::to_current`] and always observe entities at the
//! version they were compiled against.

/// Binary frame codec.
pub mod frame;
/// Pairwise migration steps.
mod migrations;
/// Structural validators per `{kind, version}`.
mod validators;

use arcnet_core::{EntityKind, WireEntity};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub use frame::{Frame, FrameError, FRAME_VERSION};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A single structural or range violation found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field.
    pub field: String,
    /// What was wrong with it.
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors surfaced by the registry.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// No shape registered for this `{kind, version}` pair.
    #[error("no schema registered for {kind} v{version}")]
    UnknownSchema {
        /// Entity kind that was looked up.
        kind: EntityKind,
        /// Version that was looked up.
        version: u32,
    },

    /// The value failed structural validation.
    #[error("validation failed for {kind} v{version}: {issues:?}")]
    Validation {
        /// Entity kind that was validated.
        kind: EntityKind,
        /// Version it was validated against.
        version: u32,
        /// Everything that was wrong.
        issues: Vec<ValidationIssue>,
    },

    /// No chain of registered migrations reaches the target version.
    #[error("no migration path for {kind} from v{from} to v{to}")]
    NoPath {
        /// Entity kind being migrated.
        kind: EntityKind,
        /// Version the value is at.
        from: u32,
        /// Version that was requested.
        to: u32,
    },

    /// Downgrades are not supported.
    #[error("cannot downgrade {kind} from v{from} to v{to}")]
    Downgrade {
        /// Entity kind being migrated.
        kind: EntityKind,
        /// Version the value is at.
        from: u32,
        /// Version that was requested.
        to: u32,
    },

    /// A migration step produced or received a malformed value.
    #[error("migration step for {kind} v{from} failed: {reason}")]
    MigrationFailed {
        /// Entity kind being migrated.
        kind: EntityKind,
        /// Version the failing step started from.
        from: u32,
        /// What went wrong.
        reason: String,
    },

    /// The payload could not be parsed or mapped onto the target type.
    #[error("payload decode failed for {kind}: {source}")]
    Decode {
        /// Entity kind being decoded.
        kind: EntityKind,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// SchemaRegistry
// ---------------------------------------------------------------------------

type Validator = Box<dyn Fn(&Value) -> Vec<ValidationIssue> + Send + Sync>;
type Migration = Box<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Registry of record shapes keyed by `{entity-kind, schema-version}`.
///
/// Holds one validator per registered shape and one migration per
/// `(kind, vN)` taking the value to `vN+1`. [`migrate`](Self::migrate)
/// composes steps; downgrades are rejected.
pub struct SchemaRegistry {
    validators: BTreeMap<(EntityKind, u32), Validator>,
    migrations: BTreeMap<(EntityKind, u32), Migration>,
    current: BTreeMap<EntityKind, u32>,
}

impl SchemaRegistry {
    /// An empty registry. Most callers want [`with_builtin`](Self::with_builtin).
    #[must_use]
    pub fn new() -> Self {
        Self {
            validators: BTreeMap::new(),
            migrations: BTreeMap::new(),
            current: BTreeMap::new(),
        }
    }

    /// The registry pre-loaded with every shape and migration this build
    /// knows about.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        validators::register_all(&mut reg);
        migrations::register_all(&mut reg);
        reg
    }

    /// Register a validator for `{kind, version}`, marking that version as
    /// current for the kind if it is the highest seen.
    pub fn register_validator<F>(&mut self, kind: EntityKind, version: u32, validator: F)
    where
        F: Fn(&Value) -> Vec<ValidationIssue> + Send + Sync + 'static,
    {
        self.validators.insert((kind, version), Box::new(validator));
        let entry = self.current.entry(kind).or_insert(version);
        if version > *entry {
            *entry = version;
        }
    }

    /// Register the migration taking `kind` values from `from_version` to
    /// `from_version + 1`.
    pub fn register_migration<F>(&mut self, kind: EntityKind, from_version: u32, step: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.migrations.insert((kind, from_version), Box::new(step));
    }

    /// The highest registered version for a kind, if any.
    #[must_use]
    pub fn current_version(&self, kind: EntityKind) -> Option<u32> {
        self.current.get(&kind).copied()
    }

    /// Structurally validate `value` against the shape registered for
    /// `{kind, version}`.
    pub fn validate(&self, kind: EntityKind, version: u32, value: &Value) -> Result<(), SchemaError> {
        let validator = self
            .validators
            .get(&(kind, version))
            .ok_or(SchemaError::UnknownSchema { kind, version })?;
        let issues = validator(value);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Validation {
                kind,
                version,
                issues,
            })
        }
    }

    /// Migrate `value` from `from_version` up to `target_version` by
    /// composing registered pairwise steps.
    ///
    /// Returns the value unchanged when it is already at the target.
    pub fn migrate(
        &self,
        kind: EntityKind,
        mut value: Value,
        from_version: u32,
        target_version: u32,
    ) -> Result<Value, SchemaError> {
        if from_version > target_version {
            return Err(SchemaError::Downgrade {
                kind,
                from: from_version,
                to: target_version,
            });
        }
        let mut at = from_version;
        while at < target_version {
            let step = self
                .migrations
                .get(&(kind, at))
                .ok_or(SchemaError::NoPath {
                    kind,
                    from: from_version,
                    to: target_version,
                })?;
            value = step(value).map_err(|reason| SchemaError::MigrationFailed {
                kind,
                from: at,
                reason,
            })?;
            at += 1;
            debug!(kind = %kind, version = at, "migrated record");
        }
        Ok(value)
    }

    /// Decode, migrate, and validate a payload into the entity type the
    /// consumer was compiled against.
    ///
    /// `declared_version` is what the producer stamped in the frame; the
    /// value is migrated up to [`WireEntity::CURRENT_VERSION`], validated
    /// at that version, and mapped onto `T`.
    pub fn to_current<T: WireEntity>(
        &self,
        value: Value,
        declared_version: u32,
    ) -> Result<T, SchemaError> {
        let migrated = self.migrate(T::KIND, value, declared_version, T::CURRENT_VERSION)?;
        self.validate(T::KIND, T::CURRENT_VERSION, &migrated)?;
        serde_json::from_value(migrated).map_err(|source| SchemaError::Decode {
            kind: T::KIND,
            source,
        })
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("shapes", &self.validators.keys().collect::<Vec<_>>())
            .field("migrations", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

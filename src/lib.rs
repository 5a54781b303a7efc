//! Familiar Versioned Objects
//!
//! A versioned object model for services that upgrade independently of each
//! other: objects are declared as schemas, serialised to a self-describing
//! primitive envelope, hydrated on receivers that may run an older or newer
//! schema, and backported for older receivers.
//!
//! ## Features
//!
//! - **Attribute Contract**: typed fields with defaults, nullability, read-only
//!   semantics, lazy loading and change tracking
//! - **Object Registry**: per-name version lists with compatible-version
//!   resolution
//! - **Primitive Codec**: `namespace`/`name`/`version`/`data`/`changes` envelopes
//! - **Backport Engine**: relationship tables rewrite nested objects for older
//!   receivers
//! - **Remote Indirection**: remotable methods run locally or through an
//!   [`Executor`], with version-skew recovery on decode
//!
//! ## Architecture
//!
//! ```text
//! SchemaBuilder ──build──► ObjectSchema ──register──► ObjectRegistry
//!                               │                         │ resolve
//!                          instantiate                    ▼
//!                               ▼                  from_primitive
//!                        VersionedObject ◄────────────────┘
//!                               │ to_primitive(target)
//!                               ▼
//!                        make_compatible ──► envelope
//! ```

pub mod checksum;
pub mod codec;
pub mod compat;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod fields;
pub mod fingerprint;
pub mod object;
pub mod registry;
pub mod remote;
pub mod schema;
pub mod serializer;
pub mod value;
pub mod version;
pub mod views;

pub use checksum::Checksum;
pub use codec::{is_envelope, Envelope, DEFAULT_NAMESPACE};
pub use config::ObjectsConfig;
pub use context::Context;
pub use definition::{load_definitions, register_definitions, SchemaDefinition};
pub use error::{ObjectError, Result};
pub use fields::{Field, FieldType, ObjectShape};
pub use fingerprint::VersionChecker;
pub use object::VersionedObject;
pub use registry::ObjectRegistry;
pub use remote::{
    ActionOutcome, CallArgs, CallMode, Executor, FieldUpdate, LoopbackExecutor, Remoting,
};
pub use schema::{ObjectSchema, Relationship, SchemaBuilder};
pub use serializer::ObjectSerializer;
pub use value::Value;
pub use version::ObjectVersion;
pub use views::{make_list, KeyedView, SequenceView};

//! Arbor – a hierarchical data-access layer with lazy fetching and offline
//! replay.
//!
//! Arbor centers on the *data service tree*: composite services dispatch
//! fetches to children by type name, and leaf services resolve them against
//! a concrete backend behind the [`raw::RawDataSource`] seam.
//! * A [`service::DataService`] is one node of the tree; the unparented
//!   root owns the object arena, the type registry, and the trigger caches.
//! * A [`stream::DataSelector`] names a type plus criteria and orderings.
//! * A [`stream::DataStream`] delivers fetched objects incrementally and
//!   doubles as a single-resolution future.
//! * A [`trigger::DataTrigger`] lazily fetches one relationship property,
//!   coalescing concurrent requests per (object, property).
//!
//! Tracked objects are plain `u64` handles into an arena owned by the root,
//! so object lifetime follows the root's lifecycle rather than external
//! references.
//!
//! ## Modules
//! * [`model`] – Descriptors for types and properties, the object arena,
//!   and the handle generator.
//! * [`expr`] – The expression seam used by criteria, orderings, and
//!   mappings, with a key-path compiler built in.
//! * [`stream`] – Selectors, criteria, and the data stream.
//! * [`trigger`] – Lazy per-property fetch interceptors.
//! * [`service`] – The service tree: dispatch, ingestion, property
//!   fetching, saving, and offline replay.
//! * [`raw`] – The raw source and mapping seams plus an in-memory source.
//! * [`http`] – An HTTP-backed raw source over a pluggable transport.
//! * [`offline`] – The offline operation log with SQLite persistence.
//! * [`authorize`] – Memoized credential acquisition per data module.
//! * [`settings`] – File- and environment-layered runtime settings.
//!
//! ## Quick Start
//! ```
//! use arbor::model::{DataObjectDescriptor, PropertyDescriptor};
//! use arbor::raw::MemorySource;
//! use arbor::service::DataService;
//! use serde_json::json;
//!
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!     .enable_all()
//!     .build()
//!     .unwrap();
//! runtime.block_on(async {
//!     let root = DataService::new("root");
//!     let source = MemorySource::new();
//!     if let serde_json::Value::Object(record) = json!({ "id": 1, "lastName": "Smith" }) {
//!         source.insert("Person", record);
//!     }
//!     let people = DataService::leaf("people", &["Person"], Box::new(source));
//!     root.add_child_service(&people);
//!     root.register_type(
//!         DataObjectDescriptor::new("Person")
//!             .with_property(PropertyDescriptor::primitive("id", "number"))
//!             .with_property(PropertyDescriptor::primitive("lastName", "string"))
//!             .with_identifier("id"),
//!     );
//!     let found = root.fetch_data("Person", None).completed().await.unwrap();
//!     assert_eq!(found.len(), 1);
//! });
//! ```
//!
//! ## Offline
//! Leaf sources may record fetched data and locally performed operations in
//! an [`offline::OfflineStore`]; when the tree goes back online the
//! operation log replays in nondecreasing `(last_modified, time, index)`
//! order. See [`offline::SqliteOfflineStore`] for the durable store.
//!
//! ## Status
//! The uniquing of raw records onto previously tracked objects is still
//! naive (a new object per record); expect that part of the API to evolve.

pub mod authorize;
pub mod error;
pub mod expr;
pub mod http;
pub mod model;
pub mod offline;
pub mod raw;
pub mod service;
pub mod settings;
pub mod stream;
pub mod trigger;

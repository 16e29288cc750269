//! # AeternusDB
//!
//! A multi-tenant, schema-aware columnar storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast ingestion and crash-safe operation across many independent
//! tenants sharing one on-disk store.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              Engine                                │
//! │  ┌────────────────┐   ┌────────────────┐   ┌───────────────────┐  │
//! │  │ Ingestion       │   │ Query           │   │ Compaction        │  │
//! │  │ Coordinator     │   │ Executor        │   │ Worker Pool       │  │
//! │  │ (per tenant:    │   │ (per tenant:    │   │ (leveled, L0..LN) │  │
//! │  │  active memtable│   │  memtables ∪    │   │                   │  │
//! │  │  + WAL, frozen  │   │  column files,  │   │                   │  │
//! │  │  queue)         │   │  MVCC resolve)  │   │                   │  │
//! │  └────────┬────────┘   └────────┬────────┘   └─────────┬─────────┘  │
//! │           │                     │                       │           │
//! │           └─────────────► Catalog (schemas, file inventory, snapshots) │
//! │                                        │                              │
//! │                                  BlockStore                           │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Multi-tenant ingestion coordinator, query executor, and engine handle |
//! | [`memtable`] | Per-tenant in-memory write buffer with multi-version entries and range tombstones |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`column_file`] | Immutable, sorted, on-disk column files with bloom filters and block indices |
//! | [`catalog`] | Journal-backed metadata store: file inventory, schemas, snapshots |
//! | [`schema`] | Versioned per-tenant schema definitions and evolution rules |
//! | [`compaction`] | Leveled compaction: trigger policy, job selection, and worker pool |
//! | [`block_store`] | Storage abstraction over a local filesystem (or any future backend) |
//! | [`encoding`] | Shared binary `Encode`/`Decode` primitives used by every on-disk format |
//!
//! ## Key Features
//!
//! - **Multi-tenancy** — every tenant gets its own memtable, WAL, and
//!   column-file namespace, while sharing one catalog and block store.
//! - **Schema-validated ingestion** — rows are checked against a tenant's
//!   latest registered schema before being admitted; evolutions are
//!   restricted to additive/widening changes.
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Multi-version concurrency** — multiple versions per key, ordered by
//!   sequence number; reads resolve against an explicit or latest snapshot.
//! - **Point and range tombstones** — efficient delete semantics for both
//!   individual keys and key ranges.
//! - **Bloom filter lookups** — each column file carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Block-level CRC32 integrity** — every on-disk block (WAL records,
//!   column-file data blocks, headers, footers) is checksummed.
//! - **Leveled compaction** — L0 through LN with geometric size growth,
//!   driven by a small worker pool that picks jobs independently per tenant.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colstrata::engine::{Engine, EngineConfig};
//! use colstrata::engine::utils::Value;
//! use colstrata::schema::{Column, ColumnType, Schema};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! // Register a schema for a tenant before writing to it.
//! let schema = Schema::new(
//!     "acme",
//!     1,
//!     vec![
//!         Column::new("name", ColumnType::String, false),
//!         Column::new("price", ColumnType::I64, true),
//!     ],
//! );
//! engine.catalog().put_schema(schema).unwrap();
//!
//! // Write
//! engine
//!     .ingestion()
//!     .put("acme", b"sku-1".to_vec(), vec![Value::String("bolt".into()), Value::I64(125)])
//!     .unwrap();
//!
//! // Read
//! let row = engine.query("acme").get(b"sku-1", None).unwrap();
//! assert!(row.is_some());
//!
//! // Delete
//! engine.ingestion().delete("acme", b"sku-1".to_vec()).unwrap();
//! assert!(engine.query("acme").get(b"sku-1", None).unwrap().is_none());
//!
//! // Background leveled compaction
//! engine.start_compaction(vec!["acme".to_string()]);
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod block_store;
pub mod catalog;
pub mod column_file;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod memtable;
pub mod schema;
pub mod wal;

//! Strata Storage -- rusqlite block store.
//!
//! Directory blocks are indexed by height, key Merkle root and full hash.
//! Dependent blocks and entries are keyed by (kind, lookup hash), the same
//! hash the parent block records. Values are the canonical block encodings.
//!
//! Missing items are `Ok(None)`; errors are reserved for the database itself
//! and for stored bytes that no longer decode.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use strata_blocks::{
    AdminBlock, Block, BlockError, BlockKind, DirectoryBlock, Entry, EntryBlock, EntryCreditBlock,
    FactoidBlock, Hash,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("block error: {0}")]
    Block(#[from] BlockError),
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: u32, found: u32 },
    #[error("lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA_VERSION: u32 = 1;

/// Block fetch/store interface used by the sync layer.
pub trait BlockStore: Send + Sync {
    /// Look up a directory block by key Merkle root or full hash.
    fn fetch_directory_block_by_hash(&self, hash: &Hash) -> Result<Option<DirectoryBlock>>;
    fn fetch_directory_block_by_height(&self, height: u32) -> Result<Option<DirectoryBlock>>;
    fn fetch_directory_block_height_by_key_mr(&self, key_mr: &Hash) -> Result<Option<u32>>;
    /// Key roots of stored directory blocks with `start <= height < end`,
    /// ascending. `None` runs to the tip.
    fn fetch_directory_block_height_range(&self, start: u32, end: Option<u32>)
        -> Result<Vec<Hash>>;

    fn fetch_admin_block_by_hash(&self, hash: &Hash) -> Result<Option<AdminBlock>>;
    fn fetch_entry_credit_block_by_hash(&self, hash: &Hash) -> Result<Option<EntryCreditBlock>>;
    fn fetch_factoid_block_by_hash(&self, hash: &Hash) -> Result<Option<FactoidBlock>>;
    fn fetch_entry_block_by_key_mr(&self, key_mr: &Hash) -> Result<Option<EntryBlock>>;
    fn fetch_entry_by_hash(&self, hash: &Hash) -> Result<Option<Entry>>;

    /// Height of the highest stored directory block.
    fn fetch_database_height(&self) -> Result<Option<u32>>;

    /// Store a directory block. Returns false if its height is already taken;
    /// the stored block wins.
    fn store_directory_block(&self, block: &DirectoryBlock) -> Result<bool>;
    /// Store any non-directory block or entry under its lookup hash.
    fn store_dependent(&self, block: &Block) -> Result<()>;

    fn store_block(&self, block: &Block) -> Result<bool> {
        match block {
            Block::Directory(d) => self.store_directory_block(d),
            other => self.store_dependent(other).map(|_| true),
        }
    }
}

/// SQLite-backed block store.
/// Connection wrapped in Mutex for Send + Sync (rusqlite Connection is !Sync).
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    fn db(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.db()?;
        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            conn.execute_batch(include_str!("schema_v1.sql"))?;
            tracing::info!(version = SCHEMA_VERSION, "storage: initialised schema");
        }

        let version: u32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);

        if version != SCHEMA_VERSION {
            return Err(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: version,
            });
        }
        Ok(())
    }

    fn fetch_dependent(&self, kind: BlockKind, hash: &Hash) -> Result<Option<Block>> {
        let conn = self.db()?;
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM dependent_blocks WHERE kind = ?1 AND hash = ?2",
                params![kind.as_str(), hash.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);
        data.map(|d| Block::unmarshal(kind, &d).map_err(StorageError::from))
            .transpose()
    }

    fn fetch_directory_where(
        &self,
        clause: &str,
        key: &dyn rusqlite::ToSql,
    ) -> Result<Option<DirectoryBlock>> {
        let conn = self.db()?;
        let sql = format!("SELECT data FROM directory_blocks WHERE {clause}");
        let data: Option<Vec<u8>> = conn
            .query_row(&sql, [key], |row| row.get(0))
            .optional()?;
        drop(conn);
        data.map(|d| DirectoryBlock::unmarshal(&d).map_err(StorageError::from))
            .transpose()
    }
}

macro_rules! typed_fetch {
    ($self:ident, $kind:expr, $hash:expr, $variant:path) => {
        match $self.fetch_dependent($kind, $hash)? {
            Some($variant(b)) => Ok(Some(b)),
            _ => Ok(None),
        }
    };
}

impl BlockStore for SqliteStore {
    fn fetch_directory_block_by_hash(&self, hash: &Hash) -> Result<Option<DirectoryBlock>> {
        let key = hash.as_bytes().to_vec();
        self.fetch_directory_where("key_mr = ?1 OR full_hash = ?1", &key)
    }

    fn fetch_directory_block_by_height(&self, height: u32) -> Result<Option<DirectoryBlock>> {
        self.fetch_directory_where("height = ?1", &height)
    }

    fn fetch_directory_block_height_by_key_mr(&self, key_mr: &Hash) -> Result<Option<u32>> {
        let conn = self.db()?;
        let height = conn
            .query_row(
                "SELECT height FROM directory_blocks WHERE key_mr = ?1",
                params![key_mr.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(height)
    }

    fn fetch_directory_block_height_range(
        &self,
        start: u32,
        end: Option<u32>,
    ) -> Result<Vec<Hash>> {
        let end = end.map(i64::from).unwrap_or(i64::MAX);
        let conn = self.db()?;
        let mut stmt = conn.prepare(
            "SELECT key_mr FROM directory_blocks WHERE height >= ?1 AND height < ?2 ORDER BY height",
        )?;
        let rows = stmt.query_map(params![i64::from(start), end], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Hash::from_slice(&row?)?);
        }
        Ok(out)
    }

    fn fetch_admin_block_by_hash(&self, hash: &Hash) -> Result<Option<AdminBlock>> {
        typed_fetch!(self, BlockKind::Admin, hash, Block::Admin)
    }

    fn fetch_entry_credit_block_by_hash(&self, hash: &Hash) -> Result<Option<EntryCreditBlock>> {
        typed_fetch!(self, BlockKind::EntryCredit, hash, Block::EntryCredit)
    }

    fn fetch_factoid_block_by_hash(&self, hash: &Hash) -> Result<Option<FactoidBlock>> {
        typed_fetch!(self, BlockKind::Factoid, hash, Block::Factoid)
    }

    fn fetch_entry_block_by_key_mr(&self, key_mr: &Hash) -> Result<Option<EntryBlock>> {
        typed_fetch!(self, BlockKind::EntryBlock, key_mr, Block::EntryBlock)
    }

    fn fetch_entry_by_hash(&self, hash: &Hash) -> Result<Option<Entry>> {
        typed_fetch!(self, BlockKind::Entry, hash, Block::Entry)
    }

    fn fetch_database_height(&self) -> Result<Option<u32>> {
        let conn = self.db()?;
        let height: Option<u32> =
            conn.query_row("SELECT MAX(height) FROM directory_blocks", [], |row| {
                row.get(0)
            })?;
        Ok(height)
    }

    fn store_directory_block(&self, block: &DirectoryBlock) -> Result<bool> {
        let data = block.marshal()?;
        let key_mr = block.key_mr()?;
        let full_hash = Hash::sha256(&data);
        let conn = self.db()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO directory_blocks (height, key_mr, full_hash, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                block.header.height,
                key_mr.as_bytes().as_slice(),
                full_hash.as_bytes().as_slice(),
                data
            ],
        )?;
        if inserted == 0 {
            tracing::debug!(
                height = block.header.height,
                key_mr = %key_mr.short(),
                "storage: directory block height already stored"
            );
        }
        Ok(inserted > 0)
    }

    fn store_dependent(&self, block: &Block) -> Result<()> {
        let hash = block.hash()?;
        let data = block.marshal()?;
        let conn = self.db()?;
        conn.execute(
            "INSERT OR IGNORE INTO dependent_blocks (kind, hash, data) VALUES (?1, ?2, ?3)",
            params![block.kind().as_str(), hash.as_bytes().as_slice(), data],
        )?;
        Ok(())
    }
}

use crate::utils::hex::canonical_address;
use alloy::primitives::Address;
use anyhow::Context;
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_LOCK_RETRIES: u32 = 6;
const BUSY_TIMEOUT_MS: u64 = 5_000;

const SELECT_COLUMNS: &str = "address, contract, balance, isopensource, createtime, createblock, txlast, isdecompiled, dedcode";

/// One discovered contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    /// Lowercase `0x`-prefixed hex.
    pub address: String,
    /// Verified source, or `0x`-prefixed bytecode hex.
    pub code: String,
    /// Ether with six fractional digits.
    pub balance: String,
    pub is_open_source: bool,
    /// Unix seconds.
    pub create_time: i64,
    pub create_block: u64,
    /// Unix seconds.
    pub tx_last: i64,
    pub is_decompiled: bool,
    pub decompiled_code: Option<String>,
}

impl ContractRecord {
    /// A freshly resolved contract. `tx_last` starts out equal to `create_time`
    /// and the decompilation fields are left empty.
    pub fn discovered(
        address: &Address,
        code: String,
        is_open_source: bool,
        balance: String,
        create_block: u64,
        create_time: i64,
    ) -> Self {
        Self {
            address: canonical_address(address),
            code,
            balance,
            is_open_source,
            create_time,
            create_block,
            tx_last: create_time,
            is_decompiled: false,
            decompiled_code: None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: row.get(0)?,
            code: row.get(1)?,
            balance: row.get(2)?,
            is_open_source: row.get::<_, i64>(3)? != 0,
            create_time: row.get(4)?,
            create_block: row.get::<_, i64>(5)?.max(0) as u64,
            tx_last: row.get(6)?,
            is_decompiled: row.get::<_, i64>(7)? != 0,
            decompiled_code: row.get(8)?,
        })
    }
}

pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| to_i64(d.as_secs()))
        .unwrap_or(0)
}

/// SQLite-backed contract table. Every call opens its own connection, so the
/// handle is cheap to clone into blocking tasks.
#[derive(Debug, Clone)]
pub struct ContractsDb {
    path: PathBuf,
}

impl ContractsDb {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> anyhow::Result<()> {
        self.with_connection("ensure_schema", |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS contracts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    address TEXT NOT NULL UNIQUE,
                    contract TEXT NOT NULL,
                    balance TEXT NOT NULL DEFAULT '0.000000',
                    isopensource INTEGER NOT NULL DEFAULT 0,
                    createtime INTEGER NOT NULL,
                    createblock INTEGER NOT NULL DEFAULT 0,
                    txlast INTEGER NOT NULL,
                    isdecompiled INTEGER NOT NULL DEFAULT 0,
                    dedcode TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_contracts_createblock ON contracts(createblock);
                "#,
            )?;
            let _ = conn.pragma_update(None, "journal_mode", "WAL");
            let _ = conn.pragma_update(None, "synchronous", "NORMAL");
            Ok(())
        })
    }

    pub fn contract_exists(&self, address: &Address) -> anyhow::Result<bool> {
        let key = canonical_address(address);
        self.with_connection("contract_exists", |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM contracts WHERE address = ?1)",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .map(|found| found != 0)
        })
    }

    /// Inserts `record`, or refreshes the mutable columns of an existing row.
    /// `createblock` and `createtime` keep their first-seen values.
    pub fn upsert_contract(&self, record: &ContractRecord) -> anyhow::Result<()> {
        self.with_connection("upsert_contract", |conn| {
            conn.execute(
                r#"
                INSERT INTO contracts (
                    address, contract, balance, isopensource,
                    createtime, createblock, txlast, isdecompiled, dedcode
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(address) DO UPDATE SET
                    contract = excluded.contract,
                    balance = excluded.balance,
                    isopensource = excluded.isopensource,
                    txlast = excluded.txlast,
                    isdecompiled = excluded.isdecompiled,
                    dedcode = excluded.dedcode
                "#,
                params![
                    record.address.to_ascii_lowercase(),
                    record.code,
                    record.balance,
                    record.is_open_source as i64,
                    record.create_time,
                    to_i64(record.create_block),
                    record.tx_last,
                    record.is_decompiled as i64,
                    record.decompiled_code,
                ],
            )?;
            Ok(())
        })
    }

    /// Highest recorded `createblock`, or 0 for an empty table.
    pub fn max_create_block(&self) -> anyhow::Result<u64> {
        self.with_connection("max_create_block", |conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(createblock), 0) FROM contracts",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| v.max(0) as u64)
        })
    }

    pub fn has_contract_in_block(&self, block: u64) -> anyhow::Result<bool> {
        self.with_connection("has_contract_in_block", |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM contracts WHERE createblock = ?1)",
                params![to_i64(block)],
                |row| row.get::<_, i64>(0),
            )
            .map(|found| found != 0)
        })
    }

    pub fn get(&self, address: &Address) -> anyhow::Result<Option<ContractRecord>> {
        let key = canonical_address(address);
        let sql = format!("SELECT {SELECT_COLUMNS} FROM contracts WHERE address = ?1");
        self.with_connection("get_contract", |conn| {
            conn.query_row(&sql, params![key], ContractRecord::from_row)
                .optional()
        })
    }

    /// Records in insertion order. `limit == 0` returns every row.
    pub fn contracts(&self, limit: usize) -> anyhow::Result<Vec<ContractRecord>> {
        let sql = if limit == 0 {
            format!("SELECT {SELECT_COLUMNS} FROM contracts ORDER BY id ASC")
        } else {
            format!("SELECT {SELECT_COLUMNS} FROM contracts ORDER BY id ASC LIMIT {limit}")
        };
        self.with_connection("list_contracts", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], ContractRecord::from_row)?;
            rows.collect()
        })
    }

    /// Records for the given addresses, skipping unknown ones.
    pub fn contracts_by_addresses(
        &self,
        addresses: &[Address],
    ) -> anyhow::Result<Vec<ContractRecord>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = addresses.iter().map(canonical_address).collect();
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM contracts WHERE address IN ({placeholders}) ORDER BY id ASC"
        );
        self.with_connection("contracts_by_addresses", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(keys.iter()), ContractRecord::from_row)?;
            rows.collect()
        })
    }

    pub fn count(&self) -> anyhow::Result<u64> {
        self.with_connection("count_contracts", |conn| {
            conn.query_row("SELECT COUNT(*) FROM contracts", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|v| v.max(0) as u64)
        })
    }

    fn with_connection<T, F>(&self, context: &str, op: F) -> anyhow::Result<T>
    where
        F: Fn(&Connection) -> rusqlite::Result<T>,
    {
        let mut last_err = String::new();

        for attempt in 1..=MAX_LOCK_RETRIES {
            let conn = Connection::open(&self.path).with_context(|| {
                format!("failed to open sqlite database {}", self.path.display())
            })?;
            conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
                .context("failed to configure sqlite busy timeout")?;

            match op(&conn) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_err = err.to_string();
                    if is_sqlite_locked_error(&err) && attempt < MAX_LOCK_RETRIES {
                        continue;
                    }
                    return Err(anyhow::anyhow!(
                        "{} failed for {}: {}",
                        context,
                        self.path.display(),
                        last_err
                    ));
                }
            }
        }

        Err(anyhow::anyhow!(
            "{} failed for {} after {} attempt(s): {}",
            context,
            self.path.display(),
            MAX_LOCK_RETRIES,
            last_err
        ))
    }
}

fn to_i64(v: u64) -> i64 {
    v.min(i64::MAX as u64) as i64
}

fn is_sqlite_locked_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
        }
        _ => {
            let msg = err.to_string().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
    }
}

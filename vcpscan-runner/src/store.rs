//! Durable dedup/cooldown state and the append-only signal log.
//!
//! Both tables live in one SQLite database. Every publish runs inside a single
//! `BEGIN IMMEDIATE` transaction, so the checks and both writes are serialized
//! against any other writer of the same file.
//!
//! The per-day cap reads the append-only `signals` log, never `dedup_state`:
//! a dedup row only remembers the day of its latest publish, so a late event
//! for an earlier day would slip past it.
//!
//! Tables:
//! - `dedup_state(dedupe_key PK, cooldown_until_ts, last_symbol_day, updated_ts)`
//! - `signals(event_id PK, dedupe_key, exchange, symbol, timeframe, ts, day,
//!   signal_type, score, tags, summary, published_ts, payload)`

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vcpscan_core::domain::{ms_to_datetime, SignalEvent, SignalType, Timeframe};

const MS_PER_HOUR: i64 = 3_600 * 1_000;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt row for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// True for `SQLITE_BUSY` / `SQLITE_LOCKED`, the only errors worth retrying.
    pub fn is_busy(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// One row of `dedup_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupState {
    pub dedupe_key: String,
    pub cooldown_until_ts: i64,
    /// `exchange:symbol:YYYY-MM-DD` of the last publish under this key.
    pub last_symbol_day: String,
}

/// Why a gate-passing signal was not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DuplicateReason {
    /// Something already published for this exchange + symbol on the event's UTC day.
    SymbolDay { symbol_day: String },
    /// The dedupe key is still cooling down.
    Cooldown { until_ts: i64 },
    /// The exact event id is already in the log.
    SameEvent,
}

/// Result of a publish attempt that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    Duplicate(DuplicateReason),
}

/// A published signal as read back from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSignal {
    pub event_id: String,
    pub dedupe_key: String,
    pub score: u8,
    pub tags: Vec<String>,
    pub summary: String,
    pub published_ts: i64,
    pub event: SignalEvent,
}

/// `exchange:symbol:YYYY-MM-DD` for the UTC day of `ts`.
pub fn symbol_day(exchange: &str, symbol: &str, ts: i64) -> String {
    format!("{exchange}:{symbol}:{}", ms_to_datetime(ts).date_naive())
}

/// SQLite-backed dedup store and signal log.
pub struct SignalStore {
    conn: Connection,
}

impl SignalStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Isolated in-memory store, used by replay runs and tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dedup_state (
                 dedupe_key        TEXT    PRIMARY KEY,
                 cooldown_until_ts INTEGER NOT NULL,
                 last_symbol_day   TEXT    NOT NULL,
                 updated_ts        INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS signals (
                 event_id     TEXT    PRIMARY KEY,
                 dedupe_key   TEXT    NOT NULL,
                 exchange     TEXT    NOT NULL,
                 symbol       TEXT    NOT NULL,
                 timeframe    TEXT    NOT NULL,
                 ts           INTEGER NOT NULL,
                 day          TEXT    NOT NULL,
                 signal_type  TEXT    NOT NULL,
                 score        INTEGER NOT NULL,
                 tags         TEXT    NOT NULL,
                 summary      TEXT    NOT NULL,
                 published_ts INTEGER NOT NULL,
                 payload      TEXT    NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_signals_lookup
                 ON signals(exchange, symbol, timeframe, signal_type, ts);
             CREATE INDEX IF NOT EXISTS idx_signals_day ON signals(day);
             CREATE INDEX IF NOT EXISTS idx_signals_symbol_day
                 ON signals(exchange, symbol, day);",
        )?;
        Ok(Self { conn })
    }

    /// How long a write waits on another connection's lock before failing
    /// with `SQLITE_BUSY`.
    pub fn with_busy_timeout(self, timeout: Duration) -> Result<Self, StoreError> {
        self.conn.busy_timeout(timeout)?;
        Ok(self)
    }

    /// Check the day cap and cooldown for `event`, then record it.
    ///
    /// `now_ms` is the publish clock: live scans pass wall time, replays pass the
    /// event time. Nothing is written when a duplicate is detected.
    pub fn try_publish(
        &mut self,
        event: &SignalEvent,
        tags: &[String],
        now_ms: i64,
        cooldown_hours: u32,
    ) -> Result<StoreOutcome, StoreError> {
        let day = ms_to_datetime(event.ts).date_naive().to_string();
        let day_key = symbol_day(&event.exchange, &event.symbol, event.ts);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let same_event: bool = tx
            .query_row(
                "SELECT 1 FROM signals WHERE event_id = ?1",
                params![event.event_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if same_event {
            return Ok(StoreOutcome::Duplicate(DuplicateReason::SameEvent));
        }

        let published_today = tx
            .query_row(
                "SELECT 1 FROM signals WHERE exchange = ?1 AND symbol = ?2 AND day = ?3 LIMIT 1",
                params![event.exchange, event.symbol, day],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if published_today {
            return Ok(StoreOutcome::Duplicate(DuplicateReason::SymbolDay {
                symbol_day: day_key,
            }));
        }

        let cooldown_until: Option<i64> = tx
            .query_row(
                "SELECT cooldown_until_ts FROM dedup_state WHERE dedupe_key = ?1",
                params![event.dedupe_key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(until_ts) = cooldown_until.filter(|&until| now_ms < until) {
            return Ok(StoreOutcome::Duplicate(DuplicateReason::Cooldown { until_ts }));
        }

        let until = now_ms + i64::from(cooldown_hours) * MS_PER_HOUR;
        tx.execute(
            "INSERT INTO dedup_state (dedupe_key, cooldown_until_ts, last_symbol_day, updated_ts)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(dedupe_key) DO UPDATE SET
                 cooldown_until_ts = excluded.cooldown_until_ts,
                 last_symbol_day   = excluded.last_symbol_day,
                 updated_ts        = excluded.updated_ts",
            params![event.dedupe_key, until, day_key, now_ms],
        )?;

        let payload = serde_json::to_string(event)?;
        let tags_json = serde_json::to_string(tags)?;
        tx.execute(
            "INSERT INTO signals (event_id, dedupe_key, exchange, symbol, timeframe, ts, day,
                                  signal_type, score, tags, summary, published_ts, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                event.event_id,
                event.dedupe_key,
                event.exchange,
                event.symbol,
                event.timeframe.as_str(),
                event.ts,
                day,
                event.signal_type().as_str(),
                event.score,
                tags_json,
                event.summary(),
                now_ms,
                payload,
            ],
        )?;
        tx.commit()?;
        Ok(StoreOutcome::Inserted)
    }

    pub fn dedup_state(&self, dedupe_key: &str) -> Result<Option<DedupState>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT dedupe_key, cooldown_until_ts, last_symbol_day
                 FROM dedup_state WHERE dedupe_key = ?1",
                params![dedupe_key],
                |row| {
                    Ok(DedupState {
                        dedupe_key: row.get(0)?,
                        cooldown_until_ts: row.get(1)?,
                        last_symbol_day: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn signal_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Published BREAKOUTs for one series with `ts >= since_ts`, oldest first.
    /// These seed the retest check.
    pub fn recent_breakouts(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        since_ts: i64,
    ) -> Result<Vec<SignalEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, payload FROM signals
             WHERE exchange = ?1 AND symbol = ?2 AND timeframe = ?3
               AND signal_type = ?4 AND ts >= ?5
             ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(
            params![
                exchange,
                symbol,
                timeframe.as_str(),
                SignalType::Breakout.as_str(),
                since_ts
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        let mut events = Vec::new();
        for row in rows {
            let (event_id, payload) = row?;
            events.push(decode_payload(&event_id, &payload)?);
        }
        Ok(events)
    }

    /// Most recently published signals, newest first.
    pub fn recent_signals(&self, limit: usize) -> Result<Vec<StoredSignal>, StoreError> {
        self.query_signals(
            "SELECT event_id, dedupe_key, score, tags, summary, published_ts, payload
             FROM signals ORDER BY ts DESC, event_id ASC LIMIT ?1",
            params![limit as i64],
        )
    }

    /// Every signal whose event fell on `day` (UTC), oldest first.
    pub fn signals_for_day(&self, day: NaiveDate) -> Result<Vec<StoredSignal>, StoreError> {
        self.query_signals(
            "SELECT event_id, dedupe_key, score, tags, summary, published_ts, payload
             FROM signals WHERE day = ?1 ORDER BY ts ASC, event_id ASC",
            params![day.to_string()],
        )
    }

    fn query_signals(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<StoredSignal>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (event_id, dedupe_key, score, tags, summary, published_ts, payload) = row?;
            let event = decode_payload(&event_id, &payload)?;
            out.push(StoredSignal {
                score: u8::try_from(score).map_err(|_| StoreError::Corrupt {
                    key: event_id.clone(),
                    reason: format!("score {score} out of range"),
                })?,
                tags: serde_json::from_str(&tags)?,
                event_id,
                dedupe_key,
                summary,
                published_ts,
                event,
            });
        }
        Ok(out)
    }
}

fn decode_payload(event_id: &str, payload: &str) -> Result<SignalEvent, StoreError> {
    let event: SignalEvent = serde_json::from_str(payload)?;
    if event.event_id != event_id {
        return Err(StoreError::Corrupt {
            key: event_id.to_string(),
            reason: format!("payload carries event id {}", event.event_id),
        });
    }
    Ok(event)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn tags() -> Vec<String> {
        vec!["4h".into(), "BREAKOUT".into()]
    }

    #[test]
    fn first_publish_inserts_and_sets_cooldown() {
        let mut store = SignalStore::in_memory().unwrap();
        let ev = breakout("SOLUSDT", DAY0, 100.0, 80);

        let out = store.try_publish(&ev, &tags(), DAY0, 24).unwrap();
        assert_eq!(out, StoreOutcome::Inserted);
        assert_eq!(store.signal_count().unwrap(), 1);

        let state = store.dedup_state(&ev.dedupe_key).unwrap().unwrap();
        assert_eq!(state.cooldown_until_ts, DAY0 + 24 * HOUR);
        assert_eq!(state.last_symbol_day, "binance:SOLUSDT:2024-01-02");
    }

    #[test]
    fn same_key_within_cooldown_is_rejected() {
        let mut store = SignalStore::in_memory().unwrap();
        store
            .try_publish(&breakout("SOLUSDT", DAY0, 100.0, 80), &tags(), DAY0, 24)
            .unwrap();

        // Next UTC day, still inside the 24h window.
        let later = breakout("SOLUSDT", DAY0 + 24 * HOUR, 100.0, 80);
        let out = store.try_publish(&later, &tags(), DAY0 + 23 * HOUR, 24).unwrap();
        assert!(matches!(
            out,
            StoreOutcome::Duplicate(DuplicateReason::Cooldown { .. })
        ));
        assert_eq!(store.signal_count().unwrap(), 1);
    }

    #[test]
    fn same_key_after_cooldown_publishes() {
        let mut store = SignalStore::in_memory().unwrap();
        store
            .try_publish(&breakout("SOLUSDT", DAY0, 100.0, 80), &tags(), DAY0, 24)
            .unwrap();

        let later = breakout("SOLUSDT", DAY0 + 48 * HOUR, 100.0, 80);
        let out = store.try_publish(&later, &tags(), DAY0 + 48 * HOUR, 24).unwrap();
        assert_eq!(out, StoreOutcome::Inserted);
        assert_eq!(store.signal_count().unwrap(), 2);
    }

    #[test]
    fn second_key_same_symbol_same_day_is_capped() {
        let mut store = SignalStore::in_memory().unwrap();
        store
            .try_publish(&breakout("SOLUSDT", DAY0, 100.0, 80), &tags(), DAY0, 24)
            .unwrap();

        // Different pivot → different dedupe key, same UTC day.
        let other = breakout("SOLUSDT", DAY0 + 8 * HOUR, 250.0, 90);
        let out = store.try_publish(&other, &tags(), DAY0 + 8 * HOUR, 24).unwrap();
        assert_eq!(
            out,
            StoreOutcome::Duplicate(DuplicateReason::SymbolDay {
                symbol_day: "binance:SOLUSDT:2024-01-02".into()
            })
        );

        // A different symbol the same day is unaffected.
        let eth = breakout("ETHUSDT", DAY0 + 8 * HOUR, 2_000.0, 80);
        assert_eq!(
            store.try_publish(&eth, &tags(), DAY0 + 8 * HOUR, 24).unwrap(),
            StoreOutcome::Inserted
        );
    }

    #[test]
    fn late_event_for_an_earlier_day_is_capped() {
        // GIVEN: SOL published on day D, then the same key again on D+1,
        // which moves the key's dedup row to D+1.
        let mut store = SignalStore::in_memory().unwrap();
        let first = breakout("SOLUSDT", DAY0 + 4 * HOUR, 100.0, 80);
        assert_eq!(
            store.try_publish(&first, &tags(), DAY0 + 4 * HOUR, 24).unwrap(),
            StoreOutcome::Inserted
        );
        let again = breakout("SOLUSDT", DAY0 + 28 * HOUR, 100.0, 80);
        assert_eq!(
            store.try_publish(&again, &tags(), DAY0 + 28 * HOUR, 24).unwrap(),
            StoreOutcome::Inserted
        );
        assert_eq!(
            store.dedup_state(&first.dedupe_key).unwrap().unwrap().last_symbol_day,
            "binance:SOLUSDT:2024-01-03"
        );

        // WHEN: a different setup stamped at D 00:00 arrives late.
        let late = breakout("SOLUSDT", DAY0, 250.0, 90);
        assert_ne!(late.dedupe_key, first.dedupe_key);
        let out = store.try_publish(&late, &tags(), DAY0 + 28 * HOUR, 24).unwrap();

        // THEN: day D already has its signal.
        assert_eq!(
            out,
            StoreOutcome::Duplicate(DuplicateReason::SymbolDay {
                symbol_day: "binance:SOLUSDT:2024-01-02".into()
            })
        );
        let day = ms_to_datetime(DAY0).date_naive();
        assert_eq!(store.signals_for_day(day).unwrap().len(), 1);
        assert_eq!(store.signal_count().unwrap(), 2);
    }

    #[test]
    fn same_event_is_rejected() {
        let mut store = SignalStore::in_memory().unwrap();
        let ev = breakout("SOLUSDT", DAY0, 100.0, 80);
        store.try_publish(&ev, &tags(), DAY0, 0).unwrap();
        assert_eq!(
            store.try_publish(&ev, &tags(), DAY0 + 72 * HOUR, 0).unwrap(),
            StoreOutcome::Duplicate(DuplicateReason::SameEvent)
        );
    }

    #[test]
    fn queries_read_back_payloads() {
        let mut store = SignalStore::in_memory().unwrap();
        let bo = breakout("SOLUSDT", DAY0, 100.0, 80);
        store.try_publish(&bo, &tags(), DAY0, 24).unwrap();
        let rt = retest("SOLUSDT", DAY0 + 28 * HOUR, DAY0, 100.0, 75);
        store.try_publish(&rt, &["RETEST_OK".into()], DAY0 + 28 * HOUR, 48).unwrap();

        let breakouts = store
            .recent_breakouts("binance", "SOLUSDT", Timeframe::H4, DAY0 - HOUR)
            .unwrap();
        assert_eq!(breakouts.len(), 1);
        assert_eq!(breakouts[0].event_id, bo.event_id);
        assert_eq!(breakouts[0].signal_type(), SignalType::Breakout);
        assert!(store
            .recent_breakouts("binance", "SOLUSDT", Timeframe::H4, DAY0 + HOUR)
            .unwrap()
            .is_empty());

        let recent = store.recent_signals(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_id, rt.event_id);
        assert_eq!(recent[0].tags, vec!["RETEST_OK".to_string()]);

        let day = ms_to_datetime(DAY0).date_naive();
        let today = store.signals_for_day(day).unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].event.event_id, bo.event_id);
        assert!(today[0].summary.starts_with("SOLUSDT 4h BREAKOUT"));
    }

    #[test]
    fn busy_detection() {
        let busy = StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_busy());
        let other = StoreError::Corrupt {
            key: "k".into(),
            reason: "r".into(),
        };
        assert!(!other.is_busy());
    }
}

//! Event classifier and transaction tracker
//!
//! The single sequential stage between a source and the concurrent rest of
//! the pipeline. For every event, in log order: track the latest table-map
//! position, apply the filters, update the transaction tracker, admit
//! qualifying row events as envelopes (assigning their sequence index), and
//! emit a statistics record. Shared unchanged by both source implementations.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::binlog::event::{BinlogEvent, RowKind, RowsChange};
use crate::common::error::Result;
use crate::common::filter::{EventFilter, FilterDecision};
use crate::common::transaction::TransactionTracker;
use crate::pipeline::envelope::{EventEnvelope, StatKind, StatsRecord};
use crate::schema::store::SchemaStore;
use crate::source::{EventSource, SourcedEvent};

/// Classifier over one event source.
pub struct Classifier {
    filter: EventFilter,
    schema: Arc<SchemaStore>,
    /// Row envelopes are only built when SQL output is requested.
    emit_rows: bool,
    envelope_tx: Option<mpsc::Sender<EventEnvelope>>,
    stats_tx: mpsc::Sender<StatsRecord>,
    tracker: TransactionTracker,
    table_map_offset: u64,
    sequence: u64,
}

impl Classifier {
    pub fn new(
        filter: EventFilter,
        schema: Arc<SchemaStore>,
        envelope_tx: Option<mpsc::Sender<EventEnvelope>>,
        stats_tx: mpsc::Sender<StatsRecord>,
    ) -> Self {
        Self {
            filter,
            schema,
            emit_rows: envelope_tx.is_some(),
            envelope_tx,
            stats_tx,
            tracker: TransactionTracker::new(),
            table_map_offset: 0,
            sequence: 0,
        }
    }

    /// Drain `source` to completion. Returns the number of admitted
    /// envelopes. Dropping the held senders on return is what tells the
    /// downstream stages the stream is over.
    pub async fn run(mut self, mut source: Box<dyn EventSource>) -> Result<u64> {
        while let Some(event) = source.next_event().await? {
            if !self.process(event).await {
                break;
            }
        }
        info!(envelopes = self.sequence, "classifier finished");
        Ok(self.sequence)
    }

    /// Handle one event; false ends the stream (terminal filter hit or a
    /// closed downstream).
    async fn process(&mut self, sourced: SourcedEvent) -> bool {
        let position = sourced.position();

        // Row events replay from the structural event that declared their
        // table, so remember where the latest one started.
        if let BinlogEvent::TableMap(_) = sourced.event {
            self.table_map_offset = sourced.header.start_position() as u64;
        }

        match self
            .filter
            .check_window(sourced.header.timestamp, &position)
        {
            FilterDecision::Accept => {}
            FilterDecision::SkipContinue => return true,
            FilterDecision::SkipTerminal => {
                debug!(%position, "terminal filter bound reached");
                return false;
            }
        }

        let header = &sourced.header;
        match &sourced.event {
            BinlogEvent::Query(query) => {
                self.tracker.observe_statement(&query.query);
                self.emit_query_stat(
                    header.timestamp,
                    &sourced.segment,
                    header.start_position() as u64,
                    header.end_position as u64,
                    &query.database,
                    &query.query,
                )
                .await
            }
            BinlogEvent::Gtid(_) => {
                // A GTID event opens a transaction group like BEGIN would.
                self.tracker.observe_statement("begin");
                self.emit_query_stat(
                    header.timestamp,
                    &sourced.segment,
                    header.start_position() as u64,
                    header.end_position as u64,
                    "",
                    "begin",
                )
                .await
            }
            BinlogEvent::Xid(_) => {
                self.tracker.observe_statement("commit");
                self.emit_query_stat(
                    header.timestamp,
                    &sourced.segment,
                    header.start_position() as u64,
                    header.end_position as u64,
                    "",
                    "commit",
                )
                .await
            }
            BinlogEvent::WriteRows(rows) => {
                self.process_rows(RowKind::Insert, rows, &sourced).await
            }
            BinlogEvent::UpdateRows(rows) => {
                self.process_rows(RowKind::Update, rows, &sourced).await
            }
            BinlogEvent::DeleteRows(rows) => {
                self.process_rows(RowKind::Delete, rows, &sourced).await
            }
            // Table maps were handled above; rotations, format descriptions
            // and heartbeats carry nothing for the pipeline.
            _ => true,
        }
    }

    async fn process_rows(
        &mut self,
        kind: RowKind,
        rows: &RowsChange,
        sourced: &SourcedEvent,
    ) -> bool {
        if !self.filter.accepts_table(&rows.database, &rows.table) {
            trace!(
                table = %format!("{}.{}", rows.database, rows.table),
                "row event filtered out"
            );
            return true;
        }
        if !self.filter.accepts_kind(kind) {
            return true;
        }

        let status = self.tracker.observe_rows();
        // Updates decode as before/after pairs, so len() is the statement's
        // affected-row count for every kind.
        let row_count = rows.rows.len() as u64;

        if self.emit_rows && self.schema.contains_table(&rows.database, &rows.table) {
            self.sequence += 1;
            let envelope = EventEnvelope {
                sequence: self.sequence,
                position: sourced.position(),
                start_offset: self.table_map_offset,
                database: rows.database.clone(),
                table: rows.table.clone(),
                kind,
                rows: rows.rows.clone(),
                row_count,
                timestamp: sourced.header.timestamp,
                trx_index: self.tracker.index(),
                trx_status: status,
            };
            if let Some(tx) = &self.envelope_tx {
                if tx.send(envelope).await.is_err() {
                    return false;
                }
            }
        } else if self.emit_rows {
            // Unknown table (likely dropped since): no row output, but the
            // event still counts in statistics.
            trace!(
                table = %format!("{}.{}", rows.database, rows.table),
                "no table definition, dropping from row output"
            );
        }

        self.stats_tx
            .send(StatsRecord {
                timestamp: sourced.header.timestamp,
                segment: sourced.segment.clone(),
                start_offset: self.table_map_offset,
                stop_offset: sourced.header.end_position as u64,
                database: rows.database.clone(),
                table: rows.table.clone(),
                kind: StatKind::from(kind),
                row_count,
                query: String::new(),
            })
            .await
            .is_ok()
    }

    async fn emit_query_stat(
        &mut self,
        timestamp: u32,
        segment: &str,
        start_offset: u64,
        stop_offset: u64,
        database: &str,
        query: &str,
    ) -> bool {
        self.stats_tx
            .send(StatsRecord {
                timestamp,
                segment: segment.to_string(),
                start_offset,
                stop_offset,
                database: database.to_string(),
                table: String::new(),
                kind: StatKind::Query,
                row_count: 0,
                query: query.to_string(),
            })
            .await
            .is_ok()
    }
}

//! Snapshot-based history compaction.
//!
//! For every aggregate the boundary is the smallest version among
//!
//! - the versions of its newest `retained_snapshots` snapshots, and
//! - if a cutoff is given, every version recorded at or after the cutoff.
//!
//! Everything below the boundary is deleted. Aggregates with neither
//! snapshots nor recent records have no boundary and are left untouched.

use prost_types::Timestamp;
use sea_query::{Alias, Cond, Expr, Order, Query, SelectStatement};
use tracing::{debug, info};

use super::cursor::{pair, DbCursor, IntReader};
use super::event_records::EventRecordTable;
use super::id::EntityId;
use super::schema::EventRecords;
use super::sql::{open_cursor, Statement};
use crate::error::Result;
use crate::record::RecordKind;

/// Alias of the outer row set in the boundary query.
const OUTER: &str = "boundary";

impl<I: EntityId> EventRecordTable<I> {
    fn boundary_statement(
        &self,
        retained_snapshots: u64,
        cutoff: Option<&Timestamp>,
    ) -> SelectStatement {
        let table = Alias::new(self.name());
        let outer = Alias::new(OUTER);
        let same_aggregate = || {
            Expr::col((table.clone(), EventRecords::Id)).equals((outer.clone(), EventRecords::Id))
        };

        let newest_snapshots = Query::select()
            .column((table.clone(), EventRecords::Version))
            .from(table.clone())
            .cond_where(
                Cond::all()
                    .add(same_aggregate())
                    .add(Expr::col((table.clone(), EventRecords::Kind)).eq(RecordKind::Snapshot.as_str())),
            )
            .order_by((table.clone(), EventRecords::Version), Order::Desc)
            .limit(retained_snapshots)
            .to_owned();

        let mut retained =
            Cond::any().add(Expr::col((outer.clone(), EventRecords::Version)).in_subquery(newest_snapshots));

        if let Some(cutoff) = cutoff {
            let at_or_after_cutoff = Cond::any()
                .add(Expr::col((table.clone(), EventRecords::Timestamp)).gt(cutoff.seconds))
                .add(
                    Cond::all()
                        .add(Expr::col((table.clone(), EventRecords::Timestamp)).eq(cutoff.seconds))
                        .add(Expr::col((table.clone(), EventRecords::TimestampNanos)).gte(cutoff.nanos)),
                );
            let recent = Query::select()
                .column((table.clone(), EventRecords::Version))
                .from(table.clone())
                .cond_where(Cond::all().add(same_aggregate()).add(at_or_after_cutoff))
                .to_owned();
            retained = retained.add(Expr::col((outer.clone(), EventRecords::Version)).in_subquery(recent));
        }

        Query::select()
            .column((outer.clone(), EventRecords::Id))
            .expr_as(
                Expr::col((outer.clone(), EventRecords::Version)).min(),
                Alias::new("version"),
            )
            .from_as(table, outer.clone())
            .cond_where(retained)
            .group_by_col((outer, EventRecords::Id))
            .to_owned()
    }

    /// Per-aggregate `(id, boundary version)` pairs.
    ///
    /// `retained_snapshots` is how many of the newest snapshots survive;
    /// an aggregate with fewer snapshots keeps all of them. Records at or
    /// after `cutoff` survive as well. Timestamps compare on seconds first,
    /// then nanos.
    pub fn select_version_boundary(
        &self,
        retained_snapshots: u64,
        cutoff: Option<&Timestamp>,
    ) -> DbCursor<(I, i32)> {
        let stmt = self.boundary_statement(retained_snapshots, cutoff);
        let statement = Statement::select(&stmt, self.dialect());

        open_cursor(
            self.pool(),
            statement,
            None,
            pair(self.id_column().clone(), IntReader("version".to_string())),
        )
    }

    /// Delete every record below each aggregate's boundary.
    ///
    /// The boundary cursor is drained before the first delete so no read
    /// stays open while rows are removed. Returns the number of rows deleted.
    pub async fn compact(&self, retained_snapshots: u64, cutoff: Option<&Timestamp>) -> Result<u64> {
        let boundaries = self
            .select_version_boundary(retained_snapshots, cutoff)
            .collect_remaining()
            .await?;

        let mut deleted = 0;
        for (id, version) in &boundaries {
            let removed = self.delete_prior_records(id, *version).await?;
            debug!(parent: self.span(), id = ?id, version, removed, "Compacted aggregate history");
            deleted += removed;
        }

        info!(
            parent: self.span(),
            aggregates = boundaries.len(),
            deleted,
            "Truncated aggregate history"
        );
        Ok(deleted)
    }
}
